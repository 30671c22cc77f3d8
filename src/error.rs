//! Crate error types.
//!
//! `VnaError` covers the failure modes of the acquisition path: bad resource
//! strings, transport problems, malformed instrument responses, and invalid
//! sweep configurations. Driver and orchestration code layers `anyhow`
//! context on top of these, so callers see both the typed cause and the
//! operation that hit it.

use thiserror::Error;

/// Errors produced by the VectorStar acquisition library.
#[derive(Error, Debug)]
pub enum VnaError {
    /// A VISA resource string that does not match the supported grammar.
    #[error("invalid VISA resource '{resource}': {reason}")]
    Resource { resource: String, reason: String },

    /// A resource type the pure-TCP transport cannot open.
    #[error("transport '{0}' is not supported; use a TCPIP resource")]
    UnsupportedTransport(String),

    /// Underlying socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No response within the configured timeout.
    #[error("timeout waiting for response to '{0}'")]
    Timeout(String),

    /// The instrument closed the connection.
    #[error("connection closed by instrument")]
    ConnectionClosed,

    /// An IEEE 488.2 block header or payload that could not be decoded.
    #[error("malformed binary block: {0}")]
    BinaryBlock(String),

    /// A scalar response that failed to parse as the requested type.
    #[error("failed to parse '{value}' from query '{query}': {reason}")]
    Parse {
        query: String,
        value: String,
        reason: String,
    },

    /// A sweep configuration rejected by validation.
    #[error("invalid sweep configuration: {0}")]
    Config(String),

    /// Acquired data that is internally inconsistent.
    #[error("inconsistent sweep data: {0}")]
    Data(String),

    /// Failure serializing the settings summary for file headers.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An A-wave matrix with no inverse at the given frequency index.
    #[error("singular wave matrix at frequency index {0}")]
    SingularMatrix(usize),
}
