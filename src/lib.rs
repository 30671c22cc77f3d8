//! Raw wave-parameter acquisition for Anritsu VectorStar VNAs.
//!
//! This crate drives a VectorStar MS464xB vector network analyzer over its
//! raw SCPI socket: it configures a sweep, redefines the display traces to
//! the raw A/B wave parameters, runs held single sweeps, reads the complex
//! trace data and frequency axis as binary blocks, restores the instrument
//! settings it touched, and writes the results as Touchstone `.s2p` files.
//!
//! # Communication
//!
//! Instruments are addressed with VISA resource strings
//! (`TCPIP::169.254.63.67::INSTR`, `TCPIP0::host::5001::SOCKET`); the
//! transport is plain TCP with no VISA library underneath, so GPIB
//! resources parse but cannot be opened.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vectorstar::{raw_sweep, SweepConfig};
//!
//! let config = SweepConfig {
//!     address: "TCPIP::169.254.63.67::INSTR".to_string(),
//!     sweeps: 100,
//!     if_bandwidth: Some(1000.0),
//!     freq_start: Some(1.0e9),
//!     freq_stop: Some(150.0e9),
//!     points: Some(299),
//!     power: Some(-10.0),
//!     power_extended: Some(-10.0),
//!     ..SweepConfig::mock()
//! };
//! let data = raw_sweep(&config).await?;
//! data.write_wave_series(out_dir, "test_data")?;
//! ```
//!
//! # Mock Mode
//!
//! Setting `mock = true` in the configuration (or `--mock` on the CLI)
//! substitutes an in-process simulated instrument, for tests and dry runs
//! without hardware.

pub mod driver;
pub mod error;
pub mod mock;
pub mod resource;
pub mod scpi;
pub mod sweep;
pub mod touchstone;
pub mod twoport;

pub use driver::{VectorStar, WAVE_TRACES};
pub use error::VnaError;
pub use mock::MockVectorStar;
pub use resource::VisaResource;
pub use scpi::{ScpiClient, ScpiOps};
pub use sweep::{raw_sweep, run_raw_sweep, RawSweep, SweepConfig, SweepSettings, SweepTiming};
pub use touchstone::TouchstoneFile;
pub use twoport::TwoPort;
