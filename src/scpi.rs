//! SCPI over TCP communication.
//!
//! Async SCPI client for the VectorStar's raw command socket. It handles
//! connection setup, line-oriented command/query exchanges, and IEEE 488.2
//! definite-length binary block transfers (the instrument is switched to
//! little-endian 64-bit float output with `LSB;FMB` before block reads).
//!
//! The [`ScpiOps`] trait is the seam the driver talks through, so tests and
//! `--mock` runs can substitute [`crate::mock::MockVectorStar`] for a live
//! socket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::VnaError;
use crate::resource::VisaResource;

/// Default command timeout in milliseconds. Must cover one full held sweep:
/// the trace-data query blocks until the sweep completes.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// SCPI operations the VectorStar driver needs from a transport.
#[async_trait]
pub trait ScpiOps: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;
    /// Send a query and read one line of response, trimmed.
    async fn query(&self, query: &str) -> Result<String>;
    /// Send a query and read an IEEE 488.2 definite-length block of
    /// little-endian f64 values.
    async fn query_binary_f64(&self, query: &str) -> Result<Vec<f64>>;
}

/// Async SCPI client over a raw TCP socket.
#[derive(Debug)]
pub struct ScpiClient {
    stream: Mutex<BufReader<TcpStream>>,
    timeout: Duration,
}

impl ScpiClient {
    /// Connect to the instrument named by a VISA resource.
    ///
    /// TCPIP `INSTR` resources use the instrument's default SCPI socket
    /// port; `SOCKET` resources use the port they name. GPIB resources are
    /// rejected: this transport has no VISA layer underneath it.
    pub async fn connect(resource: &VisaResource) -> Result<Self> {
        let (host, port) = resource
            .host_port()
            .ok_or_else(|| VnaError::UnsupportedTransport(resource.interface().to_string()))?;

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| VnaError::Timeout(format!("connect to {host}:{port}")))?
            .with_context(|| format!("failed to connect to {host}:{port}"))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::info!("connected to {resource} ({host}:{port})");

        Ok(Self {
            stream: Mutex::new(BufReader::new(stream)),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Set the per-command response timeout.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    async fn write_line(stream: &mut BufReader<TcpStream>, command: &str) -> Result<()> {
        let cmd = format!("{command}\n");
        stream
            .get_mut()
            .write_all(cmd.as_bytes())
            .await
            .with_context(|| format!("failed to write command: {command}"))?;
        stream
            .get_mut()
            .flush()
            .await
            .context("failed to flush stream")?;
        Ok(())
    }

    async fn send(&self, command: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;

        tracing::debug!("SCPI write: {command}");
        Self::write_line(&mut stream, command).await?;

        // Brief pacing gap so back-to-back setup commands are not coalesced
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(())
    }

    async fn ask(&self, query: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;

        Self::flush_input_buffer(&mut stream).await?;

        tracing::debug!("SCPI query: {query}");
        Self::write_line(&mut stream, query).await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(VnaError::ConnectionClosed.into()),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!("SCPI response: {trimmed:?}");
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e).with_context(|| format!("failed to read response to {query}")),
            Err(_) => Err(VnaError::Timeout(query.to_string()).into()),
        }
    }

    async fn ask_binary(&self, query: &str) -> Result<Vec<f64>> {
        let mut stream = self.stream.lock().await;

        Self::flush_input_buffer(&mut stream).await?;

        tracing::debug!("SCPI binary query: {query}");
        Self::write_line(&mut stream, query).await?;

        // '#' marker plus digit-count character
        let mut header = [0u8; 2];
        Self::read_exact_timeout(&mut stream, &mut header, self.timeout, query).await?;
        if header[0] != b'#' {
            return Err(VnaError::BinaryBlock(format!(
                "expected '#' block marker, got byte 0x{:02x}",
                header[0]
            ))
            .into());
        }
        let ndigits = (header[1] as char)
            .to_digit(10)
            .ok_or_else(|| {
                VnaError::BinaryBlock(format!("invalid digit count byte 0x{:02x}", header[1]))
            })? as usize;
        if ndigits == 0 {
            return Err(
                VnaError::BinaryBlock("indefinite-length blocks are not supported".to_string())
                    .into(),
            );
        }

        let mut len_field = vec![0u8; ndigits];
        Self::read_exact_timeout(&mut stream, &mut len_field, self.timeout, query).await?;
        let len_str = std::str::from_utf8(&len_field)
            .map_err(|_| VnaError::BinaryBlock("length field is not ASCII".to_string()))?;
        let len: usize = len_str.parse().map_err(|_| {
            VnaError::BinaryBlock(format!("invalid length field '{len_str}'"))
        })?;
        if len % 8 != 0 {
            return Err(VnaError::BinaryBlock(format!(
                "payload of {len} bytes is not a whole number of f64 values"
            ))
            .into());
        }

        let mut payload = vec![0u8; len];
        Self::read_exact_timeout(&mut stream, &mut payload, self.timeout, query).await?;

        tracing::debug!("SCPI binary response: {len} bytes");
        Ok(decode_le_f64(&payload))
    }

    async fn read_exact_timeout(
        stream: &mut BufReader<TcpStream>,
        buf: &mut [u8],
        duration: Duration,
        query: &str,
    ) -> Result<()> {
        match timeout(duration, stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(VnaError::ConnectionClosed.into())
            }
            Ok(Err(e)) => Err(e).with_context(|| format!("failed to read response to {query}")),
            Err(_) => Err(VnaError::Timeout(query.to_string()).into()),
        }
    }

    /// Clear any pending data from the input buffer.
    ///
    /// Block responses leave their trailing terminator on the wire; stale
    /// bytes would otherwise be read as the next response.
    async fn flush_input_buffer(stream: &mut BufReader<TcpStream>) -> Result<()> {
        {
            let buf = stream.buffer();
            if !buf.is_empty() {
                let len = buf.len();
                tracing::debug!("flushing {len} buffered bytes");
                stream.consume(len);
            }
        }

        let mut probe = vec![0u8; 256];
        loop {
            match timeout(Duration::from_millis(10), stream.get_mut().peek(&mut probe)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => {
                    let mut discard = vec![0u8; n];
                    let _ = stream.get_mut().try_read(&mut discard);
                    tracing::debug!("flushed {n} stale bytes from stream");
                }
                Ok(Err(_)) => break,
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ScpiOps for ScpiClient {
    async fn write(&self, command: &str) -> Result<()> {
        self.send(command).await
    }

    async fn query(&self, query: &str) -> Result<String> {
        self.ask(query).await
    }

    async fn query_binary_f64(&self, query: &str) -> Result<Vec<f64>> {
        self.ask_binary(query).await
    }
}

fn decode_le_f64(payload: &[u8]) -> Vec<f64> {
    payload
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_doubles() {
        let values = [1.0f64, -2.5, 3.25e9];
        let mut payload = Vec::new();
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decode_le_f64(&payload), values);
    }

    #[test]
    fn decodes_empty_payload() {
        assert!(decode_le_f64(&[]).is_empty());
    }
}
