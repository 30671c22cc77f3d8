//! VISA resource address parsing.
//!
//! Instruments are addressed with VISA resource strings such as
//! `TCPIP::169.254.63.67::INSTR`, `TCPIP0::192.168.1.5::5001::SOCKET`, or
//! `GPIB0::6::INSTR`. This module parses those into a [`VisaResource`]. The
//! transport in this crate is plain TCP, so TCPIP resources map to the
//! instrument's raw SCPI socket; GPIB resources parse but cannot be opened.

use std::fmt;
use std::str::FromStr;

use crate::error::VnaError;

/// Raw SCPI socket port on the VectorStar when the resource does not name one.
pub const DEFAULT_SCPI_PORT: u16 = 5001;

/// A parsed VISA resource address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisaResource {
    /// `TCPIP[board]::<host>::INSTR` — LAN instrument, default SCPI port.
    TcpipInstr { board: u8, host: String },
    /// `TCPIP[board]::<host>::<port>::SOCKET` — raw socket, explicit port.
    TcpipSocket { board: u8, host: String, port: u16 },
    /// `GPIB[board]::<address>::INSTR` — recognized but not connectable here.
    Gpib { board: u8, address: u8 },
}

impl VisaResource {
    /// Host and TCP port for network resources, `None` for GPIB.
    pub fn host_port(&self) -> Option<(&str, u16)> {
        match self {
            Self::TcpipInstr { host, .. } => Some((host, DEFAULT_SCPI_PORT)),
            Self::TcpipSocket { host, port, .. } => Some((host, *port)),
            Self::Gpib { .. } => None,
        }
    }

    /// Interface name, for error reporting.
    pub fn interface(&self) -> &'static str {
        match self {
            Self::TcpipInstr { .. } | Self::TcpipSocket { .. } => "TCPIP",
            Self::Gpib { .. } => "GPIB",
        }
    }
}

fn parse_board(digits: &str, resource: &str) -> Result<u8, VnaError> {
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse().map_err(|_| VnaError::Resource {
        resource: resource.to_string(),
        reason: format!("invalid board number '{digits}'"),
    })
}

impl FromStr for VisaResource {
    type Err = VnaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| VnaError::Resource {
            resource: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split("::").collect();
        if parts.len() < 2 {
            return Err(fail("expected '::'-separated fields".to_string()));
        }

        let head = parts[0].to_ascii_uppercase();
        if let Some(digits) = head.strip_prefix("TCPIP") {
            let board = parse_board(digits, s)?;
            let host = parts[1];
            if host.is_empty() {
                return Err(fail("empty host".to_string()));
            }
            match parts.len() {
                2 => Ok(Self::TcpipInstr {
                    board,
                    host: host.to_string(),
                }),
                3 if parts[2].eq_ignore_ascii_case("INSTR") => Ok(Self::TcpipInstr {
                    board,
                    host: host.to_string(),
                }),
                4 if parts[3].eq_ignore_ascii_case("SOCKET") => {
                    let port = parts[2]
                        .parse()
                        .map_err(|_| fail(format!("invalid port '{}'", parts[2])))?;
                    Ok(Self::TcpipSocket {
                        board,
                        host: host.to_string(),
                        port,
                    })
                }
                _ => Err(fail(
                    "expected 'INSTR' or '<port>::SOCKET' after host".to_string(),
                )),
            }
        } else if let Some(digits) = head.strip_prefix("GPIB") {
            let board = parse_board(digits, s)?;
            if parts.len() > 3 || (parts.len() == 3 && !parts[2].eq_ignore_ascii_case("INSTR")) {
                return Err(fail("expected 'INSTR' after GPIB address".to_string()));
            }
            let address = parts[1]
                .parse()
                .map_err(|_| fail(format!("invalid GPIB address '{}'", parts[1])))?;
            Ok(Self::Gpib { board, address })
        } else {
            Err(fail(format!(
                "unknown interface '{}' (expected TCPIP or GPIB)",
                parts[0]
            )))
        }
    }
}

impl fmt::Display for VisaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpipInstr { board, host } => write!(f, "TCPIP{board}::{host}::INSTR"),
            Self::TcpipSocket { board, host, port } => {
                write!(f, "TCPIP{board}::{host}::{port}::SOCKET")
            }
            Self::Gpib { board, address } => write!(f, "GPIB{board}::{address}::INSTR"),
        }
    }
}
