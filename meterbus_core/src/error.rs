//! Unified error handling for meterbus
//!
//! This module provides a centralized error type for the whole workspace.
//! Protocol failures carry enough structure for callers to tell a silent
//! device apart from a noisy bus or a device that actively refused a request.

use std::fmt;

use thiserror::Error;

/// Why a response was not complete when the overall timeout elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Nothing at all arrived on the bus
    NoResponse,
    /// The slave address was matched but fewer bytes than the minimum arrived
    Truncated { received: usize, expected: usize },
    /// Enough bytes arrived but the line never went idle
    BusNeverIdle { received: usize },
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "no response"),
            Self::Truncated { received, expected } => {
                write!(f, "truncated response ({} of {} bytes)", received, expected)
            }
            Self::BusNeverIdle { received } => {
                write!(f, "bus never went idle after {} bytes", received)
            }
        }
    }
}

/// Modbus exception code reported by a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Other(u8),
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveDeviceFailure,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::SlaveDeviceFailure => 0x04,
            Self::Other(code) => *code,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "illegal function (0x01)"),
            Self::IllegalDataAddress => write!(f, "illegal data address (0x02)"),
            Self::IllegalDataValue => write!(f, "illegal data value (0x03)"),
            Self::SlaveDeviceFailure => write!(f, "slave device failure (0x04)"),
            Self::Other(code) => write!(f, "exception 0x{:02X}", code),
        }
    }
}

/// Main error type for meterbus operations
#[derive(Debug, Error)]
pub enum MeterbusError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Driver-related errors (port not open, pin not configured, ...)
    #[error("Driver error: {0}")]
    Driver(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Rejected before any byte was put on the bus
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The response did not complete within the overall timeout
    #[error("Transport timeout: {0}")]
    TransportTimeout(TimeoutKind),

    /// Bytes arrived but none of them matched the expected slave address
    #[error("Slave address never seen ({discarded} bytes discarded)")]
    AddressNeverSeen { discarded: usize },

    /// The slave answered with the exception bit set
    #[error("Modbus exception for function 0x{function:02X}: {code}")]
    ModbusException { function: u8, code: ExceptionCode },

    /// Checksum failure, the whole response is discarded
    #[error("CRC mismatch (computed 0x{computed:04X}, received 0x{received:04X})")]
    CrcMismatch { computed: u16, received: u16 },

    /// Response shorter than any valid frame
    #[error("Response too short ({len} bytes)")]
    TooShort { len: usize },

    /// Well-formed frame that does not answer the request that was sent
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Convenience type alias for Results using MeterbusError
pub type MeterbusResult<T> = Result<T, MeterbusError>;

impl From<serde_json::Error> for MeterbusError {
    fn from(err: serde_json::Error) -> Self {
        MeterbusError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MeterbusError {
    fn from(err: serde_yaml::Error) -> Self {
        MeterbusError::Serialization(format!("YAML error: {}", err))
    }
}

impl From<toml::de::Error> for MeterbusError {
    fn from(err: toml::de::Error) -> Self {
        MeterbusError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for MeterbusError {
    fn from(err: toml::ser::Error) -> Self {
        MeterbusError::Serialization(format!("TOML serialization error: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for MeterbusError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        MeterbusError::Driver("Lock poisoned".to_string())
    }
}

// Helper methods
impl MeterbusError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        MeterbusError::Config(msg.into())
    }

    /// Create a driver error
    pub fn driver<S: Into<String>>(msg: S) -> Self {
        MeterbusError::Driver(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        MeterbusError::InvalidArgument(msg.into())
    }

    /// Create an unexpected response error
    pub fn unexpected<S: Into<String>>(msg: S) -> Self {
        MeterbusError::UnexpectedResponse(msg.into())
    }

    /// Build the exception error from the raw function and exception bytes
    pub fn exception(function: u8, code: u8) -> Self {
        MeterbusError::ModbusException {
            function: function & 0x7F,
            code: ExceptionCode::from_u8(code),
        }
    }

    /// Check if this is a transport timeout of any kind
    pub fn is_timeout(&self) -> bool {
        matches!(self, MeterbusError::TransportTimeout(_))
    }

    /// Check if the device reported a Modbus exception
    pub fn is_exception(&self) -> bool {
        matches!(self, MeterbusError::ModbusException { .. })
    }

    /// Check if this is a checksum failure
    pub fn is_crc_mismatch(&self) -> bool {
        matches!(self, MeterbusError::CrcMismatch { .. })
    }

    /// Check if the request was rejected before any I/O
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, MeterbusError::InvalidArgument(_))
    }

    /// Exception code, when the slave reported one
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            MeterbusError::ModbusException { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_code_roundtrip() {
        for raw in 0u8..=0x0B {
            assert_eq!(ExceptionCode::from_u8(raw).code(), raw);
        }
        assert_eq!(ExceptionCode::from_u8(0x02), ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn test_exception_strips_error_bit() {
        let err = MeterbusError::exception(0x84, 0x02);
        match err {
            MeterbusError::ModbusException { function, code } => {
                assert_eq!(function, 0x04);
                assert_eq!(code, ExceptionCode::IllegalDataAddress);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_predicates() {
        let timeout = MeterbusError::TransportTimeout(TimeoutKind::Truncated {
            received: 3,
            expected: 7,
        });
        assert!(timeout.is_timeout());
        assert!(!timeout.is_exception());
        assert_eq!(
            timeout.to_string(),
            "Transport timeout: truncated response (3 of 7 bytes)"
        );

        let crc = MeterbusError::CrcMismatch {
            computed: 0x1234,
            received: 0x4321,
        };
        assert!(crc.is_crc_mismatch());
        assert_eq!(crc.exception_code(), None);

        assert!(MeterbusError::invalid_argument("count 0").is_invalid_argument());
    }
}
