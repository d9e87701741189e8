//! Custom error types for the logger.
//!
//! The taxonomy separates failures by how far they are allowed to travel:
//!
//! - **`InstrumentError`**: anything that goes wrong while talking to a bench
//!   instrument. These never leave the session loop as errors; the poll turns
//!   them into "unavailable" readings, and connection losses degrade the
//!   instrument for the remainder of the session.
//! - **`StreamError`**: failures of the device-under-test stream. These are
//!   fatal to the session and propagate to the driver, which tears down the
//!   bench before returning them.
//! - **`LoggerError`**: the crate-level error returned from configuration,
//!   session setup and the session loop. It wraps the two above plus
//!   configuration and log-file I/O failures.
//!
//! By using `#[from]`, `LoggerError` can be created from the underlying error
//! types with the `?` operator.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LoggerResult<T> = std::result::Result<T, LoggerError>;

/// The role a bench instrument plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentRole {
    /// Precision meter providing voltage and current readings.
    Meter,
    /// Programmable electronic load providing current and power readings.
    Load,
}

impl fmt::Display for InstrumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentRole::Meter => f.write_str("meter"),
            InstrumentRole::Load => f.write_str("load"),
        }
    }
}

/// Errors raised by the instrument transport and drivers.
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("{role} unreachable at {address}: {source}")]
    Connect {
        role: InstrumentRole,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timeout after {after:?} waiting for response to '{command}'")]
    Timeout { command: String, after: Duration },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("instrument not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstrumentError {
    /// Whether the failure leaves the connection unusable.
    ///
    /// Timeouts only cost the reading that timed out; a lost or closed
    /// connection degrades the instrument for the rest of the session.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            InstrumentError::ConnectionLost(_)
                | InstrumentError::NotConnected
                | InstrumentError::Io(_)
        )
    }
}

/// Fatal errors of the device-under-test line stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("serial device '{0}' not found")]
    NotFound(String),

    #[error("permission denied opening serial device '{0}'")]
    PermissionDenied(String),

    #[error("serial stream disconnected: {0}")]
    Disconnected(String),

    #[error("serial transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),
}

impl From<figment::Error> for LoggerError {
    fn from(value: figment::Error) -> Self {
        LoggerError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_do_not_count_as_connection_loss() {
        let timeout = InstrumentError::Timeout {
            command: "MEAS:CURR?".into(),
            after: Duration::from_secs(2),
        };
        assert!(!timeout.is_connection_lost());
        assert!(InstrumentError::ConnectionLost("reset by peer".into()).is_connection_lost());
        assert!(InstrumentError::NotConnected.is_connection_lost());
    }

    #[test]
    fn connect_error_names_role_and_address() {
        let err = InstrumentError::Connect {
            role: InstrumentRole::Load,
            address: "192.168.2.12:5025".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        let message = err.to_string();
        assert!(message.contains("load"));
        assert!(message.contains("192.168.2.12:5025"));
    }

    #[test]
    fn stream_error_converts_into_logger_error() {
        let err: LoggerError = StreamError::NotFound("/dev/ttyUSB9".into()).into();
        match err {
            LoggerError::Stream(StreamError::NotFound(port)) => assert_eq!(port, "/dev/ttyUSB9"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
