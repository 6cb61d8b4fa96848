//! Error types for the LED link protocol.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building, exchanging or applying commands.
#[derive(Error, Debug)]
pub enum Error {
    /// A command parameter is outside its allowed range.
    #[error("Invalid {field}: {value} (must be {expected})")]
    InvalidValue {
        field: &'static str,
        value: i64,
        expected: &'static str,
    },

    /// Too many effect parameter bytes.
    #[error("Effect parameters too long: {0} bytes (max {max})", max = crate::command::MAX_EFFECT_PARAMS)]
    EffectParamsTooLong(usize),

    /// Unknown effect identifier or name.
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    /// Textual command could not be parsed.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Payload carries an opcode this side does not understand.
    #[error("Unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    /// Payload parameters have the wrong length for their opcode.
    #[error("Malformed parameters for opcode 0x{opcode:02X}: expected {expected} bytes, got {actual}")]
    MalformedParams {
        opcode: u8,
        expected: usize,
        actual: usize,
    },

    /// The device answered with something other than what was asked for.
    #[error("Unexpected response to opcode 0x{opcode:02X}: {response}")]
    UnexpectedResponse { opcode: u8, response: String },

    /// Endpoint does not exist.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// Serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Writing a frame failed.
    #[error("Write error: {0}")]
    Write(#[source] std::io::Error),

    /// Reading from the stream failed.
    #[error("Read error: {0}")]
    Read(#[source] std::io::Error),

    /// The peer closed the stream.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// No complete frame arrived in time.
    #[error("Timed out after {0:?} waiting for a frame")]
    Timeout(Duration),

    /// Receive buffer grew past its limit without yielding a frame.
    #[error("Receive buffer overflow ({limit} bytes without a complete frame)")]
    BufferOverflow { limit: usize },

    /// No session is open.
    #[error("Not connected")]
    NotConnected,

    /// The link worker has stopped.
    #[error("Link worker is not running")]
    WorkerGone,
}

impl Error {
    /// Returns true for transport failures that count against the link.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Error::Write(_)
                | Error::Read(_)
                | Error::ConnectionClosed
                | Error::Timeout(_)
                | Error::BufferOverflow { .. }
                | Error::NotConnected
        )
    }

    /// Returns true for errors raised while constructing a command.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidValue { .. }
                | Error::EffectParamsTooLong(_)
                | Error::UnknownEffect(_)
                | Error::InvalidCommand(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Timeout(Duration::from_millis(5)).is_link_failure());
        assert!(Error::ConnectionClosed.is_link_failure());
        assert!(!Error::UnknownOpcode(0x42).is_link_failure());
        assert!(Error::EffectParamsTooLong(40).is_validation());
        assert!(!Error::NotConnected.is_validation());
    }
}
