//! Error types for cyclerflash.

use std::io;
use thiserror::Error;

/// Result type for cyclerflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cyclerflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport could not be opened.
    #[error("Cannot open {port}: {reason}")]
    Connection {
        /// Port name/path that failed to open.
        port: String,
        /// Underlying reason reported by the OS.
        reason: String,
    },

    /// Firmware image or settings file cannot be parsed.
    #[error("Format error: {0}")]
    Format(String),

    /// Receiver never signalled that it is ready to receive.
    #[error("No receiver: no start signal after {rounds} timeout rounds")]
    NoReceiver {
        /// Number of consecutive read timeouts that elapsed.
        rounds: u32,
    },

    /// Receiver rejected the header block past the retry budget.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Block/ACK failure past the retry budget, or a transport write failure.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// The firmware image holds no bytes.
    #[error("Firmware image is empty")]
    EmptyImage,

    /// Transfer stopped at the user's request.
    #[error("Transfer cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is a user-initiated cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_a_failure_class() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::EmptyImage.is_cancelled());
        assert!(!Error::Transfer("nak".into()).is_cancelled());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::NoReceiver { rounds: 3 }.to_string(),
            "No receiver: no start signal after 3 timeout rounds"
        );
        let err = Error::Connection {
            port: "/dev/ttyUSB0".into(),
            reason: "busy".into(),
        };
        assert_eq!(err.to_string(), "Cannot open /dev/ttyUSB0: busy");
    }
}
