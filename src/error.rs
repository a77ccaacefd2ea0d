//! Custom error types for the session engine.
//!
//! This module defines the primary error type, `LaError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized taxonomy for
//! everything that can go wrong between `connect` and `disconnect`:
//!
//! - **Connection-level**: `ConnectTimeout`, `ConnectionLost` — the transport
//!   never came up, or went away underneath us.
//! - **Command-level**: `CommandTimeout` — a single request expired without a
//!   matching response arriving.
//! - **Capture-level**: `CaptureTimeout`, `BadParams`, `Busy`, `DeviceError`,
//!   `Stopped`, `Unexpected` — the per-capture failure reasons surfaced in a
//!   [`CaptureOutcome`](crate::capture::CaptureOutcome).
//! - **Wire-level**: `Decode` — a damaged or unparseable frame.
//!
//! Every public operation returns `LaResult` rather than panicking across the
//! API boundary, and the engine performs no hidden retries — callers always
//! see the first structured failure reason.
//!
//! `LaError` is `Clone` so a single disconnect reason can be fanned out to
//! every pending command; the `Io`/`Config` variants therefore carry rendered
//! messages instead of the non-cloneable source errors.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LaResult<T> = std::result::Result<T, LaError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaError {
    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Command timed out")]
    CommandTimeout,

    #[error("Capture timed out")]
    CaptureTimeout,

    #[error("Invalid capture parameters: {0}")]
    BadParams(String),

    #[error("A capture is already active")]
    Busy,

    #[error("Device reported error: {0}")]
    DeviceError(String),

    #[error("Capture stopped before completion")]
    Stopped,

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Frame decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serial support not enabled. Rebuild with --features transport_serial")]
    SerialFeatureDisabled,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LaError {
    fn from(err: std::io::Error) -> Self {
        LaError::Io(err.to_string())
    }
}

impl From<config::ConfigError> for LaError {
    fn from(err: config::ConfigError) -> Self {
        LaError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LaError::DeviceError("trigger overrun".to_string());
        assert_eq!(err.to_string(), "Device reported error: trigger overrun");
    }

    #[test]
    fn test_connection_lost_carries_reason() {
        let err = LaError::ConnectionLost("peer reset".to_string());
        assert!(err.to_string().contains("peer reset"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: LaError = io.into();
        assert!(matches!(err, LaError::Io(_)));
    }
}
