//! Error handling module
//!
//! Defines the error types shared by the relay server and the client.

use std::io;

use thiserror::Error;

use crate::protocol::Identity;

/// Main error type for Relaysync
#[derive(Error, Debug)]
pub enum RelayError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Network-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Every connection identity is in use")]
    NoFreeIdentity,

    #[error("Send to {identity} failed: {reason}")]
    TransportFailure { identity: Identity, reason: String },
}

/// Protocol (decode) errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: needed {needed} bytes, {remaining} remaining")]
    MalformedMessage { needed: usize, remaining: usize },

    #[error("Invalid UTF-8 in string field")]
    InvalidString,

    #[error("Chat text too long: {len} bytes (max: {max})")]
    ChatTooLong { len: usize, max: usize },

    #[error("Unknown message tag: {0}")]
    UnknownTag(u16),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Whether this error is a decode failure of a single message, which is
    /// discarded without affecting the connection
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedMessage { .. }
                | ProtocolError::InvalidString
                | ProtocolError::ChatTooLong { .. }
        )
    }
}

/// Result type alias for Relaysync operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = ProtocolError::UnknownTag(42);
        assert_eq!(err.to_string(), "Unknown message tag: 42");

        let err = ProtocolError::MalformedMessage {
            needed: 4,
            remaining: 1,
        };
        assert_eq!(
            err.to_string(),
            "Malformed message: needed 4 bytes, 1 remaining"
        );

        let err = NetworkError::TransportFailure {
            identity: 7,
            reason: "queue full".to_string(),
        };
        assert_eq!(err.to_string(), "Send to 7 failed: queue full");
    }

    #[test]
    fn test_error_conversion() {
        let err: RelayError = ProtocolError::InvalidString.into();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::InvalidString)
        ));

        let err: RelayError = NetworkError::NoFreeIdentity.into();
        assert_eq!(
            err.to_string(),
            "Network error: Every connection identity is in use"
        );
    }

    #[test]
    fn test_malformed_classification() {
        assert!(ProtocolError::InvalidString.is_malformed());
        assert!(ProtocolError::MalformedMessage {
            needed: 2,
            remaining: 0
        }
        .is_malformed());
        assert!(!ProtocolError::UnknownTag(9).is_malformed());
    }
}
