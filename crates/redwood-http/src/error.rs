//! Error types for the HTTP transport.

use redwood_core::CoreError;
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed request, rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport-level failure opening or using a request or connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Malformed frame or response payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// Non-success status from the peer.
    #[error("remote error ({status}): {body}")]
    Remote { status: u16, body: String },

    /// Auth handshake rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
}

impl TransportError {
    /// Status code of a remote error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<CoreError> for TransportError {
    fn from(e: CoreError) -> Self {
        TransportError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::ConnectionFailed(e.to_string())
        }
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
