//! Error types for Redwood Core.

use thiserror::Error;

/// Errors that can occur while decoding or signing protocol data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid utf-8 in stream: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hex error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
