//! Protocol error types.

use helix_crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Connection closed by peer")]
    Closed,

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel crypto failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Handshake rejected: {0}")]
    Rejected(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}
