//! Error types for the signer

use ev_core::EvidenceError;
use thiserror::Error;

/// Signer errors
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Key backend unreachable or refused to sign
    #[error("Key backend error: {0}")]
    Backend(String),

    #[error("Key file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for signer operations
pub type SignerResult<T> = Result<T, SignerError>;

impl From<SignerError> for EvidenceError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Backend(msg) => EvidenceError::Transient(msg),
            SignerError::Io(e) => EvidenceError::Transient(e.to_string()),
            SignerError::InvalidKey(msg) => EvidenceError::Validation(msg),
            SignerError::InvalidSignature(msg) => EvidenceError::Integrity(msg),
        }
    }
}
