//! Verifier Error Types

use thiserror::Error;

use ev_core::EvidenceError;
use ev_signer::SignerError;

/// Verifier result type
pub type VerifierResult<T> = Result<T, VerifierError>;

/// Verifier error
///
/// These stop verification before a report can be produced. A manifest
/// that parses but does not check out is a report with errors, not an `Err`.
#[derive(Error, Debug)]
pub enum VerifierError {
    /// Manifest could not be read as a manifest
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Supplied public key does not match the trusted fingerprint
    #[error("Public key fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    /// Public key could not be parsed
    #[error("Public key error: {0}")]
    PublicKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reading from the store or storage
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
}

impl From<SignerError> for VerifierError {
    fn from(err: SignerError) -> Self {
        VerifierError::PublicKey(err.to_string())
    }
}

impl From<serde_json::Error> for VerifierError {
    fn from(err: serde_json::Error) -> Self {
        VerifierError::Manifest(err.to_string())
    }
}
