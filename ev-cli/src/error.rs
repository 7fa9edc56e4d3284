//! CLI Error Types

use thiserror::Error;

use ev_bundle::StorageError;
use ev_core::EvidenceError;
use ev_signer::SignerError;
use ev_verifier::VerifierError;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// File I/O error
    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Pipeline error
    #[error("{0}")]
    EvidenceError(#[from] EvidenceError),

    /// Signer error
    #[error("Signer error: {0}")]
    SignerError(#[from] SignerError),

    /// Artifact storage error
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    /// Verifier could not run
    #[error("Verifier error: {0}")]
    VerifierError(#[from] VerifierError),

    /// Verification ran and the bundle did not check out
    #[error("Verification failed: {message}")]
    VerificationFailed { message: String },
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub fn config(message: impl Into<String>) -> Self {
        CliError::ConfigError {
            message: message.into(),
        }
    }

    pub fn invalid_arg(message: impl Into<String>) -> Self {
        CliError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn verification_failed(message: impl Into<String>) -> Self {
        CliError::VerificationFailed {
            message: message.into(),
        }
    }

    /// Get exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ConfigError { .. } => 1,
            CliError::InvalidArgument { .. } => 2,
            CliError::IoError(_) => 5,
            CliError::JsonError(_) => 6,
            CliError::EvidenceError(e) => match e {
                EvidenceError::Validation(_) | EvidenceError::EmptyRange { .. } => 2,
                EvidenceError::NotFound(_) => 21,
                EvidenceError::RateLimited { .. } => 22,
                EvidenceError::Conflict(_) | EvidenceError::Immutable(_) => 23,
                EvidenceError::Integrity(_) => 24,
                EvidenceError::Transient(_) => 30,
                EvidenceError::Serialization(_) => 6,
            },
            CliError::SignerError(_) => 10,
            CliError::StorageError(_) => 31,
            CliError::VerifierError(_) => 11,
            CliError::VerificationFailed { .. } => 12,
        }
    }
}
