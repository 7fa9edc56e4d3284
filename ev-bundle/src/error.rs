//! Bundle storage errors

use thiserror::Error;

use ev_core::EvidenceError;

/// Storage adapter errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Key escapes the storage root or is empty
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Write operation failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Read operation failed
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Backend unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for EvidenceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => EvidenceError::not_found(format!("object {}", key)),
            StorageError::InvalidKey(key) => EvidenceError::validation(format!("storage key {}", key)),
            other => EvidenceError::transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_into_taxonomy() {
        let err: EvidenceError = StorageError::WriteFailed("disk full".into()).into();
        assert!(err.is_retryable());

        let err: EvidenceError = StorageError::NotFound("bundles/a/b/manifest.json".into()).into();
        assert!(matches!(err, EvidenceError::NotFound(_)));

        let err: EvidenceError = StorageError::InvalidKey("../etc".into()).into();
        assert!(matches!(err, EvidenceError::Validation(_)));
    }
}
