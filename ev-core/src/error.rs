//! Error types for the evidence pipeline
//!
//! One taxonomy is shared by every layer so that callers can decide how to
//! react (retry, surface, dead-letter) without knowing which store or
//! backend produced the failure.

use thiserror::Error;

/// Evidence pipeline errors
#[derive(Error, Debug)]
pub enum EvidenceError {
    /// Malformed input, unknown tenant, bad hash format
    #[error("Validation error: {0}")]
    Validation(String),

    /// A concurrent writer advanced the state first (ledger tail race)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded for {action}: {limit} per {window_secs}s")]
    RateLimited {
        action: String,
        limit: u32,
        window_secs: u64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// No decision records in the requested range
    #[error("No records found for tenant {tenant_id} in the requested range")]
    EmptyRange { tenant_id: String },

    /// Storage, database or key backend unavailable
    #[error("Transient error: {0}")]
    Transient(String),

    /// Chain, hash or signature mismatch. Never auto-repaired.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Attempted update of a READY bundle
    #[error("Immutable resource: {0}")]
    Immutable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for evidence operations
pub type EvidenceResult<T> = Result<T, EvidenceError>;

impl EvidenceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    /// Whether a retry of the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Conflict(_))
    }

    /// Stable machine-readable code, used in audit metadata and reports
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT_ERROR",
            Self::RateLimited { .. } => "RATE_LIMIT_ERROR",
            Self::NotFound(_) => "NOT_FOUND_ERROR",
            Self::EmptyRange { .. } => "EMPTY_RANGE_ERROR",
            Self::Transient(_) => "TRANSIENT_ERROR",
            Self::Integrity(_) => "INTEGRITY_ERROR",
            Self::Immutable(_) => "IMMUTABLE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}
