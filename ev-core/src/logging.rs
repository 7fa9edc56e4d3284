//! Logging Standards and Conventions
//!
//! All crates log through `tracing` with structured fields. The binary
//! installs the subscriber; libraries never do.
//!
//! # Log Levels
//!
//! | Level | Usage | Examples |
//! |-------|-------|----------|
//! | ERROR | Integrity violations, dead-lettered jobs | Chain broken, DLQ move |
//! | WARN  | Recoverable issues | Job rescheduled, rate limit hit, append conflict |
//! | INFO  | State transitions | Record appended, bundle READY, job claimed |
//! | DEBUG | Operation flow | Range selection, cache hits |
//! | TRACE | Full payloads | Canonical JSON, manifest bodies |
//!
//! # Structured Logging Fields
//!
//! Use the names in [`fields`] so log queries work across crates:
//!
//! ```ignore
//! use tracing::{info, warn};
//!
//! info!(
//!     tenant_id = %tenant_id,
//!     bundle_id = %bundle_id,
//!     record_count = records.len(),
//!     "Bundle built"
//! );
//!
//! warn!(
//!     job_id = %job.id,
//!     attempts = job.attempts,
//!     error = %e,
//!     "Job rescheduled"
//! );
//! ```

use serde::{Deserialize, Serialize};
use tracing::Span;

/// Tracing targets of the workspace crates
pub const WORKSPACE_TARGETS: &[&str] = &[
    "ev_core",
    "ev_db",
    "ev_signer",
    "ev_bundle",
    "ev_verifier",
    "ev_cli",
    "evidence",
];

/// Log level enumeration matching tracing levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Parse from string, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset:
    /// workspace crates at this level, dependencies at warn
    pub fn directive(&self) -> String {
        let mut directive = WORKSPACE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.as_str()))
            .collect::<Vec<_>>();
        directive.push("warn".to_string());
        directive.join(",")
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Standard log field names
pub mod fields {
    pub const BUNDLE_ID: &str = "bundle_id";
    pub const JOB_ID: &str = "job_id";
    pub const JOB_TYPE: &str = "job_type";
    pub const TRANSACTION_ID: &str = "transaction_id";
    pub const PATH: &str = "path";
}

/// Operation names for span context
pub mod operations {
    pub const LEDGER_APPEND: &str = "ledger_append";
    pub const JOB_CLAIM: &str = "job_claim";
    pub const BUNDLE_BUILD: &str = "bundle_build";
    pub const OFFLINE_VERIFY: &str = "offline_verify";
    pub const CUSTODY_REPORT: &str = "custody_report";
}

/// Context for structured logging
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub request_id: Option<String>,
    pub tenant_id: Option<String>,
    pub operation: Option<String>,
    pub tags: Vec<(String, String)>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_tenant_id(mut self, id: impl Into<String>) -> Self {
        self.tenant_id = Some(id.into());
        self
    }

    pub fn with_operation(mut self, op: impl Into<String>) -> Self {
        self.operation = Some(op.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// INFO span carrying the context fields, for `Instrument::instrument`
    pub fn span(&self) -> Span {
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        tracing::info_span!(
            "ev",
            request_id = self.request_id.as_deref().unwrap_or("-"),
            tenant_id = self.tenant_id.as_deref().unwrap_or("-"),
            operation = self.operation.as_deref().unwrap_or("-"),
            tags = %tags,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("INFO"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("invalid"), None);
        let directive = LogLevel::Debug.directive();
        assert!(directive.starts_with("ev_core=debug,ev_db=debug,"));
        assert!(directive.contains("ev_cli=debug"));
        assert!(directive.ends_with(",warn"));
        assert!(!directive.contains("ev="));
    }

    #[test]
    fn test_log_context() {
        let ctx = LogContext::new()
            .with_request_id("req-123")
            .with_tenant_id("tenant-a")
            .with_operation(operations::BUNDLE_BUILD)
            .with_tag(fields::BUNDLE_ID, "bundle_1");

        assert_eq!(ctx.request_id.as_deref(), Some("req-123"));
        assert_eq!(ctx.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(ctx.operation.as_deref(), Some("bundle_build"));
        assert_eq!(ctx.tags.len(), 1);
        let _span = ctx.span();
    }
}
