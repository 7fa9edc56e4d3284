//! Storage and queue configuration

use serde::{Deserialize, Serialize};
use std::env;

use ev_core::DEFAULT_MAX_ATTEMPTS;

use crate::retry::BackoffPolicy;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Job queue and ledger append configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry budget for jobs enqueued without an explicit one
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Backoff is `base^attempts` units
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
    #[serde(default = "default_backoff_unit_secs")]
    pub backoff_unit_secs: u64,
    /// Upper bound on stored `lastError` text, in characters
    #[serde(default = "default_max_error_len")]
    pub max_error_len: usize,
    /// Retries of a ledger append that lost the tail race
    #[serde(default = "default_append_retries")]
    pub append_retries: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base() -> u32 {
    3
}

fn default_backoff_unit_secs() -> u64 {
    60
}

fn default_max_error_len() -> usize {
    2000
}

fn default_append_retries() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff_unit_secs: default_backoff_unit_secs(),
            max_error_len: default_max_error_len(),
            append_retries: default_append_retries(),
        }
    }
}

impl QueueConfig {
    /// Load configuration from environment variables
    ///
    /// - EV_QUEUE_MAX_ATTEMPTS: Default retry budget (5)
    /// - EV_QUEUE_BACKOFF_BASE: Exponential base (3)
    /// - EV_QUEUE_BACKOFF_UNIT_SECS: Length of one backoff unit (60)
    /// - EV_QUEUE_MAX_ERROR_LEN: Stored error truncation (2000)
    /// - EV_QUEUE_APPEND_RETRIES: Ledger conflict retries (3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_max_attempts: env_parse("EV_QUEUE_MAX_ATTEMPTS")
                .unwrap_or(defaults.default_max_attempts),
            backoff_base: env_parse("EV_QUEUE_BACKOFF_BASE").unwrap_or(defaults.backoff_base),
            backoff_unit_secs: env_parse("EV_QUEUE_BACKOFF_UNIT_SECS")
                .unwrap_or(defaults.backoff_unit_secs),
            max_error_len: env_parse("EV_QUEUE_MAX_ERROR_LEN").unwrap_or(defaults.max_error_len),
            append_retries: env_parse("EV_QUEUE_APPEND_RETRIES")
                .unwrap_or(defaults.append_retries),
        }
    }

    /// Short backoff for local runs: one-second units, two attempts
    pub fn development() -> Self {
        Self {
            default_max_attempts: 2,
            backoff_unit_secs: 1,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::Exponential {
            base: self.backoff_base,
            unit_secs: self.backoff_unit_secs,
        }
    }
}

/// Back end selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// PostgreSQL URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl StoreConfig {
    /// Load configuration from environment variables
    ///
    /// - DATABASE_URL: PostgreSQL connection string
    /// - EV_DB_MAX_CONNECTIONS: Pool size (10)
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            max_connections: env_parse("EV_DB_MAX_CONNECTIONS")
                .unwrap_or_else(default_max_connections),
        }
    }

    pub fn development() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
        }
    }

    pub fn is_postgres(&self) -> bool {
        self.database_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.default_max_attempts, 5);
        assert_eq!(config.max_error_len, 2000);
        assert_eq!(config.backoff().delay_for_attempt(2), Duration::from_secs(9 * 60));
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: QueueConfig = serde_json::from_str(r#"{"backoff_base": 2}"#).unwrap();
        assert_eq!(config.backoff_base, 2);
        assert_eq!(config.append_retries, 3);
    }

    #[test]
    fn test_store_config_development_is_memory() {
        assert!(!StoreConfig::development().is_postgres());
        assert_eq!(StoreConfig::default().max_connections, 10);
    }
}
