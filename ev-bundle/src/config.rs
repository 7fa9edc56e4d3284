//! Worker and bundle configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use ev_core::GENERATE_BUNDLE;

/// Bundle worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Idle delay between polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Only claim jobs of this type; `None` claims any type
    #[serde(default = "default_job_type")]
    pub job_type: Option<String>,
    /// Jobs drained per tick before sleeping again
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// PROCESSING longer than this may be reprocessed
    #[serde(default = "default_stale_minutes")]
    pub stale_minutes: i64,
    /// Bundle requests allowed per tenant per window
    #[serde(default = "default_bundle_rate_limit")]
    pub bundle_rate_limit: u32,
    #[serde(default = "default_bundle_rate_window_secs")]
    pub bundle_rate_window_secs: u64,
    /// Downloads allowed per tenant per day
    #[serde(default = "default_download_rate_limit")]
    pub download_rate_limit: u32,
    /// Days until a READY bundle's artifacts expire
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Lifetime of presigned download links
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: i64,
    /// Local storage root for bundle artifacts
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_job_type() -> Option<String> {
    Some(GENERATE_BUNDLE.to_string())
}

fn default_batch_size() -> usize {
    10
}

fn default_stale_minutes() -> i64 {
    15
}

fn default_bundle_rate_limit() -> u32 {
    10
}

fn default_bundle_rate_window_secs() -> u64 {
    3600
}

fn default_download_rate_limit() -> u32 {
    50
}

fn default_retention_days() -> i64 {
    90
}

fn default_presign_ttl_secs() -> i64 {
    3600
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./evidence-data")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            job_type: default_job_type(),
            batch_size: default_batch_size(),
            stale_minutes: default_stale_minutes(),
            bundle_rate_limit: default_bundle_rate_limit(),
            bundle_rate_window_secs: default_bundle_rate_window_secs(),
            download_rate_limit: default_download_rate_limit(),
            retention_days: default_retention_days(),
            presign_ttl_secs: default_presign_ttl_secs(),
            storage_root: default_storage_root(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    ///
    /// - EV_WORKER_POLL_MS: Poll interval (5000)
    /// - EV_WORKER_JOB_TYPE: Job type filter, `*` for any (GENERATE_BUNDLE)
    /// - EV_WORKER_BATCH_SIZE: Jobs per tick (10)
    /// - EV_BUNDLE_STUCK_MINUTES: Stale PROCESSING threshold (15)
    /// - EV_BUNDLE_RATE_LIMIT: Bundle requests per tenant per hour (10)
    /// - EV_BUNDLE_DOWNLOAD_LIMIT: Downloads per tenant per day (50)
    /// - EV_BUNDLE_RETENTION_DAYS: Artifact retention (90)
    /// - EV_BUNDLE_PRESIGN_TTL_SECS: Download link lifetime (3600)
    /// - EV_WORKER_STORAGE_ROOT: Local storage root (./evidence-data)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_ms: env::var("EV_WORKER_POLL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.poll_interval_ms),
            job_type: match env::var("EV_WORKER_JOB_TYPE") {
                Ok(t) if t == "*" => None,
                Ok(t) if !t.is_empty() => Some(t),
                _ => defaults.job_type,
            },
            batch_size: env::var("EV_WORKER_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
            stale_minutes: env::var("EV_BUNDLE_STUCK_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stale_minutes),
            bundle_rate_limit: env::var("EV_BUNDLE_RATE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bundle_rate_limit),
            bundle_rate_window_secs: defaults.bundle_rate_window_secs,
            download_rate_limit: env::var("EV_BUNDLE_DOWNLOAD_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.download_rate_limit),
            retention_days: env::var("EV_BUNDLE_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retention_days),
            presign_ttl_secs: env::var("EV_BUNDLE_PRESIGN_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.presign_ttl_secs),
            storage_root: env::var("EV_WORKER_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
        }
    }

    /// Fast polling, short stale threshold
    pub fn development() -> Self {
        Self {
            poll_interval_ms: 500,
            stale_minutes: 1,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_minutes)
    }

    pub fn bundle_rate_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.bundle_rate_window_secs.min(i64::MAX as u64) as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn presign_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.presign_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval().as_millis(), 5000);
        assert_eq!(config.job_type.as_deref(), Some("GENERATE_BUNDLE"));
        assert_eq!(config.stale_threshold().num_minutes(), 15);
        assert_eq!(config.bundle_rate_limit, 10);
        assert_eq!(config.retention().num_days(), 90);
    }

    #[test]
    fn test_serde_fills_defaults() {
        let config: WorkerConfig = serde_json::from_str(r#"{"stale_minutes": 30}"#).unwrap();
        assert_eq!(config.stale_minutes, 30);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.storage_root, PathBuf::from("./evidence-data"));
    }
}
