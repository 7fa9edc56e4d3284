//! Job - unit of work in the durable queue
//!
//! # State machine
//!
//! ```text
//! PENDING ──claim──→ RUNNING ──done──→ DONE
//!    ↑                  │
//!    └──reschedule──────┤
//!                       └──exhausted──→ dead-letter table (row removed)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::record::DateFilter;

/// Job type that drives bundle generation
pub const GENERATE_BUNDLE: &str = "GENERATE_BUNDLE";

/// Default retry budget for a job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }

    /// Check whether a state transition is permitted
    ///
    /// RUNNING → PENDING is the reschedule path. Administrative resets
    /// may also move a stuck RUNNING job back to PENDING.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, target),
            (Pending, Running) | (Running, Done) | (Running, Pending) | (Pending, Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row in the live job table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    pub dedupe_key: Option<String>,
    pub status: JobStatus,
    /// Failed executions so far
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether another failure still leaves retry budget
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts.saturating_add(1) < self.max_attempts
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }

    /// `bundleId` carried in the payload, if any
    pub fn payload_bundle_id(&self) -> Option<&str> {
        self.payload.get("bundleId").and_then(Value::as_str)
    }
}

/// A row in the dead-letter table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterJob {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    pub dedupe_key: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

/// Options for an enqueue call
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub dedupe_key: Option<String>,
    pub run_at: Option<DateTime<Utc>>,
    pub max_attempts: u32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            dedupe_key: None,
            run_at: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl EnqueueOptions {
    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Result of an enqueue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    /// Id of the inserted row, `None` when the dedupe key already existed
    pub id: Option<Uuid>,
    pub inserted: bool,
}

/// Payload of a [`GENERATE_BUNDLE`] job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBundlePayload {
    pub bundle_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub date_filter: DateFilter,
}

/// Selects jobs for an administrative reset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelector {
    Id(Uuid),
    /// Matches the dedupe key or `payload.bundleId`
    BundleId(String),
}

/// Job counts by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub dead_letter: u64,
}
