//! AuditEvent - append-only access and administration log
//!
//! The same log feeds rate limiting (counts of successful actions in a
//! trailing window) and custody reconstruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Audit action names
pub mod actions {
    pub const RECORD_CREATED: &str = "RECORD_CREATED";

    pub const BUNDLE_CREATE: &str = "BUNDLE_CREATE";
    pub const BUNDLE_PROCESS: &str = "BUNDLE_PROCESS";
    pub const BUNDLE_REPROCESS: &str = "BUNDLE_REPROCESS";
    pub const BUNDLE_VIEWED: &str = "BUNDLE_VIEWED";
    pub const BUNDLE_DOWNLOADED: &str = "BUNDLE_DOWNLOADED";
    pub const BUNDLE_SENT_TO_REGULATOR: &str = "BUNDLE_SENT_TO_REGULATOR";
    pub const BUNDLE_CLEANUP: &str = "BUNDLE_CLEANUP";

    pub const HASH_SIGNED: &str = "HASH_SIGNED";
    pub const SIGN_REJECTED: &str = "SIGN_REJECTED";
    pub const SIGN_RATE_LIMITED: &str = "SIGN_RATE_LIMITED";
    pub const SIGN_KMS_ERROR: &str = "SIGN_KMS_ERROR";
}

/// Resource type names
pub mod resource_types {
    pub const DECISION_RECORD: &str = "DECISION_RECORD";
    pub const EVIDENCE_BUNDLE: &str = "EVIDENCE_BUNDLE";
}

/// Outcome of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    #[default]
    Success,
    Failed,
    Denied,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Denied => "DENIED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "DENIED" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// New SUCCESS event stamped now
    pub fn new(
        tenant_id: Option<&str>,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.map(str::to_string),
            user_id: None,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            metadata: Value::Object(Default::default()),
            ip_address: None,
            user_agent: None,
            status: AuditStatus::Success,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(str::to_string);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_client(mut self, ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip_address.map(str::to_string);
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn denied(mut self, message: impl Into<String>) -> Self {
        self.status = AuditStatus::Denied;
        self.error_message = Some(message.into());
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = AuditStatus::Failed;
        self.error_message = Some(message.into());
        self
    }

    /// String field from the metadata object
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let event = AuditEvent::new(
            Some("tenant-a"),
            actions::SIGN_RATE_LIMITED,
            resource_types::EVIDENCE_BUNDLE,
            Some("bundle_1"),
        )
        .with_user(Some("ops@example.com"))
        .with_metadata(json!({ "limit": 10, "purpose": "audit" }))
        .denied("Rate limit exceeded");

        assert_eq!(event.status, AuditStatus::Denied);
        assert_eq!(event.metadata_str("purpose"), Some("audit"));
        assert_eq!(event.error_message.as_deref(), Some("Rate limit exceeded"));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(AuditStatus::parse("DENIED"), Some(AuditStatus::Denied));
        assert_eq!(AuditStatus::parse("denied"), None);
    }
}
