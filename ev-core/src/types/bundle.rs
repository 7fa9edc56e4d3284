//! EvidenceBundle - a portable, verifiable export of a record range
//!
//! # State machine
//!
//! ```text
//! PENDING ──→ PROCESSING ──→ READY (immutable)
//!                 │   ↑
//!                 ↓   │
//!               FAILED
//! ```
//!
//! Once READY, only the access timestamp may change.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::DateFilter;
use crate::digest::Sha256Digest;

/// Bundle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    Failed,
}

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "READY" => Some(Self::Ready),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check whether a state transition is permitted
    ///
    /// PROCESSING → PROCESSING covers a worker re-claiming a job whose
    /// previous holder crashed mid-build.
    pub fn can_transition_to(&self, target: BundleStatus) -> bool {
        use BundleStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }

    pub fn is_immutable(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of each record the bundle discloses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisclosureLevel {
    /// Sequence, record hash and timestamp only
    #[default]
    HashesOnly,
    /// Adds the full hash tuple of every record
    Full,
}

impl DisclosureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashesOnly => "HASHES_ONLY",
            Self::Full => "FULL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "HASHES_ONLY" | "HASHES" => Some(Self::HashesOnly),
            "FULL" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Detached signature over a bundle's aggregate hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSignature {
    pub key_id: String,
    pub algorithm: String,
    /// Base64 signature over the 32 raw aggregate-hash bytes
    pub value: String,
    pub public_key_fingerprint: String,
    pub signed_at: DateTime<Utc>,
}

/// Evidence bundle row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceBundle {
    pub id: Uuid,
    /// External identifier, `bundle_<32 hex>`
    pub bundle_id: String,
    pub tenant_id: String,
    pub status: BundleStatus,
    pub record_count: u64,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub purpose: Option<String>,
    pub created_by: Option<String>,
    pub disclosure: DisclosureLevel,
    pub storage_key: Option<String>,
    pub bundle_hash: Option<Sha256Digest>,
    pub manifest_hash: Option<Sha256Digest>,
    pub signature: Option<BundleSignature>,
    /// Ledger segment covered by the bundle
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub error_message: Option<String>,
    pub legal_hold: bool,
    pub retention_until: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub accessed_at: Option<DateTime<Utc>>,
}

impl EvidenceBundle {
    /// New PENDING bundle
    pub fn new_pending(
        bundle_id: impl Into<String>,
        tenant_id: impl Into<String>,
        date_filter: &DateFilter,
        record_count: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bundle_id: bundle_id.into(),
            tenant_id: tenant_id.into(),
            status: BundleStatus::Pending,
            record_count,
            date_from: date_filter.gte,
            date_to: date_filter.lte,
            purpose: None,
            created_by: None,
            disclosure: DisclosureLevel::HashesOnly,
            storage_key: None,
            bundle_hash: None,
            manifest_hash: None,
            signature: None,
            first_sequence: None,
            last_sequence: None,
            error_message: None,
            legal_hold: false,
            retention_until: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            accessed_at: None,
        }
    }

    pub fn date_filter(&self) -> DateFilter {
        DateFilter::new(self.date_from, self.date_to)
    }

    /// PROCESSING for longer than the threshold
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == BundleStatus::Processing && now - self.updated_at >= threshold
    }

    /// Eligible for retention cleanup
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == BundleStatus::Ready
            && !self.legal_hold
            && self.expires_at.map_or(false, |at| at < now)
            && self.retention_until.map_or(true, |until| until < now)
    }
}

/// Fields written by the READY transition
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyUpdate {
    pub storage_key: String,
    pub bundle_hash: Sha256Digest,
    pub manifest_hash: Sha256Digest,
    pub signature: Option<BundleSignature>,
    pub record_count: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_is_terminal() {
        for target in [
            BundleStatus::Pending,
            BundleStatus::Processing,
            BundleStatus::Ready,
            BundleStatus::Failed,
        ] {
            assert!(!BundleStatus::Ready.can_transition_to(target));
        }
        assert!(BundleStatus::Failed.can_transition_to(BundleStatus::Processing));
        assert!(!BundleStatus::Pending.can_transition_to(BundleStatus::Ready));
    }

    #[test]
    fn test_staleness() {
        let mut bundle = EvidenceBundle::new_pending("bundle_1", "tenant-a", &DateFilter::default(), 3);
        let now = Utc::now();
        bundle.status = BundleStatus::Processing;
        bundle.updated_at = now - Duration::minutes(20);
        assert!(bundle.is_stale(now, Duration::minutes(15)));
        assert!(!bundle.is_stale(now, Duration::minutes(30)));

        bundle.status = BundleStatus::Failed;
        assert!(!bundle.is_stale(now, Duration::minutes(15)));
    }

    #[test]
    fn test_expiry_respects_legal_hold_and_retention() {
        let now = Utc::now();
        let mut bundle = EvidenceBundle::new_pending("bundle_1", "tenant-a", &DateFilter::default(), 1);
        bundle.status = BundleStatus::Ready;
        bundle.expires_at = Some(now - Duration::days(1));
        assert!(bundle.is_expired(now));

        bundle.legal_hold = true;
        assert!(!bundle.is_expired(now));

        bundle.legal_hold = false;
        bundle.retention_until = Some(now + Duration::days(30));
        assert!(!bundle.is_expired(now));
    }

    #[test]
    fn test_disclosure_parse() {
        assert_eq!(DisclosureLevel::parse("full"), Some(DisclosureLevel::Full));
        assert_eq!(DisclosureLevel::parse("HASHES_ONLY"), Some(DisclosureLevel::HashesOnly));
        assert_eq!(DisclosureLevel::parse("raw"), None);
    }
}
