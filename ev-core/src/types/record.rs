//! DecisionRecord - one immutable, hash-linked ledger entry
//!
//! ```text
//! recordHash = SHA-256(canonical({
//!     contextHash, inputHash, outputHash,
//!     previousHash, timestamp, transactionId
//! }))
//! ```
//!
//! The first record of every tenant links to [`GENESIS_HASH`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canon::hash_object;
use crate::digest::Sha256Digest;
use crate::error::{EvidenceError, EvidenceResult};
use crate::time::to_iso;

/// Previous-hash value of the first record in every tenant chain
pub const GENESIS_HASH: Sha256Digest = Sha256Digest([0u8; 32]);

/// Minimum tenant identifier length accepted at the API boundary
pub const MIN_TENANT_ID_LEN: usize = 3;

/// Decision record stored in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub id: Uuid,
    pub tenant_id: String,
    /// Caller-supplied, unique per tenant
    pub transaction_id: String,
    pub input_hash: Sha256Digest,
    pub output_hash: Sha256Digest,
    pub context_hash: Sha256Digest,
    pub record_hash: Sha256Digest,
    pub previous_hash: Sha256Digest,
    pub timestamp: DateTime<Utc>,
    /// Monotonic per tenant, starting at 1
    pub sequence: u64,
}

/// Fields covered by the record hash
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordHashInput<'a> {
    context_hash: String,
    input_hash: String,
    output_hash: String,
    previous_hash: String,
    timestamp: String,
    transaction_id: &'a str,
}

impl DecisionRecord {
    /// Compute the chained hash for a set of record fields
    pub fn compute_hash(
        previous_hash: &Sha256Digest,
        input_hash: &Sha256Digest,
        output_hash: &Sha256Digest,
        context_hash: &Sha256Digest,
        transaction_id: &str,
        timestamp: &DateTime<Utc>,
    ) -> EvidenceResult<Sha256Digest> {
        hash_object(&RecordHashInput {
            context_hash: context_hash.to_prefixed(),
            input_hash: input_hash.to_prefixed(),
            output_hash: output_hash.to_prefixed(),
            previous_hash: previous_hash.to_prefixed(),
            timestamp: to_iso(timestamp),
            transaction_id,
        })
    }

    /// Recompute the hash from the stored fields
    pub fn expected_hash(&self) -> EvidenceResult<Sha256Digest> {
        Self::compute_hash(
            &self.previous_hash,
            &self.input_hash,
            &self.output_hash,
            &self.context_hash,
            &self.transaction_id,
            &self.timestamp,
        )
    }

    /// Whether the stored hash matches the stored fields
    pub fn hash_matches(&self) -> EvidenceResult<bool> {
        Ok(self.expected_hash()? == self.record_hash)
    }
}

/// Input to a ledger append
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub tenant_id: String,
    pub transaction_id: String,
    pub input_hash: Sha256Digest,
    pub output_hash: Sha256Digest,
    pub context_hash: Sha256Digest,
}

impl AppendRequest {
    /// Build a request from string digests, rejecting malformed hashes
    pub fn parse(
        tenant_id: impl Into<String>,
        transaction_id: impl Into<String>,
        input_hash: &str,
        output_hash: &str,
        context_hash: &str,
    ) -> EvidenceResult<Self> {
        let parse = |name: &str, value: &str| {
            Sha256Digest::parse(value)
                .map_err(|e| EvidenceError::validation(format!("{}: {}", name, e)))
        };
        let req = Self {
            tenant_id: tenant_id.into(),
            transaction_id: transaction_id.into(),
            input_hash: parse("inputHash", input_hash)?,
            output_hash: parse("outputHash", output_hash)?,
            context_hash: parse("contextHash", context_hash)?,
        };
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> EvidenceResult<()> {
        if self.tenant_id.trim().len() < MIN_TENANT_ID_LEN {
            return Err(EvidenceError::validation(format!(
                "tenantId must be at least {} characters",
                MIN_TENANT_ID_LEN
            )));
        }
        if self.transaction_id.trim().is_empty() {
            return Err(EvidenceError::validation("transactionId is required"));
        }
        Ok(())
    }
}

/// Inclusive timestamp range for record selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<DateTime<Utc>>,
}

impl DateFilter {
    pub fn new(gte: Option<DateTime<Utc>>, lte: Option<DateTime<Utc>>) -> Self {
        Self { gte, lte }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.gte.map_or(true, |from| *ts >= from) && self.lte.map_or(true, |to| *ts <= to)
    }

    pub fn validate(&self) -> EvidenceResult<()> {
        if let (Some(from), Some(to)) = (self.gte, self.lte) {
            if from > to {
                return Err(EvidenceError::validation(format!(
                    "dateFrom {} is after dateTo {}",
                    to_iso(&from),
                    to_iso(&to)
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of a chain verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    /// Sequence of the first record failing verification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    pub records_checked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChainVerification {
    pub fn valid(records_checked: u64) -> Self {
        Self {
            valid: true,
            broken_at: None,
            records_checked,
            reason: None,
        }
    }

    pub fn broken(at: u64, records_checked: u64, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            broken_at: Some(at),
            records_checked,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> DecisionRecord {
        let input = Sha256Digest::hash(b"input");
        let output = Sha256Digest::hash(b"output");
        let context = Sha256Digest::hash(b"context");
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        let hash =
            DecisionRecord::compute_hash(&GENESIS_HASH, &input, &output, &context, "txn_1", &ts)
                .unwrap();
        DecisionRecord {
            id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            transaction_id: "txn_1".to_string(),
            input_hash: input,
            output_hash: output,
            context_hash: context,
            record_hash: hash,
            previous_hash: GENESIS_HASH,
            timestamp: ts,
            sequence: 1,
        }
    }

    #[test]
    fn test_hash_matches_stored_fields() {
        let record = sample();
        assert!(record.hash_matches().unwrap());
    }

    #[test]
    fn test_any_field_change_alters_hash() {
        let record = sample();

        let mut tampered = record.clone();
        tampered.transaction_id = "txn_2".to_string();
        assert!(!tampered.hash_matches().unwrap());

        let mut tampered = record.clone();
        tampered.timestamp = tampered.timestamp + chrono::Duration::milliseconds(1);
        assert!(!tampered.hash_matches().unwrap());

        let mut tampered = record;
        tampered.previous_hash = Sha256Digest::hash(b"other");
        assert!(!tampered.hash_matches().unwrap());
    }

    #[test]
    fn test_append_request_rejects_bad_hash() {
        let good = Sha256Digest::hash(b"x").to_prefixed();
        let err = AppendRequest::parse("tenant-a", "txn", "nothex", &good, &good).unwrap_err();
        assert!(matches!(err, EvidenceError::Validation(_)));

        let err = AppendRequest::parse("ab", "txn", &good, &good, &good).unwrap_err();
        assert!(matches!(err, EvidenceError::Validation(_)));
    }

    #[test]
    fn test_date_filter() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let filter = DateFilter::new(Some(from), Some(to));
        assert!(filter.contains(&from));
        assert!(filter.contains(&to));
        assert!(!filter.contains(&(to + chrono::Duration::seconds(1))));
        assert!(DateFilter::new(Some(to), Some(from)).validate().is_err());
        assert!(DateFilter::default().contains(&from));
    }
}
