//! Aggregate hash
//!
//! The single value a bundle is signed and verified by:
//!
//! ```text
//! sha256(canonical({
//!     "metadata": { "tenantId", "dateFrom", "dateTo", "recordCount" },
//!     "recordHashes": [ "sha256:<hex>", ... ]   // ascending sequence
//! }))
//! ```
//!
//! Dates are ISO-8601 with milliseconds, or `null` for an open bound.

use serde::{Deserialize, Serialize};

use ev_core::{hash_object, EvidenceResult, Sha256Digest};

/// Bundle metadata bound into the aggregate hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub tenant_id: String,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub record_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateInput<'a> {
    metadata: &'a BundleMetadata,
    record_hashes: Vec<String>,
}

/// Compute the aggregate hash. `records` are `(sequence, recordHash)` pairs
/// in any order.
pub fn aggregate_hash(
    metadata: &BundleMetadata,
    records: &[(u64, Sha256Digest)],
) -> EvidenceResult<Sha256Digest> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|(sequence, _)| *sequence);
    hash_object(&AggregateInput {
        metadata,
        record_hashes: sorted.iter().map(|(_, h)| h.to_prefixed()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ev_core::canonical_json;
    use serde_json::json;

    fn metadata(count: u64) -> BundleMetadata {
        BundleMetadata {
            tenant_id: "tenant-a".to_string(),
            date_from: Some("2024-01-01T00:00:00.000Z".to_string()),
            date_to: None,
            record_count: count,
        }
    }

    #[test]
    fn test_matches_documented_layout() {
        let h1 = Sha256Digest::hash(b"1");
        let h2 = Sha256Digest::hash(b"2");
        let h3 = Sha256Digest::hash(b"3");

        let expected = Sha256Digest::hash(
            canonical_json(&json!({
                "metadata": {
                    "tenantId": "tenant-a",
                    "dateFrom": "2024-01-01T00:00:00.000Z",
                    "dateTo": null,
                    "recordCount": 3
                },
                "recordHashes": [h1.to_prefixed(), h2.to_prefixed(), h3.to_prefixed()]
            }))
            .as_bytes(),
        );

        let actual = aggregate_hash(&metadata(3), &[(1, h1), (2, h2), (3, h3)]).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_sequence_order_not_input_order() {
        let h1 = Sha256Digest::hash(b"1");
        let h2 = Sha256Digest::hash(b"2");
        let a = aggregate_hash(&metadata(2), &[(1, h1), (2, h2)]).unwrap();
        let b = aggregate_hash(&metadata(2), &[(2, h2), (1, h1)]).unwrap();
        assert_eq!(a, b);

        // Swapping which sequence owns which hash changes the result
        let c = aggregate_hash(&metadata(2), &[(1, h2), (2, h1)]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_metadata_is_bound() {
        let h1 = Sha256Digest::hash(b"1");
        let a = aggregate_hash(&metadata(1), &[(1, h1)]).unwrap();
        let b = aggregate_hash(&metadata(2), &[(1, h1)]).unwrap();
        let mut other_tenant = metadata(1);
        other_tenant.tenant_id = "tenant-b".to_string();
        let c = aggregate_hash(&other_tenant, &[(1, h1)]).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
