//! Ledger service
//!
//! Appends decision records to a per-tenant hash chain and verifies it.
//!
//! Appends are optimistic: read the tail, compute the next record, insert.
//! The store's unique `(tenant_id, sequence)` constraint turns a lost race
//! into `Conflict`, which is retried a fixed number of times.

use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::idempotency::{is_valid_key, IdempotencyChecker};
use super::{AuditLog, SharedStore};
use ev_core::logging::{fields, operations, LogContext};
use ev_core::time::now_millis;
use ev_core::types::audit::{actions, resource_types};
use ev_core::{
    AppendRequest, AuditEvent, ChainVerification, DecisionRecord, EvidenceError, EvidenceResult,
    GENESIS_HASH,
};

/// Ledger service
#[derive(Clone)]
pub struct LedgerService {
    store: SharedStore,
    audit: AuditLog,
    append_retries: u32,
    idempotency: IdempotencyChecker,
}

impl LedgerService {
    pub fn new(store: SharedStore, append_retries: u32) -> Self {
        Self {
            audit: AuditLog::new(store.clone()),
            store: store.clone(),
            idempotency: IdempotencyChecker::new(store.clone()),
            append_retries,
        }
    }

    pub fn idempotency(&self) -> &IdempotencyChecker {
        &self.idempotency
    }

    /// Append a record to the tenant's chain
    pub async fn append(&self, request: AppendRequest) -> EvidenceResult<DecisionRecord> {
        request.validate()?;

        let span = LogContext::new()
            .with_operation(operations::LEDGER_APPEND)
            .with_tenant_id(request.tenant_id.clone())
            .with_tag(fields::TRANSACTION_ID, request.transaction_id.clone())
            .span();
        let record = self.append_with_retry(&request).instrument(span).await?;

        info!(
            tenant_id = %record.tenant_id,
            sequence = record.sequence,
            transaction_id = %record.transaction_id,
            "Record appended"
        );

        self.audit
            .record_after_commit(
                AuditEvent::new(
                    Some(&record.tenant_id),
                    actions::RECORD_CREATED,
                    resource_types::DECISION_RECORD,
                    Some(&record.id.to_string()),
                )
                .with_metadata(serde_json::json!({
                    "sequence": record.sequence,
                    "transactionId": record.transaction_id,
                })),
            )
            .await;

        Ok(record)
    }

    async fn append_with_retry(&self, request: &AppendRequest) -> EvidenceResult<DecisionRecord> {
        let mut attempt = 0;
        loop {
            match self.try_append(request).await {
                Ok(record) => return Ok(record),
                Err(EvidenceError::Conflict(reason)) if attempt < self.append_retries => {
                    attempt += 1;
                    warn!(
                        tenant_id = %request.tenant_id,
                        transaction_id = %request.transaction_id,
                        attempts = attempt,
                        reason = %reason,
                        "Chain tail moved during append, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_append(&self, request: &AppendRequest) -> EvidenceResult<DecisionRecord> {
        let tail = self.store.chain_tail(&request.tenant_id).await?;
        let (previous_hash, sequence) = match &tail {
            Some(t) => (t.record_hash, t.sequence + 1),
            None => (GENESIS_HASH, 1),
        };

        let timestamp = now_millis();
        let record_hash = DecisionRecord::compute_hash(
            &previous_hash,
            &request.input_hash,
            &request.output_hash,
            &request.context_hash,
            &request.transaction_id,
            &timestamp,
        )?;

        let record = DecisionRecord {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id.clone(),
            transaction_id: request.transaction_id.clone(),
            input_hash: request.input_hash,
            output_hash: request.output_hash,
            context_hash: request.context_hash,
            record_hash,
            previous_hash,
            timestamp,
            sequence,
        };
        self.store.insert_record(&record).await?;
        Ok(record)
    }

    /// Append with a caller-supplied idempotency key. A repeated key for the
    /// same tenant returns the first record without appending again.
    pub async fn append_idempotent(
        &self,
        request: AppendRequest,
        idempotency_key: &str,
    ) -> EvidenceResult<DecisionRecord> {
        if !is_valid_key(idempotency_key) {
            return Err(EvidenceError::validation(
                "Idempotency key must be a UUID v4 or 16-64 characters of [A-Za-z0-9_-]",
            ));
        }

        let tenant_id = request.tenant_id.clone();
        if let Some(existing) = self.idempotency.check(&tenant_id, idempotency_key).await? {
            debug!(tenant_id = %tenant_id, sequence = existing.sequence, "Idempotent replay");
            return Ok(existing);
        }

        let record = match self.append(request).await {
            Ok(record) => record,
            Err(e @ EvidenceError::Validation(_)) => {
                // A concurrent request with the same key may have won
                return match self.idempotency.check(&tenant_id, idempotency_key).await? {
                    Some(existing) => Ok(existing),
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        };
        self.idempotency
            .remember(&tenant_id, idempotency_key, &record)
            .await?;
        Ok(record)
    }

    /// Verify the chain segment `from_seq..=to_seq`
    ///
    /// The record just before `from_seq` anchors the linkage check of the
    /// first record in range. A missing sequence number followed by a
    /// present one is a break at the missing number, or at `from_seq` when
    /// the anchor is the one missing. Stops at the first failure.
    pub async fn verify_chain(
        &self,
        tenant_id: &str,
        from_seq: u64,
        to_seq: u64,
    ) -> EvidenceResult<ChainVerification> {
        let from_seq = from_seq.max(1);
        if to_seq < from_seq {
            return Ok(ChainVerification::valid(0));
        }

        let start = if from_seq > 1 { from_seq - 1 } else { 1 };
        let records = self.store.records_by_sequence(tenant_id, start, to_seq).await?;

        let mut expected_sequence = start;
        let mut previous: Option<&DecisionRecord> = None;
        let mut checked = 0u64;

        for record in &records {
            if record.sequence != expected_sequence {
                // A missing anchor breaks the first record in range
                return Ok(self.broken(
                    tenant_id,
                    expected_sequence.max(from_seq),
                    checked,
                    format!("record {} is missing", expected_sequence),
                ));
            }
            expected_sequence += 1;

            if record.sequence < from_seq {
                previous = Some(record);
                continue;
            }
            checked += 1;

            if !record.hash_matches()? {
                return Ok(self.broken(
                    tenant_id,
                    record.sequence,
                    checked,
                    "recordHash does not match the stored fields",
                ));
            }

            let expected_previous = match previous {
                Some(p) => p.record_hash,
                None => GENESIS_HASH,
            };
            if record.previous_hash != expected_previous {
                return Ok(self.broken(
                    tenant_id,
                    record.sequence,
                    checked,
                    "previousHash does not link to the preceding record",
                ));
            }

            previous = Some(record);
        }

        debug!(tenant_id, from_seq, to_seq, count = checked, "Chain segment verified");
        Ok(ChainVerification::valid(checked))
    }

    fn broken(
        &self,
        tenant_id: &str,
        at: u64,
        checked: u64,
        reason: impl Into<String>,
    ) -> ChainVerification {
        let reason = reason.into();
        error!(tenant_id, sequence = at, reason = %reason, "Chain verification failed");
        ChainVerification::broken(at, checked, reason)
    }

    /// Verify the tenant's whole chain
    pub async fn verify_tenant(&self, tenant_id: &str) -> EvidenceResult<ChainVerification> {
        match self.store.chain_tail(tenant_id).await? {
            Some(tail) => self.verify_chain(tenant_id, 1, tail.sequence).await,
            None => Ok(ChainVerification::valid(0)),
        }
    }

    pub async fn find_by_transaction(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> EvidenceResult<Option<DecisionRecord>> {
        self.store.find_by_transaction(tenant_id, transaction_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LedgerStore, MemoryStore};
    use ev_core::Sha256Digest;
    use std::sync::Arc;

    fn request(tenant: &str, tx: &str) -> AppendRequest {
        AppendRequest {
            tenant_id: tenant.to_string(),
            transaction_id: tx.to_string(),
            input_hash: Sha256Digest::hash(format!("in-{}", tx).as_bytes()),
            output_hash: Sha256Digest::hash(format!("out-{}", tx).as_bytes()),
            context_hash: Sha256Digest::hash(b"ctx"),
        }
    }

    async fn seeded(n: u64) -> (Arc<MemoryStore>, LedgerService) {
        let store = Arc::new(MemoryStore::new());
        let ledger = LedgerService::new(store.clone(), 3);
        for i in 1..=n {
            ledger.append(request("tenant-a", &format!("txn_{}", i))).await.unwrap();
        }
        (store, ledger)
    }

    #[tokio::test]
    async fn test_append_links_records() {
        let (store, ledger) = seeded(3).await;
        let records = store.records_by_sequence("tenant-a", 1, 3).await.unwrap();

        assert_eq!(records[0].previous_hash, GENESIS_HASH);
        assert_eq!(records[1].previous_hash, records[0].record_hash);
        assert_eq!(records[2].previous_hash, records[1].record_hash);
        assert!(ledger.verify_tenant("tenant-a").await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_duplicate_transaction_rejected() {
        let (_, ledger) = seeded(1).await;
        let err = ledger.append(request("tenant-a", "txn_1")).await.unwrap_err();
        assert!(matches!(err, EvidenceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_form_single_chain() {
        let store = Arc::new(MemoryStore::new());
        let ledger = LedgerService::new(store.clone(), 50);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.append(request("tenant-a", &format!("txn_{}", i))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let verification = ledger.verify_tenant("tenant-a").await.unwrap();
        assert!(verification.valid);
        assert_eq!(verification.records_checked, 8);
    }

    #[tokio::test]
    async fn test_tampering_detected_at_record() {
        let (store, ledger) = seeded(5).await;
        let mut records = store.records_by_sequence("tenant-a", 3, 3).await.unwrap();
        let mut tampered = records.remove(0);
        tampered.output_hash = Sha256Digest::hash(b"forged");
        store.overwrite_record(tampered).await.unwrap();

        let result = ledger.verify_chain("tenant-a", 1, 5).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.broken_at, Some(3));

        // Every range that includes the tampered record fails there
        let result = ledger.verify_chain("tenant-a", 3, 5).await.unwrap();
        assert_eq!(result.broken_at, Some(3));

        // Segments after it still verify on their own
        assert!(ledger.verify_chain("tenant-a", 4, 5).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_rewritten_hash_breaks_next_link() {
        let (store, ledger) = seeded(4).await;
        let mut tampered = store.records_by_sequence("tenant-a", 2, 2).await.unwrap().remove(0);
        tampered.context_hash = Sha256Digest::hash(b"forged");
        tampered.record_hash = tampered.expected_hash().unwrap();
        store.overwrite_record(tampered).await.unwrap();

        let result = ledger.verify_chain("tenant-a", 1, 4).await.unwrap();
        assert_eq!(result.broken_at, Some(3));
    }

    #[tokio::test]
    async fn test_missing_anchor_breaks_first_record_in_range() {
        let (store, ledger) = seeded(5).await;
        store.remove_record("tenant-a", 2).await;

        let result = ledger.verify_chain("tenant-a", 3, 5).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.broken_at, Some(3));
        assert_eq!(result.records_checked, 0);

        let result = ledger.verify_chain("tenant-a", 1, 5).await.unwrap();
        assert_eq!(result.broken_at, Some(2));
    }

    #[tokio::test]
    async fn test_empty_range_is_valid() {
        let (_, ledger) = seeded(2).await;
        let result = ledger.verify_chain("tenant-a", 10, 20).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.records_checked, 0);
        assert!(ledger.verify_tenant("unknown").await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_idempotent_append_replays() {
        let (_, ledger) = seeded(0).await;
        let key = Uuid::new_v4().to_string();

        let first = ledger.append_idempotent(request("tenant-a", "txn_1"), &key).await.unwrap();
        let second = ledger.append_idempotent(request("tenant-a", "txn_1"), &key).await.unwrap();
        assert_eq!(first, second);

        // A separate service over the same store replays as well
        let restarted = LedgerService::new(ledger.store.clone(), 3);
        let third = restarted
            .append_idempotent(request("tenant-a", "txn_1"), &key)
            .await
            .unwrap();
        assert_eq!(third, first);
        assert!(restarted.verify_tenant("tenant-a").await.unwrap().valid);
        assert_eq!(restarted.verify_tenant("tenant-a").await.unwrap().records_checked, 1);

        let err = ledger
            .append_idempotent(request("tenant-a", "txn_2"), "bad key")
            .await
            .unwrap_err();
        assert!(matches!(err, EvidenceError::Validation(_)));
    }
}
