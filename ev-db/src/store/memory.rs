//! In-memory store
//!
//! Thread-safe store for tests and development. Each table sits behind its
//! own RwLock; operations that must be atomic (claim, dead-letter move,
//! append) hold the relevant write lock for their whole duration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuditStore, BundleStatusCounts, BundleStore, JobStore, LedgerStore};
use ev_core::{
    AuditEvent, AuditStatus, BundleStatus, DateFilter, DeadLetterJob, DecisionRecord,
    EnqueueOptions, EnqueueOutcome, EvidenceBundle, EvidenceError, EvidenceResult, Job,
    JobSelector, JobStatus, QueueCounts, ReadyUpdate,
};

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Per-tenant chains, kept sorted by sequence
    records: Arc<RwLock<HashMap<String, Vec<DecisionRecord>>>>,
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    dead_letters: Arc<RwLock<Vec<DeadLetterJob>>>,
    bundles: Arc<RwLock<HashMap<Uuid, EvidenceBundle>>>,
    audit: Arc<RwLock<Vec<AuditEvent>>>,
    /// `(tenant, key)` to the bound record id and when it was saved
    idempotency_keys: Arc<RwLock<HashMap<(String, String), (Uuid, DateTime<Utc>)>>>,
    job_updates_fail: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a stored record in place. Test hook for tamper scenarios.
    pub async fn overwrite_record(&self, record: DecisionRecord) -> EvidenceResult<()> {
        let mut records = self.records.write().await;
        let chain = records
            .get_mut(&record.tenant_id)
            .ok_or_else(|| EvidenceError::not_found(format!("tenant {}", record.tenant_id)))?;
        let slot = chain
            .iter_mut()
            .find(|r| r.sequence == record.sequence)
            .ok_or_else(|| EvidenceError::not_found(format!("sequence {}", record.sequence)))?;
        *slot = record;
        Ok(())
    }

    /// Replace a stored bundle row. Test hook for backdating and tampering.
    pub async fn overwrite_bundle(&self, bundle: EvidenceBundle) {
        self.bundles.write().await.insert(bundle.id, bundle);
    }

    /// Make `mark_done`, `reschedule` and dead-letter moves fail as if the
    /// database dropped. Test hook for queue outages mid-job.
    pub fn fail_job_updates(&self, fail: bool) {
        self.job_updates_fail.store(fail, Ordering::SeqCst);
    }

    fn check_job_updates(&self) -> EvidenceResult<()> {
        if self.job_updates_fail.load(Ordering::SeqCst) {
            return Err(EvidenceError::transient("job table unavailable"));
        }
        Ok(())
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.read().await.clone()
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
        self.jobs.write().await.clear();
        self.dead_letters.write().await.clear();
        self.bundles.write().await.clear();
        self.audit.write().await.clear();
        self.idempotency_keys.write().await.clear();
    }

    /// Drop one record from a chain. Test hook for gap scenarios.
    pub async fn remove_record(&self, tenant_id: &str, sequence: u64) {
        if let Some(chain) = self.records.write().await.get_mut(tenant_id) {
            chain.retain(|r| r.sequence != sequence);
        }
    }

    fn transition(bundle: &mut EvidenceBundle, target: BundleStatus) -> EvidenceResult<()> {
        if bundle.status.is_immutable() {
            return Err(EvidenceError::Immutable(format!(
                "bundle {} is READY",
                bundle.bundle_id
            )));
        }
        if !bundle.status.can_transition_to(target) {
            return Err(EvidenceError::conflict(format!(
                "bundle {} cannot move from {} to {}",
                bundle.bundle_id, bundle.status, target
            )));
        }
        bundle.status = target;
        bundle.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn chain_tail(&self, tenant_id: &str) -> EvidenceResult<Option<DecisionRecord>> {
        let records = self.records.read().await;
        Ok(records.get(tenant_id).and_then(|chain| chain.last().cloned()))
    }

    async fn insert_record(&self, record: &DecisionRecord) -> EvidenceResult<()> {
        let mut records = self.records.write().await;
        let chain = records.entry(record.tenant_id.clone()).or_default();

        if chain.iter().any(|r| r.transaction_id == record.transaction_id) {
            return Err(EvidenceError::validation(format!(
                "transactionId {} already recorded for tenant {}",
                record.transaction_id, record.tenant_id
            )));
        }
        if chain.iter().any(|r| r.sequence == record.sequence) {
            return Err(EvidenceError::conflict(format!(
                "sequence {} already taken for tenant {}",
                record.sequence, record.tenant_id
            )));
        }

        let pos = chain.partition_point(|r| r.sequence < record.sequence);
        chain.insert(pos, record.clone());
        Ok(())
    }

    async fn records_by_sequence(
        &self,
        tenant_id: &str,
        from_seq: u64,
        to_seq: u64,
    ) -> EvidenceResult<Vec<DecisionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(tenant_id)
            .map(|chain| {
                chain
                    .iter()
                    .filter(|r| r.sequence >= from_seq && r.sequence <= to_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn records_in_range(
        &self,
        tenant_id: &str,
        filter: &DateFilter,
    ) -> EvidenceResult<Vec<DecisionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(tenant_id)
            .map(|chain| {
                chain
                    .iter()
                    .filter(|r| filter.contains(&r.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_in_range(&self, tenant_id: &str, filter: &DateFilter) -> EvidenceResult<u64> {
        let records = self.records.read().await;
        Ok(records
            .get(tenant_id)
            .map(|chain| chain.iter().filter(|r| filter.contains(&r.timestamp)).count() as u64)
            .unwrap_or(0))
    }

    async fn find_by_transaction(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> EvidenceResult<Option<DecisionRecord>> {
        let records = self.records.read().await;
        Ok(records.get(tenant_id).and_then(|chain| {
            chain
                .iter()
                .find(|r| r.transaction_id == transaction_id)
                .cloned()
        }))
    }

    async fn save_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
        record_id: Uuid,
        at: DateTime<Utc>,
    ) -> EvidenceResult<()> {
        self.idempotency_keys
            .write()
            .await
            .insert((tenant_id.to_string(), key.to_string()), (record_id, at));
        Ok(())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> EvidenceResult<Option<DecisionRecord>> {
        let bound = self
            .idempotency_keys
            .read()
            .await
            .get(&(tenant_id.to_string(), key.to_string()))
            .copied();
        let Some((record_id, _)) = bound.filter(|(_, at)| *at >= since) else {
            return Ok(None);
        };
        let records = self.records.read().await;
        Ok(records
            .get(tenant_id)
            .and_then(|chain| chain.iter().find(|r| r.id == record_id).cloned()))
    }

    async fn prune_idempotency_keys(&self, older_than: DateTime<Utc>) -> EvidenceResult<u64> {
        let mut keys = self.idempotency_keys.write().await;
        let before = keys.len();
        keys.retain(|_, (_, at)| *at >= older_than);
        Ok((before - keys.len()) as u64)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(
        &self,
        job_type: &str,
        payload: Value,
        options: &EnqueueOptions,
    ) -> EvidenceResult<EnqueueOutcome> {
        let mut jobs = self.jobs.write().await;

        if let Some(key) = &options.dedupe_key {
            if jobs.values().any(|j| j.dedupe_key.as_deref() == Some(key.as_str())) {
                return Ok(EnqueueOutcome {
                    id: None,
                    inserted: false,
                });
            }
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload,
            dedupe_key: options.dedupe_key.clone(),
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: options.max_attempts,
            run_at: options.run_at.unwrap_or(now),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let id = job.id;
        jobs.insert(id, job);

        Ok(EnqueueOutcome {
            id: Some(id),
            inserted: true,
        })
    }

    async fn claim_next(&self, job_type: Option<&str>) -> EvidenceResult<Option<Job>> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();

        let next_id = jobs
            .values()
            .filter(|j| j.is_due(now))
            .filter(|j| job_type.map_or(true, |t| j.job_type == t))
            .min_by_key(|j| (j.run_at, j.created_at))
            .map(|j| j.id);

        Ok(next_id.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.status = JobStatus::Running;
                job.updated_at = now;
                job.clone()
            })
        }))
    }

    async fn mark_done(&self, id: Uuid) -> EvidenceResult<()> {
        self.check_job_updates()?;
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| EvidenceError::not_found(format!("job {}", id)))?;
        job.status = JobStatus::Done;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> EvidenceResult<()> {
        self.check_job_updates()?;
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| EvidenceError::not_found(format!("job {}", id)))?;
        job.status = JobStatus::Pending;
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.run_at = run_at;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn move_to_dead_letter(&self, id: Uuid, error: &str) -> EvidenceResult<()> {
        self.check_job_updates()?;
        let mut jobs = self.jobs.write().await;
        let mut dead_letters = self.dead_letters.write().await;

        let job = jobs
            .remove(&id)
            .ok_or_else(|| EvidenceError::not_found(format!("job {}", id)))?;
        let now = Utc::now();
        dead_letters.push(DeadLetterJob {
            id: job.id,
            job_type: job.job_type,
            payload: job.payload,
            dedupe_key: job.dedupe_key,
            attempts: job.attempts + 1,
            max_attempts: job.max_attempts,
            last_error: Some(error.to_string()),
            created_at: job.created_at,
            updated_at: now,
            failed_at: now,
        });
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> EvidenceResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn reset_jobs(&self, selector: &JobSelector) -> EvidenceResult<u64> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut touched = 0;

        for job in jobs.values_mut() {
            let matches = match selector {
                JobSelector::Id(id) => job.id == *id,
                JobSelector::BundleId(bundle_id) => {
                    job.dedupe_key.as_deref() == Some(bundle_id.as_str())
                        || job.payload_bundle_id() == Some(bundle_id.as_str())
                }
            };
            if matches {
                job.status = JobStatus::Pending;
                job.run_at = now;
                job.last_error = None;
                job.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn force_now(&self, job_type: &str) -> EvidenceResult<u64> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut touched = 0;

        for job in jobs
            .values_mut()
            .filter(|j| j.job_type == job_type && j.status == JobStatus::Pending)
        {
            job.run_at = now;
            job.attempts = 0;
            job.last_error = None;
            job.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }

    async fn queue_counts(&self) -> EvidenceResult<QueueCounts> {
        let jobs = self.jobs.read().await;
        let mut counts = QueueCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Done => counts.done += 1,
            }
        }
        counts.dead_letter = self.dead_letters.read().await.len() as u64;
        Ok(counts)
    }

    async fn list_pending(&self, due: bool, limit: usize) -> EvidenceResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let now = Utc::now();
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && (j.run_at <= now) == due)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.run_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn dead_letters(&self, limit: usize) -> EvidenceResult<Vec<DeadLetterJob>> {
        let dead_letters = self.dead_letters.read().await;
        Ok(dead_letters.iter().rev().take(limit).cloned().collect())
    }

    async fn prune_done(&self, older_than: DateTime<Utc>) -> EvidenceResult<u64> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, j| !(j.status == JobStatus::Done && j.updated_at < older_than));
        Ok((before - jobs.len()) as u64)
    }
}

#[async_trait]
impl BundleStore for MemoryStore {
    async fn insert_bundle(&self, bundle: &EvidenceBundle) -> EvidenceResult<()> {
        let mut bundles = self.bundles.write().await;
        if bundles.values().any(|b| b.bundle_id == bundle.bundle_id) {
            return Err(EvidenceError::conflict(format!(
                "bundle {} already exists",
                bundle.bundle_id
            )));
        }
        bundles.insert(bundle.id, bundle.clone());
        Ok(())
    }

    async fn get_bundle(
        &self,
        tenant_id: &str,
        bundle_id: &str,
    ) -> EvidenceResult<Option<EvidenceBundle>> {
        let bundles = self.bundles.read().await;
        Ok(bundles
            .values()
            .find(|b| b.bundle_id == bundle_id && b.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_bundle(&self, bundle_id: &str) -> EvidenceResult<Option<EvidenceBundle>> {
        let bundles = self.bundles.read().await;
        Ok(bundles.values().find(|b| b.bundle_id == bundle_id).cloned())
    }

    async fn mark_processing(&self, id: Uuid) -> EvidenceResult<()> {
        let mut bundles = self.bundles.write().await;
        let bundle = bundles
            .get_mut(&id)
            .ok_or_else(|| EvidenceError::not_found(format!("bundle row {}", id)))?;
        Self::transition(bundle, BundleStatus::Processing)?;
        bundle.error_message = None;
        Ok(())
    }

    async fn mark_ready(&self, id: Uuid, update: &ReadyUpdate) -> EvidenceResult<()> {
        let mut bundles = self.bundles.write().await;
        let bundle = bundles
            .get_mut(&id)
            .ok_or_else(|| EvidenceError::not_found(format!("bundle row {}", id)))?;
        Self::transition(bundle, BundleStatus::Ready)?;
        bundle.storage_key = Some(update.storage_key.clone());
        bundle.bundle_hash = Some(update.bundle_hash);
        bundle.manifest_hash = Some(update.manifest_hash);
        bundle.signature = update.signature.clone();
        bundle.record_count = update.record_count;
        bundle.first_sequence = Some(update.first_sequence);
        bundle.last_sequence = Some(update.last_sequence);
        bundle.completed_at = Some(update.completed_at);
        bundle.error_message = None;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> EvidenceResult<()> {
        let mut bundles = self.bundles.write().await;
        let bundle = bundles
            .get_mut(&id)
            .ok_or_else(|| EvidenceError::not_found(format!("bundle row {}", id)))?;
        Self::transition(bundle, BundleStatus::Failed)?;
        bundle.error_message = Some(error.to_string());
        Ok(())
    }

    async fn touch_accessed(&self, id: Uuid, at: DateTime<Utc>) -> EvidenceResult<()> {
        let mut bundles = self.bundles.write().await;
        let bundle = bundles
            .get_mut(&id)
            .ok_or_else(|| EvidenceError::not_found(format!("bundle row {}", id)))?;
        bundle.accessed_at = Some(at);
        Ok(())
    }

    async fn bundle_status_counts(&self) -> EvidenceResult<BundleStatusCounts> {
        let bundles = self.bundles.read().await;
        let mut counts = BundleStatusCounts::default();
        for bundle in bundles.values() {
            counts.add(bundle.status, 1);
        }
        Ok(counts)
    }

    async fn expired_bundles(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> EvidenceResult<Vec<EvidenceBundle>> {
        let bundles = self.bundles.read().await;
        let mut expired: Vec<EvidenceBundle> =
            bundles.values().filter(|b| b.is_expired(now)).cloned().collect();
        expired.sort_by_key(|b| b.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_event(&self, event: &AuditEvent) -> EvidenceResult<()> {
        self.audit.write().await.push(event.clone());
        Ok(())
    }

    async fn count_events(
        &self,
        tenant_id: &str,
        action: &str,
        status: AuditStatus,
        since: DateTime<Utc>,
    ) -> EvidenceResult<u64> {
        let audit = self.audit.read().await;
        Ok(audit
            .iter()
            .filter(|e| {
                e.tenant_id.as_deref() == Some(tenant_id)
                    && e.action == action
                    && e.status == status
                    && e.timestamp >= since
            })
            .count() as u64)
    }

    async fn events_for_resources(&self, resource_ids: &[String]) -> EvidenceResult<Vec<AuditEvent>> {
        let audit = self.audit.read().await;
        let mut events: Vec<AuditEvent> = audit
            .iter()
            .filter(|e| {
                e.resource_id
                    .as_ref()
                    .map_or(false, |id| resource_ids.contains(id))
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ev_core::{Sha256Digest, GENESIS_HASH};
    use serde_json::json;

    fn record(tenant: &str, seq: u64, tx: &str) -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            transaction_id: tx.to_string(),
            input_hash: Sha256Digest::hash(b"in"),
            output_hash: Sha256Digest::hash(b"out"),
            context_hash: Sha256Digest::hash(b"ctx"),
            record_hash: Sha256Digest::hash(tx.as_bytes()),
            previous_hash: GENESIS_HASH,
            timestamp: Utc::now(),
            sequence: seq,
        }
    }

    #[tokio::test]
    async fn test_insert_record_constraints() {
        let store = MemoryStore::new();
        store.insert_record(&record("tenant-a", 1, "txn_1")).await.unwrap();

        let err = store.insert_record(&record("tenant-a", 1, "txn_2")).await.unwrap_err();
        assert!(matches!(err, EvidenceError::Conflict(_)));

        let err = store.insert_record(&record("tenant-a", 2, "txn_1")).await.unwrap_err();
        assert!(matches!(err, EvidenceError::Validation(_)));

        // Other tenants have their own sequence space
        store.insert_record(&record("tenant-b", 1, "txn_1")).await.unwrap();

        let tail = store.chain_tail("tenant-a").await.unwrap().unwrap();
        assert_eq!(tail.sequence, 1);
    }

    #[tokio::test]
    async fn test_dedupe_key_single_row() {
        let store = MemoryStore::new();
        let opts = EnqueueOptions::default().with_dedupe_key("bundle_1");

        let first = store.insert_job("GENERATE_BUNDLE", json!({}), &opts).await.unwrap();
        let second = store.insert_job("GENERATE_BUNDLE", json!({}), &opts).await.unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(second.id, None);
        assert_eq!(store.queue_counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_claim_respects_run_at_and_type() {
        let store = MemoryStore::new();
        let later = Utc::now() + Duration::minutes(5);
        store
            .insert_job("GENERATE_BUNDLE", json!({}), &EnqueueOptions::default().with_run_at(later))
            .await
            .unwrap();
        assert!(store.claim_next(None).await.unwrap().is_none());

        store.insert_job("OTHER", json!({}), &EnqueueOptions::default()).await.unwrap();
        assert!(store.claim_next(Some("GENERATE_BUNDLE")).await.unwrap().is_none());

        let job = store.claim_next(None).await.unwrap().unwrap();
        assert_eq!(job.job_type, "OTHER");
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_dead_letter_move_removes_live_row() {
        let store = MemoryStore::new();
        let outcome = store
            .insert_job("GENERATE_BUNDLE", json!({ "bundleId": "b" }), &EnqueueOptions::default())
            .await
            .unwrap();
        let id = outcome.id.unwrap();

        store.move_to_dead_letter(id, "boom").await.unwrap();

        assert!(store.get_job(id).await.unwrap().is_none());
        let dlq = store.dead_letters(10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].last_error.as_deref(), Some("boom"));
        assert_eq!(store.queue_counts().await.unwrap().dead_letter, 1);
    }

    #[tokio::test]
    async fn test_ready_bundle_rejects_transitions() {
        let store = MemoryStore::new();
        let bundle = EvidenceBundle::new_pending("bundle_1", "tenant-a", &DateFilter::default(), 1);
        store.insert_bundle(&bundle).await.unwrap();
        store.mark_processing(bundle.id).await.unwrap();
        store
            .mark_ready(
                bundle.id,
                &ReadyUpdate {
                    storage_key: "k".to_string(),
                    bundle_hash: Sha256Digest::hash(b"b"),
                    manifest_hash: Sha256Digest::hash(b"m"),
                    signature: None,
                    record_count: 1,
                    first_sequence: 1,
                    last_sequence: 1,
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let err = store.mark_processing(bundle.id).await.unwrap_err();
        assert!(matches!(err, EvidenceError::Immutable(_)));
        let err = store.mark_failed(bundle.id, "x").await.unwrap_err();
        assert!(matches!(err, EvidenceError::Immutable(_)));

        store.touch_accessed(bundle.id, Utc::now()).await.unwrap();
        let stored = store.find_bundle("bundle_1").await.unwrap().unwrap();
        assert!(stored.accessed_at.is_some());
        assert_eq!(stored.status, BundleStatus::Ready);
    }

    #[tokio::test]
    async fn test_count_events_window() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for minutes_ago in [5, 30, 90] {
            let event = AuditEvent::new(Some("tenant-a"), "HASH_SIGNED", "EVIDENCE_BUNDLE", Some("b"))
                .with_timestamp(now - Duration::minutes(minutes_ago));
            store.append_event(&event).await.unwrap();
        }
        let count = store
            .count_events("tenant-a", "HASH_SIGNED", AuditStatus::Success, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
