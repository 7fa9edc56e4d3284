//! Store interfaces
//!
//! One trait per table group. Both back ends implement all four:
//! - [`MemoryStore`]: tests and single-process development
//! - [`PgStore`]: PostgreSQL, the coordination point between independent
//!   worker processes
//!
//! # Guarantees every implementation must give
//!
//! - `insert_record` rejects a second record with the same
//!   `(tenant_id, sequence)` with `Conflict`, and a duplicate
//!   `(tenant_id, transaction_id)` with `Validation`
//! - `claim_next` hands each due job to exactly one caller
//! - `move_to_dead_letter` copies and deletes in one step
//! - READY bundles reject every transition

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use ev_core::{
    AuditEvent, AuditStatus, BundleStatus, DateFilter, DeadLetterJob, DecisionRecord,
    EnqueueOptions, EnqueueOutcome, EvidenceBundle, EvidenceResult, Job, JobSelector,
    QueueCounts, ReadyUpdate,
};

/// Decision record storage
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Highest-sequence record of the tenant
    async fn chain_tail(&self, tenant_id: &str) -> EvidenceResult<Option<DecisionRecord>>;

    async fn insert_record(&self, record: &DecisionRecord) -> EvidenceResult<()>;

    /// Records with `from_seq <= sequence <= to_seq`, ordered by sequence
    async fn records_by_sequence(
        &self,
        tenant_id: &str,
        from_seq: u64,
        to_seq: u64,
    ) -> EvidenceResult<Vec<DecisionRecord>>;

    /// Records whose timestamp falls in the filter, ordered by sequence
    async fn records_in_range(
        &self,
        tenant_id: &str,
        filter: &DateFilter,
    ) -> EvidenceResult<Vec<DecisionRecord>>;

    async fn count_in_range(&self, tenant_id: &str, filter: &DateFilter) -> EvidenceResult<u64>;

    async fn find_by_transaction(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> EvidenceResult<Option<DecisionRecord>>;

    /// Bind a client idempotency key to the record it produced. A later
    /// save of the same key replaces the binding.
    async fn save_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
        record_id: Uuid,
        at: DateTime<Utc>,
    ) -> EvidenceResult<()>;

    /// Record bound to `key`, if the binding was saved at or after `since`
    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> EvidenceResult<Option<DecisionRecord>>;

    /// Delete bindings saved before `older_than`
    async fn prune_idempotency_keys(&self, older_than: DateTime<Utc>) -> EvidenceResult<u64>;
}

/// Job queue storage
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert unless the dedupe key already exists
    async fn insert_job(
        &self,
        job_type: &str,
        payload: Value,
        options: &EnqueueOptions,
    ) -> EvidenceResult<EnqueueOutcome>;

    /// Atomically lease the earliest due PENDING job
    async fn claim_next(&self, job_type: Option<&str>) -> EvidenceResult<Option<Job>>;

    async fn mark_done(&self, id: Uuid) -> EvidenceResult<()>;

    /// Back to PENDING at `run_at`, attempts incremented
    async fn reschedule(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> EvidenceResult<()>;

    /// Copy into the dead-letter table, counting this failure, and delete
    async fn move_to_dead_letter(&self, id: Uuid, error: &str) -> EvidenceResult<()>;

    async fn get_job(&self, id: Uuid) -> EvidenceResult<Option<Job>>;

    /// PENDING, due now, error cleared. Returns rows touched.
    async fn reset_jobs(&self, selector: &JobSelector) -> EvidenceResult<u64>;

    /// Every PENDING job of the type due now with attempts cleared
    async fn force_now(&self, job_type: &str) -> EvidenceResult<u64>;

    async fn queue_counts(&self) -> EvidenceResult<QueueCounts>;

    /// PENDING jobs, either due (`run_at <= now`) or scheduled later
    async fn list_pending(&self, due: bool, limit: usize) -> EvidenceResult<Vec<Job>>;

    async fn dead_letters(&self, limit: usize) -> EvidenceResult<Vec<DeadLetterJob>>;

    /// Delete DONE rows last touched before the cutoff
    async fn prune_done(&self, older_than: DateTime<Utc>) -> EvidenceResult<u64>;
}

/// Bundle counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub ready: u64,
    pub failed: u64,
}

impl BundleStatusCounts {
    pub fn add(&mut self, status: BundleStatus, count: u64) {
        match status {
            BundleStatus::Pending => self.pending += count,
            BundleStatus::Processing => self.processing += count,
            BundleStatus::Ready => self.ready += count,
            BundleStatus::Failed => self.failed += count,
        }
    }
}

/// Evidence bundle storage
#[async_trait]
pub trait BundleStore: Send + Sync {
    /// `Conflict` if the bundle id is taken
    async fn insert_bundle(&self, bundle: &EvidenceBundle) -> EvidenceResult<()>;

    async fn get_bundle(
        &self,
        tenant_id: &str,
        bundle_id: &str,
    ) -> EvidenceResult<Option<EvidenceBundle>>;

    /// Lookup without tenant scoping, for operator tooling
    async fn find_bundle(&self, bundle_id: &str) -> EvidenceResult<Option<EvidenceBundle>>;

    async fn mark_processing(&self, id: Uuid) -> EvidenceResult<()>;

    async fn mark_ready(&self, id: Uuid, update: &ReadyUpdate) -> EvidenceResult<()>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> EvidenceResult<()>;

    /// The one update a READY bundle accepts
    async fn touch_accessed(&self, id: Uuid, at: DateTime<Utc>) -> EvidenceResult<()>;

    async fn bundle_status_counts(&self) -> EvidenceResult<BundleStatusCounts>;

    /// READY bundles past expiry, not on legal hold, retention elapsed
    async fn expired_bundles(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> EvidenceResult<Vec<EvidenceBundle>>;
}

/// Audit log storage
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_event(&self, event: &AuditEvent) -> EvidenceResult<()>;

    /// Events of one action and status for a tenant since `since`
    async fn count_events(
        &self,
        tenant_id: &str,
        action: &str,
        status: AuditStatus,
        since: DateTime<Utc>,
    ) -> EvidenceResult<u64>;

    /// Events referencing any of the resources, oldest first
    async fn events_for_resources(&self, resource_ids: &[String]) -> EvidenceResult<Vec<AuditEvent>>;
}

/// Everything the pipeline needs from one back end
pub trait EvidenceStore: LedgerStore + JobStore + BundleStore + AuditStore + 'static {}

impl<T> EvidenceStore for T where T: LedgerStore + JobStore + BundleStore + AuditStore + 'static {}
