//! Durable job queue
//!
//! At-least-once delivery over the job table. The mutating primitives are
//! `enqueue`, `claim_next`, `mark_done`, `reschedule` and
//! `move_to_dead_letter`; everything else is inspection or an
//! administrative reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::SharedStore;
use crate::config::QueueConfig;
use crate::retry::BackoffPolicy;
use ev_core::{
    DeadLetterJob, EnqueueOptions, EnqueueOutcome, EvidenceError, EvidenceResult, GenerateBundlePayload, Job,
    JobSelector, QueueCounts, GENERATE_BUNDLE,
};

/// What happened to a job after a handler failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    Rescheduled { run_at: DateTime<Utc> },
    DeadLettered,
    /// The queue update itself failed. The job stays RUNNING until an
    /// operator resets it.
    Unrecorded { error: String },
}

/// Snapshot of the queue for operator tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub counts: QueueCounts,
    /// PENDING with `runAt <= now`
    pub due: Vec<Job>,
    /// PENDING with `runAt > now`
    pub scheduled: Vec<Job>,
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_error(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

/// Job queue
#[derive(Clone)]
pub struct JobQueue {
    store: SharedStore,
    config: QueueConfig,
    backoff: BackoffPolicy,
}

impl JobQueue {
    pub fn new(store: SharedStore, config: QueueConfig) -> Self {
        Self {
            backoff: config.backoff(),
            store,
            config,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Idempotent insert. A colliding dedupe key leaves the existing job in place.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> EvidenceResult<EnqueueOutcome> {
        let outcome = self.store.insert_job(job_type, payload, &options).await?;
        if outcome.inserted {
            info!(
                job_type,
                job_id = ?outcome.id,
                dedupe_key = options.dedupe_key.as_deref().unwrap_or("-"),
                "Job enqueued"
            );
        } else {
            debug!(
                job_type,
                dedupe_key = options.dedupe_key.as_deref().unwrap_or("-"),
                "Dedupe key exists, enqueue skipped"
            );
        }
        Ok(outcome)
    }

    /// Enqueue a bundle build keyed by its bundle id
    pub async fn enqueue_bundle(&self, payload: &GenerateBundlePayload) -> EvidenceResult<EnqueueOutcome> {
        let options = EnqueueOptions::default()
            .with_dedupe_key(payload.bundle_id.clone())
            .with_max_attempts(self.config.default_max_attempts);
        self.enqueue(GENERATE_BUNDLE, serde_json::to_value(payload)?, options)
            .await
    }

    /// Lease the earliest due job, optionally of one type
    pub async fn claim_next(&self, job_type: Option<&str>) -> EvidenceResult<Option<Job>> {
        let job = self.store.claim_next(job_type).await?;
        if let Some(job) = &job {
            info!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                "Job claimed"
            );
        }
        Ok(job)
    }

    pub async fn mark_done(&self, id: Uuid) -> EvidenceResult<()> {
        self.store.mark_done(id).await?;
        debug!(job_id = %id, "Job done");
        Ok(())
    }

    /// Back to PENDING after `backoff(attempts)`, attempts incremented.
    /// Returns the new due time.
    pub async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        error: &str,
    ) -> EvidenceResult<DateTime<Utc>> {
        let run_at = self.backoff.next_run_at(Utc::now(), attempts);
        let error = truncate_error(error, self.config.max_error_len);
        self.store.reschedule(id, &error, run_at).await?;
        warn!(
            job_id = %id,
            attempts = attempts + 1,
            run_at = %run_at,
            error = %error,
            "Job rescheduled"
        );
        Ok(run_at)
    }

    /// Move a job that exhausted its retries into the dead-letter table
    pub async fn move_to_dead_letter(&self, job: &Job, error: &str) -> EvidenceResult<()> {
        let error = truncate_error(error, self.config.max_error_len);
        self.store.move_to_dead_letter(job.id, &error).await?;
        error!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts + 1,
            error = %error,
            "Job moved to dead-letter queue"
        );
        Ok(())
    }

    /// Reschedule while attempts remain, otherwise dead-letter
    pub async fn handle_failure(&self, job: &Job, error: &str) -> EvidenceResult<FailureDisposition> {
        if job.has_attempts_remaining() {
            let run_at = self.reschedule(job.id, job.attempts, error).await?;
            Ok(FailureDisposition::Rescheduled { run_at })
        } else {
            self.move_to_dead_letter(job, error).await?;
            Ok(FailureDisposition::DeadLettered)
        }
    }

    /// Route a handler error: only transient and conflict errors go through
    /// backoff, everything else is dead-lettered on the first failure
    pub async fn handle_error(&self, job: &Job, err: &EvidenceError) -> EvidenceResult<FailureDisposition> {
        let message = err.to_string();
        if err.is_retryable() {
            return self.handle_failure(job, &message).await;
        }
        warn!(job_id = %job.id, code = err.code(), "Handler error is not retryable");
        self.move_to_dead_letter(job, &message).await?;
        Ok(FailureDisposition::DeadLettered)
    }

    pub async fn get(&self, id: Uuid) -> EvidenceResult<Option<Job>> {
        self.store.get_job(id).await
    }

    /// Counts plus up to `limit` due and scheduled jobs
    pub async fn status(&self, limit: usize) -> EvidenceResult<QueueStatus> {
        Ok(QueueStatus {
            counts: self.store.queue_counts().await?,
            due: self.store.list_pending(true, limit).await?,
            scheduled: self.store.list_pending(false, limit).await?,
        })
    }

    /// PENDING and due now, error cleared
    pub async fn reset(&self, selector: &JobSelector) -> EvidenceResult<u64> {
        let touched = self.store.reset_jobs(selector).await?;
        info!(selector = ?selector, count = touched, "Jobs reset");
        Ok(touched)
    }

    /// Every PENDING job of the type due now with attempts cleared
    pub async fn force_now(&self, job_type: &str) -> EvidenceResult<u64> {
        let touched = self.store.force_now(job_type).await?;
        info!(job_type, count = touched, "Jobs forced due");
        Ok(touched)
    }

    pub async fn dead_letters(&self, limit: usize) -> EvidenceResult<Vec<DeadLetterJob>> {
        self.store.dead_letters(limit).await
    }

    pub async fn prune_done(&self, older_than: DateTime<Utc>) -> EvidenceResult<u64> {
        let pruned = self.store.prune_done(older_than).await?;
        info!(count = pruned, "Pruned finished jobs");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use ev_core::JobStatus;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(MemoryStore::new()), QueueConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_dedupe() {
        let queue = queue();
        let payload = GenerateBundlePayload {
            bundle_id: "bundle_1".to_string(),
            tenant_id: "tenant-a".to_string(),
            date_filter: Default::default(),
        };
        assert!(queue.enqueue_bundle(&payload).await.unwrap().inserted);
        assert!(!queue.enqueue_bundle(&payload).await.unwrap().inserted);

        let status = queue.status(10).await.unwrap();
        assert_eq!(status.counts.pending, 1);
        assert_eq!(status.due.len(), 1);
    }

    #[tokio::test]
    async fn test_reschedule_backoff() {
        let queue = queue();
        for attempts in 0..4u32 {
            let id = queue
                .enqueue("T", json!({}), EnqueueOptions::default())
                .await
                .unwrap()
                .id
                .unwrap();
            let before = Utc::now();
            let run_at = queue.reschedule(id, attempts, "boom").await.unwrap();
            let expected = 3i64.pow(attempts) * 60;
            let delta = (run_at - before).num_seconds();
            assert!((expected - 1..=expected + 1).contains(&delta), "attempts {}: {}", attempts, delta);

            let job = queue.get(id).await.unwrap().unwrap();
            assert_eq!(job.attempts, 1);
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.last_error.as_deref(), Some("boom"));
        }
    }

    #[tokio::test]
    async fn test_failure_path_ends_in_dead_letter() {
        let queue = queue();
        let id = queue
            .enqueue("T", json!({}), EnqueueOptions::default().with_max_attempts(2))
            .await
            .unwrap()
            .id
            .unwrap();

        let job = queue.claim_next(None).await.unwrap().unwrap();
        let first = queue.handle_failure(&job, "first").await.unwrap();
        assert!(matches!(first, FailureDisposition::Rescheduled { .. }));

        queue.reset(&JobSelector::Id(id)).await.unwrap();
        let job = queue.claim_next(None).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        let second = queue.handle_failure(&job, "second").await.unwrap();
        assert_eq!(second, FailureDisposition::DeadLettered);

        assert!(queue.get(id).await.unwrap().is_none());
        let dlq = queue.dead_letters(10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].attempts, 2);
        assert_eq!(dlq[0].last_error.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_non_retryable_errors_skip_backoff() {
        let queue = queue();
        for _ in 0..2 {
            queue.enqueue("T", json!({}), EnqueueOptions::default()).await.unwrap();
        }

        let job = queue.claim_next(None).await.unwrap().unwrap();
        let disposition = queue
            .handle_error(&job, &EvidenceError::validation("malformed payload"))
            .await
            .unwrap();
        assert_eq!(disposition, FailureDisposition::DeadLettered);
        assert!(queue.get(job.id).await.unwrap().is_none());

        let job = queue.claim_next(None).await.unwrap().unwrap();
        let disposition = queue
            .handle_error(&job, &EvidenceError::transient("storage down"))
            .await
            .unwrap();
        assert!(matches!(disposition, FailureDisposition::Rescheduled { .. }));

        let dlq = queue.dead_letters(10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert!(dlq[0].last_error.as_deref().unwrap().contains("malformed payload"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_distinct() {
        let queue = queue();
        let jobs = 5;
        for _ in 0..jobs {
            queue.enqueue("T", json!({}), EnqueueOptions::default()).await.unwrap();
        }

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.claim_next(None).await.unwrap() })
            })
            .collect();

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap() {
                claimed.push(job.id);
            }
        }
        let unique: HashSet<_> = claimed.iter().collect();
        assert_eq!(claimed.len(), jobs);
        assert_eq!(unique.len(), jobs);
    }

    #[tokio::test]
    async fn test_force_now_and_prune() {
        let queue = queue();
        let later = Utc::now() + Duration::hours(1);
        queue
            .enqueue("T", json!({}), EnqueueOptions::default().with_run_at(later))
            .await
            .unwrap();
        assert!(queue.claim_next(None).await.unwrap().is_none());

        assert_eq!(queue.force_now("T").await.unwrap(), 1);
        let job = queue.claim_next(Some("T")).await.unwrap().unwrap();
        queue.mark_done(job.id).await.unwrap();

        assert_eq!(queue.prune_done(Utc::now() - Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(queue.prune_done(Utc::now() + Duration::seconds(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reset_by_bundle_id() {
        let queue = queue();
        let id = queue
            .enqueue(
                GENERATE_BUNDLE,
                json!({ "bundleId": "bundle_9", "tenantId": "tenant-a" }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap()
            .id
            .unwrap();
        queue.claim_next(None).await.unwrap();

        let touched = queue
            .reset(&JobSelector::BundleId("bundle_9".to_string()))
            .await
            .unwrap();
        assert_eq!(touched, 1);
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_truncate_error_is_char_safe() {
        assert_eq!(truncate_error("héllo", 2), "hé");
        assert_eq!(truncate_error("short", 100), "short");
        assert_eq!(truncate_error(&"x".repeat(2500), 2000).len(), 2000);
    }
}
