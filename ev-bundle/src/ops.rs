//! Bundle operations
//!
//! Operator and tenant-facing actions around the builder: requesting a
//! bundle, reprocessing a failed or stuck one, download bookkeeping,
//! disclosure records and retention cleanup. None of them mutate a READY
//! bundle beyond its access timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::manifest::{object_key, MANIFEST_FILE, RECORDS_FILE, VERIFY_FILE};
use crate::storage::StorageAdapter;
use ev_core::types::audit::{actions, resource_types};
use ev_core::{
    AuditEvent, BundleStatus, DateFilter, DisclosureLevel, EvidenceBundle, EvidenceError,
    EvidenceResult, GenerateBundlePayload, JobSelector, MIN_TENANT_ID_LEN,
};
use ev_db::{AuditLog, BundleStatusCounts, JobQueue, QueueStatus, RateLimiter, SharedStore};

/// Request for a new bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub date_filter: DateFilter,
    pub purpose: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub disclosure: DisclosureLevel,
    #[serde(default)]
    pub legal_hold: bool,
    #[serde(default)]
    pub retention_until: Option<DateTime<Utc>>,
}

/// What a reprocess call did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessOutcome {
    pub bundle_id: String,
    /// Existing job rows put back to PENDING
    pub jobs_reset: u64,
    /// A fresh job was enqueued because none existed
    pub enqueued: bool,
}

/// Download grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub bundle_id: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Cleanup result for one bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupEntry {
    pub bundle_id: String,
    pub tenant_id: String,
    /// Keys deleted, or that would be deleted on a dry run
    pub keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub dry_run: bool,
    pub entries: Vec<CleanupEntry>,
}

impl CleanupReport {
    pub fn cleaned(&self) -> usize {
        self.entries.iter().filter(|e| e.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.cleaned()
    }
}

/// Queue and bundle counts in one snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub queue: QueueStatus,
    pub bundles: BundleStatusCounts,
}

/// New external bundle identifier, `bundle_<32 hex>`
pub fn new_bundle_id() -> String {
    format!("bundle_{}", Uuid::new_v4().simple())
}

/// Bundle operations
#[derive(Clone)]
pub struct BundleOps {
    store: SharedStore,
    queue: JobQueue,
    storage: Arc<dyn StorageAdapter>,
    audit: AuditLog,
    create_limiter: RateLimiter,
    download_limiter: RateLimiter,
    config: WorkerConfig,
}

impl BundleOps {
    pub fn new(
        store: SharedStore,
        queue: JobQueue,
        storage: Arc<dyn StorageAdapter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            audit: AuditLog::new(store.clone()),
            create_limiter: RateLimiter::new(
                store.clone(),
                actions::BUNDLE_CREATE,
                config.bundle_rate_limit,
                config.bundle_rate_window(),
            ),
            download_limiter: RateLimiter::new(
                store.clone(),
                actions::BUNDLE_DOWNLOADED,
                config.download_rate_limit,
                chrono::Duration::days(1),
            ),
            store,
            queue,
            storage,
            config,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    async fn tenant_bundle(&self, tenant_id: &str, bundle_id: &str) -> EvidenceResult<EvidenceBundle> {
        self.store
            .get_bundle(tenant_id, bundle_id)
            .await?
            .ok_or_else(|| EvidenceError::not_found(format!("bundle {}", bundle_id)))
    }

    /// Create a PENDING bundle and enqueue its build
    pub async fn request_bundle(&self, request: BundleRequest) -> EvidenceResult<EvidenceBundle> {
        let tenant_id = request.tenant_id.trim().to_string();
        if tenant_id.len() < MIN_TENANT_ID_LEN {
            return Err(EvidenceError::validation(format!(
                "tenantId must be at least {} characters",
                MIN_TENANT_ID_LEN
            )));
        }
        if request.purpose.trim().is_empty() {
            return Err(EvidenceError::validation("purpose is required"));
        }
        request.date_filter.validate()?;

        if let Err(e) = self.create_limiter.check(&tenant_id).await {
            if matches!(e, EvidenceError::RateLimited { .. }) {
                self.audit
                    .record_after_commit(
                        AuditEvent::new(
                            Some(&tenant_id),
                            actions::BUNDLE_CREATE,
                            resource_types::EVIDENCE_BUNDLE,
                            None,
                        )
                        .with_user(request.created_by.as_deref())
                        .with_metadata(json!({
                            "limit": self.create_limiter.limit(),
                            "windowSecs": self.create_limiter.window().num_seconds(),
                        }))
                        .denied(e.to_string()),
                    )
                    .await;
            }
            return Err(e);
        }

        let record_count = self
            .store
            .count_in_range(&tenant_id, &request.date_filter)
            .await?;
        if record_count == 0 {
            return Err(EvidenceError::EmptyRange { tenant_id });
        }

        let bundle_id = new_bundle_id();
        let mut bundle =
            EvidenceBundle::new_pending(&bundle_id, &tenant_id, &request.date_filter, record_count);
        bundle.purpose = Some(request.purpose.trim().to_string());
        bundle.created_by = request.created_by.clone();
        bundle.disclosure = request.disclosure;
        bundle.legal_hold = request.legal_hold;
        bundle.retention_until = request.retention_until;
        bundle.expires_at = Some(bundle.created_at + self.config.retention());
        self.store.insert_bundle(&bundle).await?;

        let outcome = self
            .queue
            .enqueue_bundle(&GenerateBundlePayload {
                bundle_id: bundle_id.clone(),
                tenant_id: tenant_id.clone(),
                date_filter: request.date_filter.clone(),
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(
                    Some(&tenant_id),
                    actions::BUNDLE_CREATE,
                    resource_types::EVIDENCE_BUNDLE,
                    Some(&bundle_id),
                )
                .with_user(request.created_by.as_deref())
                .with_metadata(json!({
                    "purpose": bundle.purpose,
                    "recordCount": record_count,
                    "dateFilter": request.date_filter,
                    "disclosure": bundle.disclosure.as_str(),
                    "queued": outcome.inserted,
                })),
            )
            .await?;

        info!(
            tenant_id = %tenant_id,
            bundle_id = %bundle_id,
            record_count,
            "Bundle requested"
        );
        Ok(bundle)
    }

    pub async fn get(&self, tenant_id: &str, bundle_id: &str) -> EvidenceResult<EvidenceBundle> {
        self.tenant_bundle(tenant_id, bundle_id).await
    }

    /// Bundle details, audited as a view
    pub async fn view(
        &self,
        tenant_id: &str,
        bundle_id: &str,
        user_id: Option<&str>,
    ) -> EvidenceResult<EvidenceBundle> {
        let bundle = self.tenant_bundle(tenant_id, bundle_id).await?;
        self.audit
            .record_after_commit(
                AuditEvent::new(
                    Some(tenant_id),
                    actions::BUNDLE_VIEWED,
                    resource_types::EVIDENCE_BUNDLE,
                    Some(bundle_id),
                )
                .with_user(user_id),
            )
            .await;
        Ok(bundle)
    }

    /// Put a FAILED or stuck bundle's job back on the queue
    ///
    /// READY bundles are rejected; a PROCESSING bundle is only eligible once
    /// it has been idle past the stale threshold. The bundle row is left for
    /// the worker to move.
    pub async fn reprocess(
        &self,
        tenant_id: &str,
        bundle_id: &str,
        user_id: Option<&str>,
    ) -> EvidenceResult<ReprocessOutcome> {
        let bundle = self.tenant_bundle(tenant_id, bundle_id).await?;

        match bundle.status {
            BundleStatus::Ready => {
                return Err(EvidenceError::validation(format!(
                    "bundle {} is already READY",
                    bundle_id
                )));
            }
            BundleStatus::Processing if !bundle.is_stale(Utc::now(), self.config.stale_threshold()) => {
                return Err(EvidenceError::conflict(format!(
                    "bundle {} is processing; retry after {} minutes idle",
                    bundle_id, self.config.stale_minutes
                )));
            }
            _ => {}
        }

        let jobs_reset = self
            .queue
            .reset(&JobSelector::BundleId(bundle_id.to_string()))
            .await?;
        let enqueued = if jobs_reset == 0 {
            self.queue
                .enqueue_bundle(&GenerateBundlePayload {
                    bundle_id: bundle_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    date_filter: bundle.date_filter(),
                })
                .await?
                .inserted
        } else {
            false
        };

        self.audit
            .record_after_commit(
                AuditEvent::new(
                    Some(tenant_id),
                    actions::BUNDLE_REPROCESS,
                    resource_types::EVIDENCE_BUNDLE,
                    Some(bundle_id),
                )
                .with_user(user_id)
                .with_metadata(json!({
                    "previousStatus": bundle.status.as_str(),
                    "jobsReset": jobs_reset,
                    "enqueued": enqueued,
                })),
            )
            .await;

        info!(tenant_id, bundle_id, jobs_reset, enqueued, "Bundle reprocess queued");
        Ok(ReprocessOutcome {
            bundle_id: bundle_id.to_string(),
            jobs_reset,
            enqueued,
        })
    }

    /// Presigned manifest link for a READY bundle, audited as a download
    pub async fn record_access(
        &self,
        tenant_id: &str,
        bundle_id: &str,
        user_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> EvidenceResult<AccessGrant> {
        let bundle = self.tenant_bundle(tenant_id, bundle_id).await?;
        let event = |action: &str| {
            AuditEvent::new(
                Some(tenant_id),
                action,
                resource_types::EVIDENCE_BUNDLE,
                Some(bundle_id),
            )
            .with_user(user_id)
            .with_client(ip_address, None)
        };

        if bundle.status != BundleStatus::Ready {
            return Err(EvidenceError::validation(format!(
                "bundle {} is not ready, status {}",
                bundle_id, bundle.status
            )));
        }
        let now = Utc::now();
        let expired = bundle.expires_at.map_or(false, |at| at < now);
        let retained = bundle.legal_hold || bundle.retention_until.map_or(false, |until| until > now);
        if expired && !retained {
            let e = EvidenceError::validation(format!("bundle {} expired by retention policy", bundle_id));
            self.audit
                .record_after_commit(event(actions::BUNDLE_DOWNLOADED).denied(e.to_string()))
                .await;
            return Err(e);
        }

        if let Err(e) = self.download_limiter.check(tenant_id).await {
            if matches!(e, EvidenceError::RateLimited { .. }) {
                self.audit
                    .record_after_commit(event(actions::BUNDLE_DOWNLOADED).denied(e.to_string()))
                    .await;
            }
            return Err(e);
        }

        let key = bundle
            .storage_key
            .clone()
            .unwrap_or_else(|| object_key(tenant_id, bundle_id, MANIFEST_FILE));
        let presigned = self.storage.presign(&key, self.config.presign_ttl()).await?;
        self.store.touch_accessed(bundle.id, now).await?;

        self.audit
            .record(event(actions::BUNDLE_DOWNLOADED).with_metadata(json!({
                "storageKey": key,
                "expiresAt": presigned.expires_at,
            })))
            .await?;

        info!(tenant_id, bundle_id, "Bundle download granted");
        Ok(AccessGrant {
            bundle_id: bundle_id.to_string(),
            url: presigned.url,
            expires_at: presigned.expires_at,
        })
    }

    /// Record that a READY bundle was handed to an outside party
    pub async fn record_disclosure(
        &self,
        tenant_id: &str,
        bundle_id: &str,
        recipient: &str,
        user_id: Option<&str>,
    ) -> EvidenceResult<()> {
        let bundle = self.tenant_bundle(tenant_id, bundle_id).await?;
        if bundle.status != BundleStatus::Ready {
            return Err(EvidenceError::validation(format!(
                "bundle {} is not ready, status {}",
                bundle_id, bundle.status
            )));
        }
        if recipient.trim().is_empty() {
            return Err(EvidenceError::validation("recipient is required"));
        }

        self.audit
            .record(
                AuditEvent::new(
                    Some(tenant_id),
                    actions::BUNDLE_SENT_TO_REGULATOR,
                    resource_types::EVIDENCE_BUNDLE,
                    Some(bundle_id),
                )
                .with_user(user_id)
                .with_metadata(json!({
                    "recipient": recipient.trim(),
                    "bundleHash": bundle.bundle_hash,
                })),
            )
            .await?;
        info!(tenant_id, bundle_id, recipient, "Bundle disclosure recorded");
        Ok(())
    }

    /// Delete stored artifacts of expired READY bundles
    ///
    /// Legal holds and future `retentionUntil` dates are respected by the
    /// store query. Bundle rows stay as they are.
    pub async fn cleanup_expired(&self, dry_run: bool, limit: usize) -> EvidenceResult<CleanupReport> {
        let now = Utc::now();
        let expired = self.store.expired_bundles(now, limit).await?;
        let mut report = CleanupReport {
            dry_run,
            entries: Vec::with_capacity(expired.len()),
        };

        for bundle in expired {
            let candidates = [
                bundle
                    .storage_key
                    .clone()
                    .unwrap_or_else(|| object_key(&bundle.tenant_id, &bundle.bundle_id, MANIFEST_FILE)),
                object_key(&bundle.tenant_id, &bundle.bundle_id, VERIFY_FILE),
                object_key(&bundle.tenant_id, &bundle.bundle_id, RECORDS_FILE),
            ];

            let mut entry = CleanupEntry {
                bundle_id: bundle.bundle_id.clone(),
                tenant_id: bundle.tenant_id.clone(),
                keys: Vec::new(),
                error: None,
            };

            for key in candidates {
                match self.delete_if_present(&key, dry_run).await {
                    Ok(true) => entry.keys.push(key),
                    Ok(false) => {}
                    Err(e) => {
                        entry.error = Some(e.to_string());
                        break;
                    }
                }
            }

            if dry_run {
                info!(bundle_id = %bundle.bundle_id, keys = ?entry.keys, "Dry run, would delete");
                report.entries.push(entry);
                continue;
            }

            let event = AuditEvent::new(
                Some(&bundle.tenant_id),
                actions::BUNDLE_CLEANUP,
                resource_types::EVIDENCE_BUNDLE,
                Some(&bundle.bundle_id),
            )
            .with_metadata(json!({
                "deletedKeys": entry.keys,
                "expiresAt": bundle.expires_at,
            }));
            match &entry.error {
                None => {
                    info!(bundle_id = %bundle.bundle_id, count = entry.keys.len(), "Expired bundle cleaned");
                    self.audit.record_after_commit(event).await;
                }
                Some(message) => {
                    error!(bundle_id = %bundle.bundle_id, error = %message, "Bundle cleanup failed");
                    self.audit.record_after_commit(event.failed(message.clone())).await;
                }
            }
            report.entries.push(entry);
        }

        if report.entries.is_empty() {
            info!("No expired bundles to clean up");
        } else if report.failed() > 0 {
            warn!(cleaned = report.cleaned(), failed = report.failed(), "Cleanup finished with failures");
        }
        Ok(report)
    }

    async fn delete_if_present(&self, key: &str, dry_run: bool) -> EvidenceResult<bool> {
        if !self.storage.exists(key).await? {
            return Ok(false);
        }
        if !dry_run {
            self.storage.delete(key).await?;
        }
        Ok(true)
    }

    /// Queue counts, due and scheduled jobs, and bundle counts
    pub async fn status(&self, limit: usize) -> EvidenceResult<PipelineStatus> {
        Ok(PipelineStatus {
            queue: self.queue.status(limit).await?,
            bundles: self.store.bundle_status_counts().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BundleBuilder;
    use crate::storage::MemoryStorageAdapter;
    use chrono::Duration;
    use ev_core::{AppendRequest, AuditStatus, Sha256Digest};
    use ev_db::{LedgerService, MemoryStore, QueueConfig};

    struct Fixture {
        store: Arc<MemoryStore>,
        storage: Arc<MemoryStorageAdapter>,
        ops: BundleOps,
    }

    async fn fixture(records: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorageAdapter::new());
        let ledger = LedgerService::new(store.clone(), 3);
        for i in 0..records {
            ledger
                .append(AppendRequest {
                    tenant_id: "tenant-a".to_string(),
                    transaction_id: format!("tx-{}", i),
                    input_hash: Sha256Digest::hash(b"in"),
                    output_hash: Sha256Digest::hash(b"out"),
                    context_hash: Sha256Digest::hash(b"ctx"),
                })
                .await
                .unwrap();
        }
        let queue = JobQueue::new(store.clone(), QueueConfig::default());
        let ops = BundleOps::new(store.clone(), queue, storage.clone(), WorkerConfig::default());
        Fixture { store, storage, ops }
    }

    fn request() -> BundleRequest {
        BundleRequest {
            tenant_id: "tenant-a".to_string(),
            date_filter: DateFilter::default(),
            purpose: "regulator inquiry".to_string(),
            created_by: Some("owner@example.com".to_string()),
            disclosure: DisclosureLevel::HashesOnly,
            legal_hold: false,
            retention_until: None,
        }
    }

    async fn ready_bundle(f: &Fixture) -> EvidenceBundle {
        let bundle = f.ops.request_bundle(request()).await.unwrap();
        BundleBuilder::new(f.store.clone(), f.storage.clone())
            .build(&bundle.bundle_id, "tenant-a", &DateFilter::default())
            .await
            .unwrap();
        f.ops.get("tenant-a", &bundle.bundle_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_request_creates_pending_bundle_and_job() {
        let f = fixture(3).await;
        let bundle = f.ops.request_bundle(request()).await.unwrap();

        assert_eq!(bundle.status, BundleStatus::Pending);
        assert_eq!(bundle.record_count, 3);
        assert!(bundle.bundle_id.starts_with("bundle_"));
        assert_eq!(bundle.bundle_id.len(), "bundle_".len() + 32);
        let retention = bundle.expires_at.unwrap() - bundle.created_at;
        assert_eq!(retention.num_days(), 90);

        let status = f.ops.status(10).await.unwrap();
        assert_eq!(status.queue.counts.pending, 1);
        assert_eq!(status.bundles.pending, 1);
        assert_eq!(status.queue.due[0].dedupe_key.as_deref(), Some(bundle.bundle_id.as_str()));

        let events = f.store.audit_events().await;
        assert!(events
            .iter()
            .any(|e| e.action == actions::BUNDLE_CREATE && e.resource_id.as_deref() == Some(bundle.bundle_id.as_str())));
    }

    #[tokio::test]
    async fn test_request_validation() {
        let f = fixture(0).await;
        let err = f.ops.request_bundle(request()).await.unwrap_err();
        assert!(matches!(err, EvidenceError::EmptyRange { .. }));

        let mut bad = request();
        bad.tenant_id = "ab".to_string();
        assert!(matches!(f.ops.request_bundle(bad).await, Err(EvidenceError::Validation(_))));

        let mut bad = request();
        bad.purpose = "  ".to_string();
        assert!(matches!(f.ops.request_bundle(bad).await, Err(EvidenceError::Validation(_))));

        let mut bad = request();
        bad.date_filter = DateFilter::new(Some(Utc::now()), Some(Utc::now() - Duration::days(1)));
        assert!(matches!(f.ops.request_bundle(bad).await, Err(EvidenceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_request_rate_limit() {
        let f = fixture(1).await;
        for _ in 0..10 {
            f.ops.request_bundle(request()).await.unwrap();
        }
        let err = f.ops.request_bundle(request()).await.unwrap_err();
        assert!(matches!(err, EvidenceError::RateLimited { limit: 10, .. }));

        let denied = f
            .store
            .audit_events()
            .await
            .into_iter()
            .filter(|e| e.status == AuditStatus::Denied)
            .count();
        assert_eq!(denied, 1);
    }

    #[tokio::test]
    async fn test_reprocess_rules() {
        let f = fixture(2).await;

        let ready = ready_bundle(&f).await;
        let err = f.ops.reprocess("tenant-a", &ready.bundle_id, None).await.unwrap_err();
        assert!(matches!(err, EvidenceError::Validation(_)));

        let mut processing = f.ops.request_bundle(request()).await.unwrap();
        processing.status = BundleStatus::Processing;
        processing.updated_at = Utc::now();
        f.store.overwrite_bundle(processing.clone()).await;
        let err = f.ops.reprocess("tenant-a", &processing.bundle_id, None).await.unwrap_err();
        assert!(matches!(err, EvidenceError::Conflict(_)));

        processing.updated_at = Utc::now() - Duration::minutes(20);
        f.store.overwrite_bundle(processing.clone()).await;
        let outcome = f.ops.reprocess("tenant-a", &processing.bundle_id, Some("admin")).await.unwrap();
        assert_eq!(outcome.jobs_reset, 1);
        assert!(!outcome.enqueued);

        // Reprocess never touches the row itself
        let after = f.ops.get("tenant-a", &processing.bundle_id).await.unwrap();
        assert_eq!(after.status, BundleStatus::Processing);

        let reprocess_events = f
            .store
            .audit_events()
            .await
            .into_iter()
            .filter(|e| e.action == actions::BUNDLE_REPROCESS)
            .count();
        assert_eq!(reprocess_events, 1);
    }

    #[tokio::test]
    async fn test_reprocess_enqueues_when_job_is_gone() {
        let f = fixture(1).await;
        let mut bundle = f.ops.request_bundle(request()).await.unwrap();
        let job = f.ops.queue().claim_next(None).await.unwrap().unwrap();
        f.ops.queue().move_to_dead_letter(&job, "boom").await.unwrap();

        bundle.status = BundleStatus::Failed;
        f.store.overwrite_bundle(bundle.clone()).await;

        let outcome = f.ops.reprocess("tenant-a", &bundle.bundle_id, None).await.unwrap();
        assert_eq!(outcome.jobs_reset, 0);
        assert!(outcome.enqueued);
        assert_eq!(f.ops.queue().status(10).await.unwrap().counts.pending, 1);
    }

    #[tokio::test]
    async fn test_record_access() {
        let f = fixture(1).await;
        let pending = f.ops.request_bundle(request()).await.unwrap();
        assert!(f.ops.record_access("tenant-a", &pending.bundle_id, None, None).await.is_err());

        let ready = ready_bundle(&f).await;
        let grant = f
            .ops
            .record_access("tenant-a", &ready.bundle_id, Some("auditor"), Some("10.0.0.1"))
            .await
            .unwrap();
        assert!(grant.url.contains("manifest.json"));

        let after = f.ops.get("tenant-a", &ready.bundle_id).await.unwrap();
        assert!(after.accessed_at.is_some());
        assert_eq!(after.bundle_hash, ready.bundle_hash);

        let downloads: Vec<_> = f
            .store
            .audit_events()
            .await
            .into_iter()
            .filter(|e| e.action == actions::BUNDLE_DOWNLOADED)
            .collect();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].ip_address.as_deref(), Some("10.0.0.1"));

        assert!(matches!(
            f.ops.record_access("other-tenant", &ready.bundle_id, None, None).await,
            Err(EvidenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_disclosure() {
        let f = fixture(1).await;
        let ready = ready_bundle(&f).await;
        f.ops
            .record_disclosure("tenant-a", &ready.bundle_id, "Data Protection Authority", Some("counsel"))
            .await
            .unwrap();
        assert!(f.ops.record_disclosure("tenant-a", &ready.bundle_id, " ", None).await.is_err());

        let events = f.store.audit_events().await;
        let disclosure = events
            .iter()
            .find(|e| e.action == actions::BUNDLE_SENT_TO_REGULATOR)
            .unwrap();
        assert_eq!(disclosure.metadata_str("recipient"), Some("Data Protection Authority"));
    }

    #[tokio::test]
    async fn test_cleanup_respects_dry_run_and_legal_hold() {
        let f = fixture(2).await;
        let mut expired = ready_bundle(&f).await;
        expired.expires_at = Some(Utc::now() - Duration::days(1));
        f.store.overwrite_bundle(expired.clone()).await;

        let mut held = ready_bundle(&f).await;
        held.expires_at = Some(Utc::now() - Duration::days(1));
        held.legal_hold = true;
        f.store.overwrite_bundle(held.clone()).await;

        let dry = f.ops.cleanup_expired(true, 100).await.unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.entries.len(), 1);
        assert_eq!(dry.entries[0].keys.len(), 2);
        let manifest_key = expired.storage_key.clone().unwrap();
        assert!(f.storage.exists(&manifest_key).await.unwrap());

        let report = f.ops.cleanup_expired(false, 100).await.unwrap();
        assert_eq!(report.cleaned(), 1);
        assert!(!f.storage.exists(&manifest_key).await.unwrap());
        assert!(f.storage.exists(held.storage_key.as_deref().unwrap()).await.unwrap());

        let after = f.ops.get("tenant-a", &expired.bundle_id).await.unwrap();
        assert_eq!(after.status, BundleStatus::Ready);
        assert_eq!(after.bundle_hash, expired.bundle_hash);

        let cleanups = f
            .store
            .audit_events()
            .await
            .into_iter()
            .filter(|e| e.action == actions::BUNDLE_CLEANUP)
            .count();
        assert_eq!(cleanups, 1);
    }
}
