//! Bundle builder
//!
//! Turns a tenant's record range into stored artifacts and a READY bundle
//! row. Safe to run more than once for the same bundle:
//! - a READY bundle is returned untouched, with no storage writes
//! - artifacts go to fixed keys under `bundles/{tenant}/{bundleId}/`, so a
//!   retry after a partial run overwrites instead of forking

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

use crate::aggregate::{aggregate_hash, BundleMetadata};
use crate::manifest::{
    object_key, BundleManifest, ManifestFile, ManifestRecord, MANIFEST_FILE, MANIFEST_VERSION,
    RECORDS_FILE, VERIFY_FILE,
};
use crate::procedure::{render_verify_md, VerificationProcedure};
use crate::storage::StorageAdapter;
use ev_core::logging::{fields, operations, LogContext};
use ev_core::time::to_iso;
use ev_core::types::audit::{actions, resource_types};
use ev_core::{
    AuditEvent, BundleStatus, DateFilter, DecisionRecord, DisclosureLevel, EvidenceBundle,
    EvidenceError, EvidenceResult, ReadyUpdate, Sha256Digest,
};
use ev_db::{AuditLog, SharedStore};
use ev_signer::SigningService;

/// Result of a build call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Artifacts written and bundle marked READY
    Built {
        bundle_hash: Sha256Digest,
        manifest_hash: Sha256Digest,
        record_count: u64,
        storage_key: String,
        signed: bool,
    },
    /// Bundle was already READY; nothing written
    AlreadyReady { bundle_hash: Option<Sha256Digest> },
}

/// Bundle builder
#[derive(Clone)]
pub struct BundleBuilder {
    store: SharedStore,
    storage: Arc<dyn StorageAdapter>,
    signer: Option<Arc<SigningService>>,
    audit: AuditLog,
}

impl BundleBuilder {
    pub fn new(store: SharedStore, storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            audit: AuditLog::new(store.clone()),
            store,
            storage,
            signer: None,
        }
    }

    /// Sign each bundle's aggregate hash
    pub fn with_signer(mut self, signer: Arc<SigningService>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn storage(&self) -> Arc<dyn StorageAdapter> {
        self.storage.clone()
    }

    /// Build one bundle. Failures leave the bundle FAILED with the error
    /// text and are returned for the queue's retry path.
    pub async fn build(
        &self,
        bundle_id: &str,
        tenant_id: &str,
        date_filter: &DateFilter,
    ) -> EvidenceResult<BuildOutcome> {
        let bundle = self
            .store
            .get_bundle(tenant_id, bundle_id)
            .await?
            .ok_or_else(|| EvidenceError::not_found(format!("bundle {}", bundle_id)))?;

        if bundle.status == BundleStatus::Ready {
            info!(tenant_id, bundle_id, "Bundle already READY, skipping build");
            return Ok(BuildOutcome::AlreadyReady {
                bundle_hash: bundle.bundle_hash,
            });
        }

        self.store.mark_processing(bundle.id).await?;
        debug!(tenant_id, bundle_id, "Bundle PROCESSING");

        let span = LogContext::new()
            .with_operation(operations::BUNDLE_BUILD)
            .with_tenant_id(tenant_id)
            .with_tag(fields::BUNDLE_ID, bundle_id)
            .span();
        match self.build_artifacts(&bundle, date_filter).instrument(span).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(tenant_id, bundle_id, error = %e, "Bundle build failed");
                if let Err(mark_err) = self.store.mark_failed(bundle.id, &e.to_string()).await {
                    warn!(
                        tenant_id,
                        bundle_id,
                        error = %mark_err,
                        "Failed to mark bundle FAILED"
                    );
                }
                Err(e)
            }
        }
    }

    async fn build_artifacts(
        &self,
        bundle: &EvidenceBundle,
        date_filter: &DateFilter,
    ) -> EvidenceResult<BuildOutcome> {
        let tenant_id = bundle.tenant_id.as_str();
        let bundle_id = bundle.bundle_id.as_str();

        let mut records = self.store.records_in_range(tenant_id, date_filter).await?;
        if records.is_empty() {
            return Err(EvidenceError::EmptyRange {
                tenant_id: tenant_id.to_string(),
            });
        }
        records.sort_by_key(|r| r.sequence);
        let record_count = records.len() as u64;
        let first_sequence = records[0].sequence;
        let last_sequence = records[records.len() - 1].sequence;

        let metadata = BundleMetadata {
            tenant_id: tenant_id.to_string(),
            date_from: date_filter.gte.as_ref().map(to_iso),
            date_to: date_filter.lte.as_ref().map(to_iso),
            record_count,
        };
        let pairs: Vec<(u64, Sha256Digest)> =
            records.iter().map(|r| (r.sequence, r.record_hash)).collect();
        let aggregate = aggregate_hash(&metadata, &pairs)?;
        debug!(tenant_id, bundle_id, record_count, aggregate = %aggregate, "Aggregate hash computed");

        let signature = match &self.signer {
            Some(signer) => Some(
                signer
                    .sign_bundle(tenant_id, bundle_id, &aggregate, bundle.created_by.as_deref())
                    .await?,
            ),
            None => None,
        };

        // Payload files first, manifest last: a manifest in storage means
        // every file it lists is there too
        let mut files = Vec::new();

        if bundle.disclosure == DisclosureLevel::Full {
            let body = serde_json::to_vec_pretty(&disclosed_records(&records))?;
            let stored = self
                .storage
                .put(&object_key(tenant_id, bundle_id, RECORDS_FILE), &body, "application/json")
                .await?;
            files.push(ManifestFile {
                path: RECORDS_FILE.to_string(),
                sha256: stored.sha256,
                size: stored.size,
            });
        }

        let verify_md = render_verify_md(bundle_id, tenant_id, &aggregate, signature.as_ref());
        let stored = self
            .storage
            .put(
                &object_key(tenant_id, bundle_id, VERIFY_FILE),
                verify_md.as_bytes(),
                "text/markdown",
            )
            .await?;
        files.push(ManifestFile {
            path: VERIFY_FILE.to_string(),
            sha256: stored.sha256,
            size: stored.size,
        });

        let manifest = BundleManifest {
            version: MANIFEST_VERSION.to_string(),
            bundle_id: bundle_id.to_string(),
            tenant_id: tenant_id.to_string(),
            generated_at: to_iso(&Utc::now()),
            date_from: metadata.date_from.clone(),
            date_to: metadata.date_to.clone(),
            record_count,
            records: records
                .iter()
                .map(|r| ManifestRecord {
                    sequence: r.sequence,
                    record_hash: r.record_hash,
                    timestamp: to_iso(&r.timestamp),
                })
                .collect(),
            aggregate_hash: aggregate,
            signature: signature.clone(),
            files,
            verification: VerificationProcedure::default(),
            manifest_hash: None,
        }
        .finalize()?;
        let manifest_hash = manifest
            .manifest_hash
            .ok_or_else(|| EvidenceError::integrity("manifest hash missing after finalize"))?;

        let storage_key = object_key(tenant_id, bundle_id, MANIFEST_FILE);
        self.storage
            .put(&storage_key, &manifest.to_json_bytes()?, "application/json")
            .await?;

        self.store
            .mark_ready(
                bundle.id,
                &ReadyUpdate {
                    storage_key: storage_key.clone(),
                    bundle_hash: aggregate,
                    manifest_hash,
                    signature: signature.clone(),
                    record_count,
                    first_sequence,
                    last_sequence,
                    completed_at: Utc::now(),
                },
            )
            .await?;

        info!(
            tenant_id,
            bundle_id,
            record_count,
            bundle_hash = %aggregate,
            storage_key = %storage_key,
            signed = signature.is_some(),
            "Bundle READY"
        );

        self.audit
            .record_after_commit(
                AuditEvent::new(
                    Some(tenant_id),
                    actions::BUNDLE_PROCESS,
                    resource_types::EVIDENCE_BUNDLE,
                    Some(bundle_id),
                )
                .with_user(bundle.created_by.as_deref())
                .with_metadata(json!({
                    "recordCount": record_count,
                    "bundleHash": aggregate.to_prefixed(),
                    "manifestHash": manifest_hash.to_prefixed(),
                    "signed": signature.is_some(),
                })),
            )
            .await;

        Ok(BuildOutcome::Built {
            bundle_hash: aggregate,
            manifest_hash,
            record_count,
            storage_key,
            signed: signature.is_some(),
        })
    }
}

/// Full hash tuple of each record, for FULL disclosure
fn disclosed_records(records: &[DecisionRecord]) -> Vec<serde_json::Value> {
    records
        .iter()
        .map(|r| {
            json!({
                "sequence": r.sequence,
                "transactionId": r.transaction_id,
                "inputHash": r.input_hash,
                "outputHash": r.output_hash,
                "contextHash": r.context_hash,
                "previousHash": r.previous_hash,
                "recordHash": r.record_hash,
                "timestamp": to_iso(&r.timestamp),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorageAdapter;
    use ev_core::AppendRequest;
    use ev_db::{BundleStore, LedgerService, MemoryStore};
    use ev_signer::{verify_signature, LocalKeyBackend, SignerConfig};

    async fn seed(store: &Arc<MemoryStore>, tenant: &str, count: usize) {
        let ledger = LedgerService::new(store.clone(), 3);
        for i in 0..count {
            ledger
                .append(AppendRequest {
                    tenant_id: tenant.to_string(),
                    transaction_id: format!("tx-{}", i),
                    input_hash: Sha256Digest::hash(format!("in-{}", i).as_bytes()),
                    output_hash: Sha256Digest::hash(format!("out-{}", i).as_bytes()),
                    context_hash: Sha256Digest::hash(b"ctx"),
                })
                .await
                .unwrap();
        }
    }

    async fn pending_bundle(store: &Arc<MemoryStore>, tenant: &str, disclosure: DisclosureLevel) -> EvidenceBundle {
        let mut bundle = EvidenceBundle::new_pending(
            "bundle_00000000000000000000000000000001",
            tenant,
            &DateFilter::default(),
            0,
        );
        bundle.disclosure = disclosure;
        store.insert_bundle(&bundle).await.unwrap();
        bundle
    }

    #[tokio::test]
    async fn test_build_writes_artifacts_and_marks_ready() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorageAdapter::new());
        seed(&store, "tenant-a", 3).await;
        let bundle = pending_bundle(&store, "tenant-a", DisclosureLevel::HashesOnly).await;

        let builder = BundleBuilder::new(store.clone(), storage.clone());
        let outcome = builder
            .build(&bundle.bundle_id, "tenant-a", &DateFilter::default())
            .await
            .unwrap();

        let BuildOutcome::Built { bundle_hash, manifest_hash, record_count, storage_key, signed } = outcome else {
            panic!("expected a fresh build");
        };
        assert_eq!(record_count, 3);
        assert!(!signed);
        assert_eq!(
            storage.keys().await,
            vec![
                format!("bundles/tenant-a/{}/VERIFY.md", bundle.bundle_id),
                format!("bundles/tenant-a/{}/manifest.json", bundle.bundle_id),
            ]
        );

        let stored = store.get_bundle("tenant-a", &bundle.bundle_id).await.unwrap().unwrap();
        assert_eq!(stored.status, BundleStatus::Ready);
        assert_eq!(stored.bundle_hash, Some(bundle_hash));
        assert_eq!(stored.manifest_hash, Some(manifest_hash));
        assert_eq!(stored.storage_key.as_deref(), Some(storage_key.as_str()));
        assert_eq!((stored.first_sequence, stored.last_sequence), (Some(1), Some(3)));

        let manifest = BundleManifest::from_json_bytes(&storage.get(&storage_key).await.unwrap()).unwrap();
        assert_eq!(manifest.recompute_aggregate().unwrap(), bundle_hash);
        assert_eq!(manifest.compute_manifest_hash().unwrap(), manifest_hash);
        assert_eq!(manifest.records.len(), 3);
    }

    #[tokio::test]
    async fn test_ready_bundle_rebuild_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorageAdapter::new());
        seed(&store, "tenant-a", 2).await;
        let bundle = pending_bundle(&store, "tenant-a", DisclosureLevel::HashesOnly).await;
        let builder = BundleBuilder::new(store.clone(), storage.clone());

        builder.build(&bundle.bundle_id, "tenant-a", &DateFilter::default()).await.unwrap();
        let first = store.get_bundle("tenant-a", &bundle.bundle_id).await.unwrap().unwrap();
        let writes = storage.write_count();

        let again = builder
            .build(&bundle.bundle_id, "tenant-a", &DateFilter::default())
            .await
            .unwrap();

        assert_eq!(again, BuildOutcome::AlreadyReady { bundle_hash: first.bundle_hash });
        assert_eq!(storage.write_count(), writes);
        let second = store.get_bundle("tenant-a", &bundle.bundle_id).await.unwrap().unwrap();
        assert_eq!(second.bundle_hash, first.bundle_hash);
        assert_eq!(second.completed_at, first.completed_at);
    }

    #[tokio::test]
    async fn test_full_disclosure_adds_records_file() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorageAdapter::new());
        seed(&store, "tenant-a", 2).await;
        let bundle = pending_bundle(&store, "tenant-a", DisclosureLevel::Full).await;

        BundleBuilder::new(store.clone(), storage.clone())
            .build(&bundle.bundle_id, "tenant-a", &DateFilter::default())
            .await
            .unwrap();

        let key = object_key("tenant-a", &bundle.bundle_id, RECORDS_FILE);
        let body = storage.get(&key).await.unwrap();
        let disclosed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(disclosed.len(), 2);
        assert_eq!(disclosed[0]["transactionId"], "tx-0");

        let manifest_key = object_key("tenant-a", &bundle.bundle_id, MANIFEST_FILE);
        let manifest = BundleManifest::from_json_bytes(&storage.get(&manifest_key).await.unwrap()).unwrap();
        let listed = manifest.file(RECORDS_FILE).unwrap();
        assert_eq!(listed.sha256, Sha256Digest::hash(&body));
        assert_eq!(listed.size, body.len() as u64);
    }

    #[tokio::test]
    async fn test_empty_range_marks_failed() {
        let store = Arc::new(MemoryStore::new());
        let bundle = pending_bundle(&store, "tenant-a", DisclosureLevel::HashesOnly).await;

        let err = BundleBuilder::new(store.clone(), Arc::new(MemoryStorageAdapter::new()))
            .build(&bundle.bundle_id, "tenant-a", &DateFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EvidenceError::EmptyRange { .. }));

        let stored = store.get_bundle("tenant-a", &bundle.bundle_id).await.unwrap().unwrap();
        assert_eq!(stored.status, BundleStatus::Failed);
        assert!(stored.error_message.unwrap().contains("No records"));
    }

    #[tokio::test]
    async fn test_signed_build_verifies() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorageAdapter::new());
        seed(&store, "tenant-a", 2).await;
        let bundle = pending_bundle(&store, "tenant-a", DisclosureLevel::HashesOnly).await;

        let signer = Arc::new(SigningService::new(
            store.clone(),
            Arc::new(LocalKeyBackend::ephemeral()),
            &SignerConfig::default(),
        ));
        let outcome = BundleBuilder::new(store.clone(), storage.clone())
            .with_signer(signer.clone())
            .build(&bundle.bundle_id, "tenant-a", &DateFilter::default())
            .await
            .unwrap();
        let BuildOutcome::Built { bundle_hash, signed, .. } = outcome else {
            panic!("expected a fresh build");
        };
        assert!(signed);

        let stored = store.get_bundle("tenant-a", &bundle.bundle_id).await.unwrap().unwrap();
        let signature = stored.signature.unwrap();
        let public = signer.public_key().await.unwrap();
        assert_eq!(signature.public_key_fingerprint, public.fingerprint);
        assert!(verify_signature(&public.pem, bundle_hash.as_bytes(), &signature.value).unwrap());
    }
}
