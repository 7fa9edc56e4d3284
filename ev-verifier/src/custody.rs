//! Chain-of-custody report
//!
//! Rebuilds the handling history of a bundle from the audit log and
//! re-checks its integrity against the ledger and stored artifacts.
//! Read-only: building a report writes nothing, not even an audit event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::error::VerifierResult;
use ev_bundle::{aggregate_hash, manifest_hash_of_value, BundleMetadata, StorageAdapter, StorageError};
use ev_core::logging::{fields, operations, LogContext};
use ev_core::time::to_iso;
use ev_core::{
    AuditEvent, AuditStatus, BundleStatus, EvidenceBundle, EvidenceError, Sha256Digest,
};
use ev_db::{AuditLog, LedgerService, SharedStore};
use ev_signer::{fingerprint, verify_signature};

/// Coarse classification of a custody event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustodyEventType {
    Access,
    Export,
    Disclosure,
}

impl CustodyEventType {
    pub fn classify(action: &str) -> Self {
        let action = action.to_ascii_uppercase();
        let any = |words: &[&str]| words.iter().any(|w| action.contains(w));

        if any(&["VIEWED", "ACCESSED"]) {
            CustodyEventType::Access
        } else if any(&["DOWNLOADED", "EXPORTED", "CREATE"]) {
            CustodyEventType::Export
        } else if any(&["REGULATOR", "COUNSEL", "DISCLOSURE"]) {
            CustodyEventType::Disclosure
        } else {
            CustodyEventType::Access
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodyEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: CustodyEventType,
    pub action: String,
    pub actor: Option<String>,
    pub resource_id: Option<String>,
    pub status: AuditStatus,
    pub ip_address: Option<String>,
    pub details: Value,
}

impl From<AuditEvent> for CustodyEvent {
    fn from(event: AuditEvent) -> Self {
        Self {
            event_type: CustodyEventType::classify(&event.action),
            timestamp: event.timestamp,
            action: event.action,
            actor: event.user_id,
            resource_id: event.resource_id,
            status: event.status,
            ip_address: event.ip_address,
            details: event.metadata,
        }
    }
}

/// Signature attached to the bundle
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodySignature {
    pub key_id: String,
    pub algorithm: String,
    pub public_key_fingerprint: String,
    pub signed_at: DateTime<Utc>,
    /// `None` unless a public key was supplied
    pub valid: Option<bool>,
}

/// Overall integrity verdict, named after the first failing check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityStatus {
    Verified,
    NotReady,
    ChainBroken,
    BundleHashMismatch,
    ManifestHashMismatch,
    SignatureInvalid,
}

impl IntegrityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityStatus::Verified => "VERIFIED",
            IntegrityStatus::NotReady => "NOT_READY",
            IntegrityStatus::ChainBroken => "CHAIN_BROKEN",
            IntegrityStatus::BundleHashMismatch => "BUNDLE_HASH_MISMATCH",
            IntegrityStatus::ManifestHashMismatch => "MANIFEST_HASH_MISMATCH",
            IntegrityStatus::SignatureInvalid => "SIGNATURE_INVALID",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityChecks {
    pub chain_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_broken_at: Option<u64>,
    pub bundle_hash_valid: bool,
    /// `None` when the stored manifest could not be read
    pub manifest_hash_valid: Option<bool>,
    /// `None` when no public key was supplied or the bundle is unsigned
    pub signature_valid: Option<bool>,
}

impl IntegrityChecks {
    fn status(&self) -> IntegrityStatus {
        if !self.chain_valid {
            IntegrityStatus::ChainBroken
        } else if !self.bundle_hash_valid {
            IntegrityStatus::BundleHashMismatch
        } else if self.manifest_hash_valid == Some(false) {
            IntegrityStatus::ManifestHashMismatch
        } else if self.signature_valid == Some(false) {
            IntegrityStatus::SignatureInvalid
        } else {
            IntegrityStatus::Verified
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodyReport {
    pub bundle_id: String,
    pub tenant_id: String,
    pub generated_at: DateTime<Utc>,
    pub generated_by: Option<String>,
    pub events: Vec<CustodyEvent>,
    pub signatures: Vec<CustodySignature>,
    pub integrity_status: IntegrityStatus,
    pub integrity_checks: IntegrityChecks,
    pub record_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub legal_hold: bool,
    pub warnings: Vec<String>,
}

/// Builds custody reports
pub struct CustodyService {
    store: SharedStore,
    storage: Arc<dyn StorageAdapter>,
    ledger: LedgerService,
    audit: AuditLog,
    public_key: Option<String>,
}

impl CustodyService {
    pub fn new(store: SharedStore, storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            ledger: LedgerService::new(store.clone(), 0),
            audit: AuditLog::new(store.clone()),
            store,
            storage,
            public_key: None,
        }
    }

    /// Also verify the bundle signature against this SPKI PEM
    pub fn with_public_key(mut self, pem: impl Into<String>) -> Self {
        self.public_key = Some(pem.into());
        self
    }

    /// Build the report for `bundle_id`. With `tenant_id` the lookup is
    /// scoped to that tenant.
    pub async fn build_report(
        &self,
        bundle_id: &str,
        tenant_id: Option<&str>,
        generated_by: Option<&str>,
    ) -> VerifierResult<CustodyReport> {
        let bundle = match tenant_id {
            Some(tenant) => self.store.get_bundle(tenant, bundle_id).await?,
            None => self.store.find_bundle(bundle_id).await?,
        }
        .ok_or_else(|| EvidenceError::not_found(format!("bundle {}", bundle_id)))?;

        let span = LogContext::new()
            .with_operation(operations::CUSTODY_REPORT)
            .with_tenant_id(bundle.tenant_id.clone())
            .with_tag(fields::BUNDLE_ID, bundle_id)
            .span();
        self.assemble(bundle, generated_by).instrument(span).await
    }

    async fn assemble(
        &self,
        bundle: EvidenceBundle,
        generated_by: Option<&str>,
    ) -> VerifierResult<CustodyReport> {
        let tenant_id = bundle.tenant_id.as_str();
        let mut warnings = Vec::new();

        // Source records: the bundled sequence span inside the date filter
        let mut records = self
            .store
            .records_in_range(tenant_id, &bundle.date_filter())
            .await?;
        if let (Some(first), Some(last)) = (bundle.first_sequence, bundle.last_sequence) {
            records.retain(|r| r.sequence >= first && r.sequence <= last);
        }

        let mut resource_ids = vec![bundle.bundle_id.clone()];
        resource_ids.extend(records.iter().map(|r| r.id.to_string()));
        let mut events: Vec<CustodyEvent> = self
            .audit
            .events_for(&resource_ids)
            .await?
            .into_iter()
            .map(CustodyEvent::from)
            .collect();
        events.sort_by_key(|e| e.timestamp);

        let mut checks = IntegrityChecks::default();
        let integrity_status = if bundle.status != BundleStatus::Ready {
            IntegrityStatus::NotReady
        } else {
            self.check_chain(&bundle, &mut checks).await?;

            let pairs: Vec<(u64, Sha256Digest)> =
                records.iter().map(|r| (r.sequence, r.record_hash)).collect();
            let metadata = BundleMetadata {
                tenant_id: tenant_id.to_string(),
                date_from: bundle.date_from.as_ref().map(to_iso),
                date_to: bundle.date_to.as_ref().map(to_iso),
                record_count: bundle.record_count,
            };
            let recomputed = aggregate_hash(&metadata, &pairs)?;
            checks.bundle_hash_valid = pairs.len() as u64 == bundle.record_count
                && bundle.bundle_hash == Some(recomputed);

            checks.manifest_hash_valid = self.check_manifest(&bundle, &mut warnings).await;
            checks.signature_valid = self.check_signature(&bundle, &mut warnings)?;
            checks.status()
        };

        let signatures = bundle
            .signature
            .iter()
            .map(|s| CustodySignature {
                key_id: s.key_id.clone(),
                algorithm: s.algorithm.clone(),
                public_key_fingerprint: s.public_key_fingerprint.clone(),
                signed_at: s.signed_at,
                valid: checks.signature_valid,
            })
            .collect();

        info!(
            tenant_id,
            bundle_id = %bundle.bundle_id,
            events = events.len(),
            status = integrity_status.as_str(),
            "Custody report built"
        );

        Ok(CustodyReport {
            bundle_id: bundle.bundle_id,
            tenant_id: bundle.tenant_id,
            generated_at: Utc::now(),
            generated_by: generated_by.map(str::to_string),
            events,
            signatures,
            integrity_status,
            integrity_checks: checks,
            record_count: bundle.record_count,
            created_at: bundle.created_at,
            last_accessed_at: bundle.accessed_at,
            legal_hold: bundle.legal_hold,
            warnings,
        })
    }

    async fn check_chain(
        &self,
        bundle: &EvidenceBundle,
        checks: &mut IntegrityChecks,
    ) -> VerifierResult<()> {
        let (first, last) = match (bundle.first_sequence, bundle.last_sequence) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(()),
        };
        let verification = self.ledger.verify_chain(&bundle.tenant_id, first, last).await?;
        checks.chain_valid = verification.valid;
        checks.chain_broken_at = verification.broken_at;
        Ok(())
    }

    async fn check_manifest(&self, bundle: &EvidenceBundle, warnings: &mut Vec<String>) -> Option<bool> {
        let key = bundle.storage_key.as_deref()?;
        let expected = bundle.manifest_hash?;

        let bytes = match self.storage.get(key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                warnings.push(format!("manifest {} is no longer in storage", key));
                return None;
            }
            Err(e) => {
                warn!(storage_key = key, error = %e, "Manifest unreadable");
                warnings.push(format!("manifest {} could not be read: {}", key, e));
                return None;
            }
        };

        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_) => return Some(false),
        };
        Some(matches!(manifest_hash_of_value(&value), Ok(h) if h == expected))
    }

    fn check_signature(
        &self,
        bundle: &EvidenceBundle,
        warnings: &mut Vec<String>,
    ) -> VerifierResult<Option<bool>> {
        let pem = match &self.public_key {
            Some(pem) => pem,
            None => return Ok(None),
        };
        let (signature, hash) = match (&bundle.signature, &bundle.bundle_hash) {
            (Some(signature), Some(hash)) => (signature, hash),
            _ => {
                warnings.push("bundle is unsigned".to_string());
                return Ok(None);
            }
        };

        if signature.public_key_fingerprint != fingerprint(pem) {
            warnings.push("signature names a different key".to_string());
            return Ok(Some(false));
        }
        Ok(Some(verify_signature(pem, hash.as_bytes(), &signature.value)?))
    }
}

/// Plain-text rendering of a custody report
pub fn format_text(report: &CustodyReport) -> String {
    let mut out = String::new();
    let checks = &report.integrity_checks;
    let optional = |v: Option<bool>| v.map_or("not checked".to_string(), |b| b.to_string());

    let _ = writeln!(out, "CHAIN OF CUSTODY REPORT");
    let _ = writeln!(out, "=======================");
    let _ = writeln!(out, "Bundle:        {}", report.bundle_id);
    let _ = writeln!(out, "Tenant:        {}", report.tenant_id);
    let _ = writeln!(out, "Generated:     {}", to_iso(&report.generated_at));
    if let Some(by) = &report.generated_by {
        let _ = writeln!(out, "Generated by:  {}", by);
    }
    let _ = writeln!(out, "Created:       {}", to_iso(&report.created_at));
    if let Some(at) = &report.last_accessed_at {
        let _ = writeln!(out, "Last accessed: {}", to_iso(at));
    }
    let _ = writeln!(out, "Records:       {}", report.record_count);
    let _ = writeln!(out, "Legal hold:    {}", report.legal_hold);
    let _ = writeln!(out);

    let _ = writeln!(out, "INTEGRITY: {}", report.integrity_status.as_str());
    let _ = writeln!(out, "  chain valid:         {}", checks.chain_valid);
    if let Some(at) = checks.chain_broken_at {
        let _ = writeln!(out, "  chain broken at:     {}", at);
    }
    let _ = writeln!(out, "  bundle hash valid:   {}", checks.bundle_hash_valid);
    let _ = writeln!(out, "  manifest hash valid: {}", optional(checks.manifest_hash_valid));
    let _ = writeln!(out, "  signature valid:     {}", optional(checks.signature_valid));
    let _ = writeln!(out);

    let _ = writeln!(out, "SIGNATURES ({})", report.signatures.len());
    for sig in &report.signatures {
        let _ = writeln!(
            out,
            "  {} {} key={} fingerprint={}",
            to_iso(&sig.signed_at),
            sig.algorithm,
            sig.key_id,
            sig.public_key_fingerprint
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "EVENTS ({})", report.events.len());
    for event in &report.events {
        let _ = writeln!(
            out,
            "  {} {:<10} {} [{}] by {}",
            to_iso(&event.timestamp),
            format!("{:?}", event.event_type).to_uppercase(),
            event.action,
            event.status.as_str(),
            event.actor.as_deref().unwrap_or("system")
        );
    }

    for warning in &report.warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
    out
}
