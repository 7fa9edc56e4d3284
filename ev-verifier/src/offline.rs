//! Offline bundle verification
//!
//! Needs nothing but the manifest bytes and, optionally, the signer's
//! public key. No store, no network.
//!
//! Checks, in order:
//! 1. `manifestHash` over the canonical manifest without that field
//! 2. `recordCount` against the record list, duplicate sequences
//! 3. aggregate hash recomputed from the record hashes and metadata
//! 4. Ed25519 signature over the 32 aggregate hash bytes, when a key is given
//! 5. listed files (directory mode only)

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn, Instrument};

use crate::error::{VerifierError, VerifierResult};
use ev_bundle::storage::validate_key;
use ev_bundle::{manifest_hash_of_value, BundleManifest, MANIFEST_FILE};
use ev_core::logging::{fields, operations, LogContext};
use ev_core::{Sha256Digest, HASH_PREFIX};
use ev_signer::{fingerprint, verify_signature, EvidenceVerifyingKey, ALGORITHM};

/// One failed check
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationIssue {
    pub code: String,
    pub message: String,
}

impl VerificationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Outcome of the signature check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Valid,
    Invalid,
    /// No public key supplied
    Skipped,
    /// Key supplied, manifest carries no signature
    Unsigned,
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureStatus::Valid => write!(f, "true"),
            SignatureStatus::Invalid => write!(f, "false"),
            SignatureStatus::Skipped => write!(f, "skipped"),
            SignatureStatus::Unsigned => write!(f, "false (unsigned)"),
        }
    }
}

/// Check of one file listed in the manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCheck {
    pub path: String,
    pub present: bool,
    pub hash_match: bool,
    pub size_match: bool,
}

/// Offline verification report
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineReport {
    pub bundle_id: String,
    pub tenant_id: String,
    pub record_count: u64,
    pub declared_aggregate: Sha256Digest,
    pub computed_aggregate: Sha256Digest,
    pub hash_match: bool,
    /// `None` when the manifest carries no `manifestHash`
    pub manifest_hash_match: Option<bool>,
    pub signature: SignatureStatus,
    pub files: Vec<FileCheck>,
    pub errors: Vec<VerificationIssue>,
    pub warnings: Vec<String>,
    pub verified_at: DateTime<Utc>,
}

impl OfflineReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for OfflineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bundle: {}", self.bundle_id)?;
        writeln!(f, "tenant: {}", self.tenant_id)?;
        writeln!(f, "records: {}", self.record_count)?;
        writeln!(f, "declared aggregate: {}", self.declared_aggregate)?;
        writeln!(f, "computed aggregate: {}", self.computed_aggregate)?;
        writeln!(f, "hash match: {}", self.hash_match)?;
        match self.manifest_hash_match {
            Some(matched) => writeln!(f, "manifest hash match: {}", matched)?,
            None => writeln!(f, "manifest hash match: absent")?,
        }
        writeln!(f, "signature valid: {}", self.signature)?;
        for file in &self.files {
            writeln!(
                f,
                "file {}: present={} hash={} size={}",
                file.path, file.present, file.hash_match, file.size_match
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {}", warning)?;
        }
        for error in &self.errors {
            writeln!(f, "error [{}]: {}", error.code, error.message)?;
        }
        write!(f, "result: {}", if self.is_valid() { "VALID" } else { "INVALID" })
    }
}

struct TrustedKey {
    pem: String,
    fingerprint: String,
}

/// Offline verifier
#[derive(Default)]
pub struct OfflineVerifier {
    key: Option<TrustedKey>,
}

fn normalize_fingerprint(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix(HASH_PREFIX)
        .unwrap_or(value)
        .to_ascii_lowercase()
}

impl OfflineVerifier {
    /// Hash-only verifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Check signatures with `public_key_pem`. When `expected_fingerprint`
    /// is given, the key must hash to it.
    pub fn with_public_key(
        mut self,
        public_key_pem: &str,
        expected_fingerprint: Option<&str>,
    ) -> VerifierResult<Self> {
        EvidenceVerifyingKey::from_pem(public_key_pem)?;
        let actual = fingerprint(public_key_pem);

        if let Some(expected) = expected_fingerprint {
            let expected = normalize_fingerprint(expected);
            if expected != actual {
                return Err(VerifierError::FingerprintMismatch { expected, actual });
            }
        }

        self.key = Some(TrustedKey {
            pem: public_key_pem.to_string(),
            fingerprint: actual,
        });
        Ok(self)
    }

    pub fn verify_bytes(&self, manifest: &[u8]) -> VerifierResult<OfflineReport> {
        let value: Value = serde_json::from_slice(manifest)?;
        self.verify_value(&value)
    }

    pub fn verify_value(&self, value: &Value) -> VerifierResult<OfflineReport> {
        let manifest: BundleManifest = serde_json::from_value(value.clone())?;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let manifest_hash_match = match manifest.manifest_hash {
            Some(declared) => {
                let matched = manifest_hash_of_value(value)? == declared;
                if !matched {
                    errors.push(VerificationIssue::new(
                        "MANIFEST_HASH_MISMATCH",
                        "manifestHash does not match the manifest content",
                    ));
                }
                Some(matched)
            }
            None => {
                warnings.push("manifest has no manifestHash".to_string());
                None
            }
        };

        self.check_records(&manifest, &mut errors);

        let computed = manifest.recompute_aggregate()?;
        let hash_match = computed == manifest.aggregate_hash;
        if !hash_match {
            errors.push(VerificationIssue::new(
                "AGGREGATE_HASH_MISMATCH",
                format!(
                    "declared {} but records hash to {}",
                    manifest.aggregate_hash, computed
                ),
            ));
        }

        let signature = self.check_signature(&manifest, &mut errors, &mut warnings)?;

        debug!(
            bundle_id = %manifest.bundle_id,
            hash_match,
            signature = %signature,
            "Manifest verified"
        );

        Ok(OfflineReport {
            bundle_id: manifest.bundle_id,
            tenant_id: manifest.tenant_id,
            record_count: manifest.record_count,
            declared_aggregate: manifest.aggregate_hash,
            computed_aggregate: computed,
            hash_match,
            manifest_hash_match,
            signature,
            files: vec![],
            errors,
            warnings,
            verified_at: Utc::now(),
        })
    }

    /// Verify an unpacked bundle directory: `manifest.json` plus every file
    /// it lists
    pub async fn verify_dir(&self, dir: &Path) -> VerifierResult<OfflineReport> {
        let span = LogContext::new()
            .with_operation(operations::OFFLINE_VERIFY)
            .with_tag(fields::PATH, dir.display().to_string())
            .span();
        self.check_dir(dir).instrument(span).await
    }

    async fn check_dir(&self, dir: &Path) -> VerifierResult<OfflineReport> {
        let bytes = tokio::fs::read(dir.join(MANIFEST_FILE)).await?;
        let mut report = self.verify_bytes(&bytes)?;
        let manifest = BundleManifest::from_json_bytes(&bytes)?;

        for listed in &manifest.files {
            if validate_key(&listed.path).is_err() {
                report.errors.push(VerificationIssue::new(
                    "FILE_PATH_INVALID",
                    format!("{} is not a relative path", listed.path),
                ));
                continue;
            }

            let mut check = FileCheck {
                path: listed.path.clone(),
                present: false,
                hash_match: false,
                size_match: false,
            };
            match tokio::fs::read(dir.join(&listed.path)).await {
                Ok(data) => {
                    check.present = true;
                    check.hash_match = Sha256Digest::hash(&data) == listed.sha256;
                    check.size_match = data.len() as u64 == listed.size;
                    if !check.hash_match || !check.size_match {
                        report.errors.push(VerificationIssue::new(
                            "FILE_HASH_MISMATCH",
                            format!("{} does not match its manifest entry", listed.path),
                        ));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.errors.push(VerificationIssue::new(
                        "FILE_MISSING",
                        format!("{} is listed but missing", listed.path),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
            report.files.push(check);
        }

        info!(
            bundle_id = %report.bundle_id,
            valid = report.is_valid(),
            files = report.files.len(),
            "Bundle directory verified"
        );
        Ok(report)
    }

    fn check_records(&self, manifest: &BundleManifest, errors: &mut Vec<VerificationIssue>) {
        if manifest.records.len() as u64 != manifest.record_count {
            errors.push(VerificationIssue::new(
                "RECORD_COUNT_MISMATCH",
                format!(
                    "recordCount is {} but {} records are listed",
                    manifest.record_count,
                    manifest.records.len()
                ),
            ));
        }

        let mut seen = HashSet::new();
        for record in &manifest.records {
            if !seen.insert(record.sequence) {
                errors.push(VerificationIssue::new(
                    "DUPLICATE_SEQUENCE",
                    format!("sequence {} is listed more than once", record.sequence),
                ));
            }
        }
    }

    fn check_signature(
        &self,
        manifest: &BundleManifest,
        errors: &mut Vec<VerificationIssue>,
        warnings: &mut Vec<String>,
    ) -> VerifierResult<SignatureStatus> {
        let key = match &self.key {
            Some(key) => key,
            None => {
                warnings.push("no public key supplied, hash-only verification".to_string());
                return Ok(SignatureStatus::Skipped);
            }
        };

        let signature = match &manifest.signature {
            Some(signature) => signature,
            None => {
                errors.push(VerificationIssue::new(
                    "SIGNATURE_MISSING",
                    "a public key was supplied but the manifest is unsigned",
                ));
                return Ok(SignatureStatus::Unsigned);
            }
        };

        if signature.algorithm != ALGORITHM {
            errors.push(VerificationIssue::new(
                "UNSUPPORTED_ALGORITHM",
                format!("signature algorithm {} is not {}", signature.algorithm, ALGORITHM),
            ));
            return Ok(SignatureStatus::Invalid);
        }

        if normalize_fingerprint(&signature.public_key_fingerprint) != key.fingerprint {
            warn!(
                declared = %signature.public_key_fingerprint,
                trusted = %key.fingerprint,
                "Manifest names a different signing key"
            );
            warnings.push(format!(
                "manifest names key fingerprint {}, checking against {}",
                signature.public_key_fingerprint, key.fingerprint
            ));
        }

        if verify_signature(&key.pem, manifest.aggregate_hash.as_bytes(), &signature.value)? {
            Ok(SignatureStatus::Valid)
        } else {
            errors.push(VerificationIssue::new(
                "SIGNATURE_INVALID",
                "signature does not verify over the aggregate hash",
            ));
            Ok(SignatureStatus::Invalid)
        }
    }
}
