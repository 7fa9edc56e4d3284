//! Bundle manifest
//!
//! The manifest is the portable part of a bundle: record hashes, the
//! aggregate hash, the optional signature, a file list and the embedded
//! verification procedure. `manifestHash` is the SHA-256 of the canonical
//! manifest with the `manifestHash` field itself removed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{aggregate_hash, BundleMetadata};
use crate::procedure::VerificationProcedure;
use ev_core::{canonical_json, BundleSignature, EvidenceError, EvidenceResult, Sha256Digest};

pub const MANIFEST_VERSION: &str = "1.0";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const VERIFY_FILE: &str = "VERIFY.md";
pub const RECORDS_FILE: &str = "records.json";

const MANIFEST_HASH_FIELD: &str = "manifestHash";

/// Storage key prefix of a bundle
pub fn bundle_prefix(tenant_id: &str, bundle_id: &str) -> String {
    format!("bundles/{}/{}", tenant_id, bundle_id)
}

/// Storage key of one bundle file
pub fn object_key(tenant_id: &str, bundle_id: &str, file: &str) -> String {
    format!("{}/{}", bundle_prefix(tenant_id, bundle_id), file)
}

/// One record entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    pub sequence: u64,
    pub record_hash: Sha256Digest,
    pub timestamp: String,
}

/// A file shipped beside the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub path: String,
    pub sha256: Sha256Digest,
    pub size: u64,
}

/// Manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub version: String,
    pub bundle_id: String,
    pub tenant_id: String,
    pub generated_at: String,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    pub record_count: u64,
    pub records: Vec<ManifestRecord>,
    pub aggregate_hash: Sha256Digest,
    #[serde(default)]
    pub signature: Option<BundleSignature>,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
    #[serde(default)]
    pub verification: VerificationProcedure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<Sha256Digest>,
}

impl BundleManifest {
    /// Metadata bound into the aggregate hash, as declared by the manifest
    pub fn metadata(&self) -> BundleMetadata {
        BundleMetadata {
            tenant_id: self.tenant_id.clone(),
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            record_count: self.record_count,
        }
    }

    /// Recompute the aggregate hash from the record list and metadata
    pub fn recompute_aggregate(&self) -> EvidenceResult<Sha256Digest> {
        let records: Vec<(u64, Sha256Digest)> = self
            .records
            .iter()
            .map(|r| (r.sequence, r.record_hash))
            .collect();
        aggregate_hash(&self.metadata(), &records)
    }

    pub fn compute_manifest_hash(&self) -> EvidenceResult<Sha256Digest> {
        manifest_hash_of_value(&serde_json::to_value(self)?)
    }

    /// Set `manifest_hash` over the current content
    pub fn finalize(mut self) -> EvidenceResult<Self> {
        self.manifest_hash = None;
        self.manifest_hash = Some(self.compute_manifest_hash()?);
        Ok(self)
    }

    pub fn to_json_bytes(&self) -> EvidenceResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_bytes(data: &[u8]) -> EvidenceResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| EvidenceError::validation(format!("malformed manifest: {}", e)))
    }

    pub fn file(&self, path: &str) -> Option<&ManifestFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// `manifestHash` of a raw manifest document. Works on the parsed JSON so
/// fields this version does not know about are still covered.
pub fn manifest_hash_of_value(manifest: &Value) -> EvidenceResult<Sha256Digest> {
    let mut value = manifest.clone();
    match value.as_object_mut() {
        Some(map) => {
            map.remove(MANIFEST_HASH_FIELD);
        }
        None => return Err(EvidenceError::validation("manifest is not a JSON object")),
    }
    Ok(Sha256Digest::hash(canonical_json(&value).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BundleManifest {
        let records: Vec<ManifestRecord> = (1..=3)
            .map(|i| ManifestRecord {
                sequence: i,
                record_hash: Sha256Digest::hash(&[i as u8]),
                timestamp: format!("2024-01-0{}T00:00:00.000Z", i),
            })
            .collect();
        let mut manifest = BundleManifest {
            version: MANIFEST_VERSION.to_string(),
            bundle_id: "bundle_0123456789abcdef0123456789abcdef".to_string(),
            tenant_id: "tenant-a".to_string(),
            generated_at: "2024-02-01T00:00:00.000Z".to_string(),
            date_from: None,
            date_to: Some("2024-01-31T23:59:59.999Z".to_string()),
            record_count: 3,
            records,
            aggregate_hash: Sha256Digest::zero(),
            signature: None,
            files: vec![],
            verification: VerificationProcedure::default(),
            manifest_hash: None,
        };
        manifest.aggregate_hash = manifest.recompute_aggregate().unwrap();
        manifest
    }

    #[test]
    fn test_object_keys() {
        assert_eq!(
            object_key("tenant-a", "bundle_1", MANIFEST_FILE),
            "bundles/tenant-a/bundle_1/manifest.json"
        );
    }

    #[test]
    fn test_manifest_hash_excludes_itself() {
        let manifest = sample().finalize().unwrap();
        let stored = manifest.manifest_hash.unwrap();
        assert_eq!(manifest.compute_manifest_hash().unwrap(), stored);

        // Finalizing twice is stable
        assert_eq!(manifest.clone().finalize().unwrap().manifest_hash, Some(stored));
    }

    #[test]
    fn test_raw_document_reproduces_hashes() {
        let manifest = sample().finalize().unwrap();
        let bytes = manifest.to_json_bytes().unwrap();

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(manifest_hash_of_value(&value).unwrap(), manifest.manifest_hash.unwrap());

        let parsed = BundleManifest::from_json_bytes(&bytes).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.recompute_aggregate().unwrap(), manifest.aggregate_hash);
    }

    #[test]
    fn test_edits_change_hashes() {
        let manifest = sample().finalize().unwrap();

        let mut edited = manifest.clone();
        edited.records[1].record_hash = Sha256Digest::hash(b"forged");
        assert_ne!(edited.recompute_aggregate().unwrap(), manifest.aggregate_hash);
        assert_ne!(edited.compute_manifest_hash().unwrap(), manifest.manifest_hash.unwrap());

        let mut relabelled = manifest.clone();
        relabelled.generated_at = "2030-01-01T00:00:00.000Z".to_string();
        assert_eq!(relabelled.recompute_aggregate().unwrap(), manifest.aggregate_hash);
        assert_ne!(relabelled.compute_manifest_hash().unwrap(), manifest.manifest_hash.unwrap());
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(manifest_hash_of_value(&Value::Array(vec![])).is_err());
        assert!(BundleManifest::from_json_bytes(b"{\"bundleId\":1}").is_err());
    }
}
