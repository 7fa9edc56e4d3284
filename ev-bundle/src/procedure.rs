//! Self-contained verification procedure
//!
//! Embedded in every manifest and rendered as `VERIFY.md` next to it, so a
//! third party can check a bundle with nothing but the files and, for the
//! signature, a trusted public key.

use serde::{Deserialize, Serialize};

use ev_core::{BundleSignature, Sha256Digest};

/// Machine-readable procedure carried in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationProcedure {
    pub hash_algorithm: String,
    pub canonicalization: String,
    /// What the signature covers
    pub signed_bytes: String,
    pub steps: Vec<String>,
}

impl Default for VerificationProcedure {
    fn default() -> Self {
        Self {
            hash_algorithm: "SHA-256".to_string(),
            canonicalization: "JSON with object keys sorted lexicographically at every level, \
                               arrays in order, no whitespace, null as null"
                .to_string(),
            signed_bytes: "the 32 raw bytes of the hex-decoded aggregateHash".to_string(),
            steps: vec![
                "Sort `records` by `sequence` ascending and take each `recordHash` string.".to_string(),
                "Build {\"metadata\":{\"tenantId\",\"dateFrom\",\"dateTo\",\"recordCount\"},\"recordHashes\":[...]} \
                 from the manifest fields."
                    .to_string(),
                "Serialize it canonically, hash with SHA-256 and compare `sha256:<hex>` to `aggregateHash`."
                    .to_string(),
                "If a trusted public key is available, check that the SHA-256 hex of its PEM equals \
                 `signature.publicKeyFingerprint`, then verify `signature.value` (base64) over the \
                 aggregate hash bytes with `signature.algorithm`."
                    .to_string(),
                "Optionally remove `manifestHash`, serialize the rest canonically, and compare its \
                 SHA-256 to `manifestHash`."
                    .to_string(),
                "Compare each entry of `files` against the SHA-256 and size of the file beside the manifest."
                    .to_string(),
            ],
        }
    }
}

/// Render `VERIFY.md`
pub fn render_verify_md(
    bundle_id: &str,
    tenant_id: &str,
    aggregate_hash: &Sha256Digest,
    signature: Option<&BundleSignature>,
) -> String {
    let procedure = VerificationProcedure::default();
    let mut out = String::new();

    out.push_str(&format!("# Verifying evidence bundle {}\n\n", bundle_id));
    out.push_str(&format!("- Tenant: `{}`\n", tenant_id));
    out.push_str(&format!("- Aggregate hash: `{}`\n", aggregate_hash));
    match signature {
        Some(sig) => {
            out.push_str(&format!("- Signature: {} key `{}`\n", sig.algorithm, sig.key_id));
            out.push_str(&format!(
                "- Public key fingerprint (SHA-256 of the PEM): `{}`\n",
                sig.public_key_fingerprint
            ));
        }
        None => out.push_str("- Signature: none, hash-only verification\n"),
    }

    out.push_str("\n## Canonical form\n\n");
    out.push_str(&procedure.canonicalization);
    out.push_str(".\n\n## Steps\n\n");
    for (i, step) in procedure.steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }

    out.push_str("\n## With the evidence tool\n\n```sh\n");
    out.push_str("evidence verify --manifest manifest.json --public-key signer.pem \\\n");
    match signature {
        Some(sig) => out.push_str(&format!("    --fingerprint {}\n", sig.public_key_fingerprint)),
        None => out.push_str("    --fingerprint <trusted fingerprint>\n"),
    }
    out.push_str("```\n\n");
    out.push_str(
        "The report prints `hash match` and `signature valid` separately. Without a public key \
         only the hash is checked and the signature is reported as skipped.\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_render_unsigned() {
        let hash = Sha256Digest::hash(b"aggregate");
        let text = render_verify_md("bundle_1", "tenant-a", &hash, None);
        assert!(text.contains(&hash.to_prefixed()));
        assert!(text.contains("hash-only"));
        assert!(text.contains("6. Compare each entry"));
    }

    #[test]
    fn test_render_signed_includes_fingerprint() {
        let signature = BundleSignature {
            key_id: "a1b2c3d4e5f60718".to_string(),
            algorithm: "Ed25519".to_string(),
            value: "c2ln".to_string(),
            public_key_fingerprint: "ff".repeat(32),
            signed_at: Utc::now(),
        };
        let text = render_verify_md("bundle_1", "tenant-a", &Sha256Digest::hash(b"x"), Some(&signature));
        assert!(text.contains("Ed25519 key `a1b2c3d4e5f60718`"));
        assert!(text.contains(&format!("--fingerprint {}", "ff".repeat(32))));
    }
}
