//! Signing service
//!
//! Signs bundle aggregate hashes through a [`KeyBackend`], rate limited per
//! tenant by counting `HASH_SIGNED` audit events in a trailing window.
//! Every outcome is audited: success, rejection, rate limit, backend error.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::backend::KeyBackend;
use crate::config::SignerConfig;
use crate::crypto::fingerprint;
use ev_core::types::audit::{actions, resource_types};
use ev_core::{
    AuditEvent, BundleSignature, EvidenceError, EvidenceResult, Sha256Digest, MIN_TENANT_ID_LEN,
};
use ev_db::{AuditLog, RateLimiter, SharedStore};

const MIN_RESOURCE_ID_LEN: usize = 3;

/// Request to sign one hash
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub tenant_id: String,
    /// Resource the hash belongs to, usually a bundle id
    pub resource_id: String,
    /// `sha256:<hex>` or bare 64-char hex
    pub hash: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Public half of the signing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyInfo {
    pub pem: String,
    /// SHA-256 hex of `pem`
    pub fingerprint: String,
    pub key_id: String,
    pub algorithm: String,
}

/// Signing service
pub struct SigningService {
    backend: Arc<dyn KeyBackend>,
    audit: AuditLog,
    limiter: RateLimiter,
    public_key: OnceCell<PublicKeyInfo>,
}

impl SigningService {
    pub fn new(store: SharedStore, backend: Arc<dyn KeyBackend>, config: &SignerConfig) -> Self {
        Self {
            backend,
            audit: AuditLog::new(store.clone()),
            limiter: RateLimiter::new(store, actions::HASH_SIGNED, config.rate_limit, config.window()),
            public_key: OnceCell::new(),
        }
    }

    pub fn key_id(&self) -> &str {
        self.backend.key_id()
    }

    /// Public key, fingerprint and key id. Fetched once from the backend.
    pub async fn public_key(&self) -> EvidenceResult<PublicKeyInfo> {
        let info = self
            .public_key
            .get_or_try_init(|| async {
                let pem = self.backend.public_key_pem().await?;
                Ok::<_, EvidenceError>(PublicKeyInfo {
                    fingerprint: fingerprint(&pem),
                    pem,
                    key_id: self.backend.key_id().to_string(),
                    algorithm: self.backend.algorithm().to_string(),
                })
            })
            .await?;
        Ok(info.clone())
    }

    fn validate(request: &SignRequest) -> EvidenceResult<Sha256Digest> {
        if request.tenant_id.trim().len() < MIN_TENANT_ID_LEN {
            return Err(EvidenceError::validation(format!(
                "tenantId must be at least {} characters",
                MIN_TENANT_ID_LEN
            )));
        }
        if request.resource_id.trim().len() < MIN_RESOURCE_ID_LEN {
            return Err(EvidenceError::validation(format!(
                "resourceId must be at least {} characters",
                MIN_RESOURCE_ID_LEN
            )));
        }
        Sha256Digest::parse(request.hash.trim())
            .map_err(|e| EvidenceError::validation(format!("hash: {}", e)))
    }

    fn event(request: &SignRequest, action: &str) -> AuditEvent {
        AuditEvent::new(
            Some(&request.tenant_id),
            action,
            resource_types::EVIDENCE_BUNDLE,
            Some(&request.resource_id),
        )
        .with_user(request.user_id.as_deref())
    }

    /// Sign the raw 32 hash bytes
    pub async fn sign_hash(&self, request: SignRequest) -> EvidenceResult<BundleSignature> {
        let digest = match Self::validate(&request) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(tenant_id = %request.tenant_id, error = %e, "Sign request rejected");
                self.audit
                    .record_after_commit(
                        Self::event(&request, actions::SIGN_REJECTED).failed(e.to_string()),
                    )
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = self.limiter.check(&request.tenant_id).await {
            if matches!(e, EvidenceError::RateLimited { .. }) {
                self.audit
                    .record_after_commit(
                        Self::event(&request, actions::SIGN_RATE_LIMITED)
                            .with_metadata(json!({
                                "limit": self.limiter.limit(),
                                "windowSecs": self.limiter.window().num_seconds(),
                            }))
                            .denied(e.to_string()),
                    )
                    .await;
            }
            return Err(e);
        }

        let signed = async {
            let public = self.public_key().await?;
            let raw = self.backend.sign(digest.as_bytes()).await?;
            Ok::<_, EvidenceError>((public, raw))
        }
        .await;

        let (public, raw) = match signed {
            Ok(v) => v,
            Err(e) => {
                error!(tenant_id = %request.tenant_id, key_id = self.key_id(), error = %e, "Key backend failed");
                self.audit
                    .record_after_commit(Self::event(&request, actions::SIGN_KMS_ERROR).failed(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let signature = BundleSignature {
            key_id: public.key_id.clone(),
            algorithm: public.algorithm.clone(),
            value: STANDARD.encode(raw),
            public_key_fingerprint: public.fingerprint.clone(),
            signed_at: Utc::now(),
        };

        // Counted by the rate limiter, so this write must land
        self.audit
            .record(Self::event(&request, actions::HASH_SIGNED).with_metadata(json!({
                "hash": digest.to_prefixed(),
                "keyId": signature.key_id,
                "algorithm": signature.algorithm,
            })))
            .await?;

        info!(
            tenant_id = %request.tenant_id,
            resource_id = %request.resource_id,
            key_id = %signature.key_id,
            "Hash signed"
        );
        Ok(signature)
    }

    /// Sign a bundle's aggregate hash
    pub async fn sign_bundle(
        &self,
        tenant_id: &str,
        bundle_id: &str,
        aggregate_hash: &Sha256Digest,
        user_id: Option<&str>,
    ) -> EvidenceResult<BundleSignature> {
        self.sign_hash(SignRequest {
            tenant_id: tenant_id.to_string(),
            resource_id: bundle_id.to_string(),
            hash: aggregate_hash.to_prefixed(),
            user_id: user_id.map(str::to_string),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalKeyBackend;
    use crate::error::{SignerError, SignerResult};
    use crate::verify::verify_signature;
    use async_trait::async_trait;
    use ev_core::AuditStatus;
    use ev_db::MemoryStore;

    struct UnavailableBackend;

    #[async_trait]
    impl KeyBackend for UnavailableBackend {
        fn key_id(&self) -> &str {
            "kms-down"
        }

        fn algorithm(&self) -> &str {
            "Ed25519"
        }

        async fn sign(&self, _message: &[u8]) -> SignerResult<Vec<u8>> {
            Err(SignerError::Backend("connection refused".to_string()))
        }

        async fn public_key_pem(&self) -> SignerResult<String> {
            Err(SignerError::Backend("connection refused".to_string()))
        }
    }

    fn request(tenant: &str, hash: &Sha256Digest) -> SignRequest {
        SignRequest {
            tenant_id: tenant.to_string(),
            resource_id: "bundle_abc".to_string(),
            hash: hash.to_prefixed(),
            user_id: Some("auditor@example.com".to_string()),
        }
    }

    fn service(store: Arc<MemoryStore>) -> SigningService {
        SigningService::new(store, Arc::new(LocalKeyBackend::ephemeral()), &SignerConfig::default())
    }

    #[tokio::test]
    async fn test_signature_verifies_against_public_key() {
        let service = service(Arc::new(MemoryStore::new()));
        let hash = Sha256Digest::hash(b"aggregate");
        let signature = service.sign_hash(request("tenant-a", &hash)).await.unwrap();
        let public = service.public_key().await.unwrap();

        assert_eq!(signature.algorithm, "Ed25519");
        assert_eq!(signature.public_key_fingerprint, public.fingerprint);
        assert!(verify_signature(&public.pem, hash.as_bytes(), &signature.value).unwrap());

        let mut flipped = *hash.as_bytes();
        flipped[31] ^= 0x01;
        assert!(!verify_signature(&public.pem, &flipped, &signature.value).unwrap());
    }

    #[tokio::test]
    async fn test_eleventh_request_is_rate_limited() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let hash = Sha256Digest::hash(b"aggregate");

        for _ in 0..10 {
            service.sign_hash(request("tenant-a", &hash)).await.unwrap();
        }
        let err = service.sign_hash(request("tenant-a", &hash)).await.unwrap_err();
        assert!(matches!(err, EvidenceError::RateLimited { limit: 10, .. }));

        let denied: Vec<_> = store
            .audit_events()
            .await
            .into_iter()
            .filter(|e| e.action == actions::SIGN_RATE_LIMITED)
            .collect();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].status, AuditStatus::Denied);

        // Another tenant still has its full budget
        service.sign_hash(request("tenant-b", &hash)).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected_and_audited() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let mut bad = request("tenant-a", &Sha256Digest::hash(b"x"));
        bad.hash = "not-a-hash".to_string();
        let err = service.sign_hash(bad).await.unwrap_err();
        assert!(matches!(err, EvidenceError::Validation(_)));

        let bad = request("ab", &Sha256Digest::hash(b"x"));
        assert!(service.sign_hash(bad).await.is_err());

        let events = store.audit_events().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.action == actions::SIGN_REJECTED));
    }

    #[tokio::test]
    async fn test_backend_failure_is_transient_and_audited() {
        let store = Arc::new(MemoryStore::new());
        let service = SigningService::new(
            store.clone(),
            Arc::new(UnavailableBackend),
            &SignerConfig::default(),
        );
        let err = service
            .sign_hash(request("tenant-a", &Sha256Digest::hash(b"x")))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let events = store.audit_events().await;
        assert_eq!(events[0].action, actions::SIGN_KMS_ERROR);
        assert_eq!(events[0].status, AuditStatus::Failed);
    }
}
