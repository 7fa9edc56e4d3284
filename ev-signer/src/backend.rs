//! Key backend contract
//!
//! The signing service only needs "sign these bytes" and "give me the
//! public key". A KMS client implements the same trait; the local backend
//! keeps the key in process memory.

use async_trait::async_trait;

use crate::crypto::{EvidenceSigningKey, ALGORITHM};
use crate::error::SignerResult;

#[async_trait]
pub trait KeyBackend: Send + Sync {
    fn key_id(&self) -> &str;

    fn algorithm(&self) -> &str;

    /// Raw signature bytes over `message`
    async fn sign(&self, message: &[u8]) -> SignerResult<Vec<u8>>;

    /// SPKI PEM of the signing key's public half
    async fn public_key_pem(&self) -> SignerResult<String>;
}

/// In-process Ed25519 backend
#[derive(Debug, Clone)]
pub struct LocalKeyBackend {
    key: EvidenceSigningKey,
}

impl LocalKeyBackend {
    pub fn new(key: EvidenceSigningKey) -> Self {
        Self { key }
    }

    /// Fresh random key, for development and tests
    pub fn ephemeral() -> Self {
        Self::new(EvidenceSigningKey::generate())
    }
}

#[async_trait]
impl KeyBackend for LocalKeyBackend {
    fn key_id(&self) -> &str {
        &self.key.kid
    }

    fn algorithm(&self) -> &str {
        ALGORITHM
    }

    async fn sign(&self, message: &[u8]) -> SignerResult<Vec<u8>> {
        Ok(self.key.sign(message).to_vec())
    }

    async fn public_key_pem(&self) -> SignerResult<String> {
        self.key.verifying_key().to_pem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EvidenceVerifyingKey;

    #[tokio::test]
    async fn test_local_backend_signatures_verify() {
        let backend = LocalKeyBackend::ephemeral();
        let pem = backend.public_key_pem().await.unwrap();
        let signature = backend.sign(b"payload").await.unwrap();

        let public = EvidenceVerifyingKey::from_pem(&pem).unwrap();
        assert!(public.verify(b"payload", &signature).is_ok());
        assert_eq!(backend.key_id(), public.key_id());
        assert_eq!(backend.algorithm(), "Ed25519");
    }
}
