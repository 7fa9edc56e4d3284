//! Ed25519 keys for bundle signatures
//!
//! Signatures cover the 32 raw bytes of a bundle's aggregate hash with no
//! domain tag, so any Ed25519 implementation can check them from the
//! manifest alone.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::error::{SignerError, SignerResult};
use ev_core::Sha256Digest;

/// Algorithm name carried in manifests and signature records
pub const ALGORITHM: &str = "Ed25519";

fn key_id_for(verifying_key: &VerifyingKey) -> String {
    hex::encode(&verifying_key.to_bytes()[..8])
}

/// SHA-256 hex of the PEM text, the value relying parties pin out-of-band
pub fn fingerprint(pem: &str) -> String {
    Sha256Digest::hash(pem.as_bytes()).to_hex()
}

/// Ed25519 signing key
#[derive(Clone)]
pub struct EvidenceSigningKey {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    /// Key identifier (hex-encoded public key prefix unless overridden)
    pub kid: String,
}

impl EvidenceSigningKey {
    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: key_id_for(&verifying_key),
            signing_key,
            verifying_key,
        }
    }

    /// Generate a new random signing key
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create from secret key bytes (32 bytes)
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    /// Create from hex-encoded secret key
    pub fn from_hex(hex_str: &str) -> SignerResult<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| SignerError::InvalidKey(format!("Invalid hex: {}", e)))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            SignerError::InvalidKey(format!(
                "Invalid key length: expected 32, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(&arr))
    }

    /// Create from a PKCS#8 PEM private key
    pub fn from_pkcs8_pem(pem: &str) -> SignerResult<Self> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| SignerError::InvalidKey(format!("Invalid PKCS#8 key: {}", e)))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Export as PKCS#8 PEM
    pub fn to_pkcs8_pem(&self) -> SignerResult<String> {
        let pem = self
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SignerError::InvalidKey(format!("PKCS#8 encoding failed: {}", e)))?;
        Ok(pem.as_str().to_owned())
    }

    /// Override the key identifier
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = kid.into();
        self
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }

    pub fn verifying_key(&self) -> EvidenceVerifyingKey {
        EvidenceVerifyingKey {
            verifying_key: self.verifying_key,
        }
    }

    /// Sign raw bytes
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for EvidenceSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceSigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceVerifyingKey {
    verifying_key: VerifyingKey,
}

impl EvidenceVerifyingKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> SignerResult<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| SignerError::InvalidKey(format!("Invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    /// Parse an SPKI PEM public key
    pub fn from_pem(pem: &str) -> SignerResult<Self> {
        let verifying_key = VerifyingKey::from_public_key_pem(pem.trim())
            .map_err(|e| SignerError::InvalidKey(format!("Invalid public key PEM: {}", e)))?;
        Ok(Self { verifying_key })
    }

    /// SPKI PEM encoding
    pub fn to_pem(&self) -> SignerResult<String> {
        self.verifying_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SignerError::InvalidKey(format!("PEM encoding failed: {}", e)))
    }

    pub fn key_id(&self) -> String {
        key_id_for(&self.verifying_key)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Check a signature over raw bytes
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> SignerResult<()> {
        let signature = Signature::from_slice(signature)
            .map_err(|e| SignerError::InvalidSignature(format!("Malformed signature: {}", e)))?;
        self.verifying_key
            .verify(message, &signature)
            .map_err(|e| SignerError::InvalidSignature(format!("Verification failed: {}", e)))
    }

    /// Check a base64 signature over raw bytes
    pub fn verify_base64(&self, message: &[u8], signature_b64: &str) -> SignerResult<()> {
        let signature = STANDARD
            .decode(signature_b64.trim())
            .map_err(|e| SignerError::InvalidSignature(format!("Invalid base64: {}", e)))?;
        self.verify(message, &signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = EvidenceSigningKey::generate();
        let hash = Sha256Digest::hash(b"aggregate");
        let signature = key.sign(hash.as_bytes());

        let public = key.verifying_key();
        assert!(public.verify(hash.as_bytes(), &signature).is_ok());
        assert_eq!(public.key_id(), key.kid);
        assert_eq!(key.kid.len(), 16);
    }

    #[test]
    fn test_bit_flip_fails() {
        let key = EvidenceSigningKey::generate();
        let hash = Sha256Digest::hash(b"aggregate");
        let signature = STANDARD.encode(key.sign(hash.as_bytes()));

        for bit in [0usize, 77, 255] {
            let mut flipped = *hash.as_bytes();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(key.verifying_key().verify_base64(&flipped, &signature).is_err());
        }
    }

    #[test]
    fn test_pem_round_trip_and_fingerprint() {
        let key = EvidenceSigningKey::generate();
        let pem = key.verifying_key().to_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let parsed = EvidenceVerifyingKey::from_pem(&pem).unwrap();
        assert_eq!(parsed, key.verifying_key());
        assert_eq!(fingerprint(&pem).len(), 64);
        assert_eq!(fingerprint(&pem), fingerprint(&parsed.to_pem().unwrap()));
    }

    #[test]
    fn test_private_key_formats() {
        let key = EvidenceSigningKey::from_bytes(&[7u8; 32]);
        let from_hex = EvidenceSigningKey::from_hex(&hex::encode([7u8; 32])).unwrap();
        assert_eq!(key.public_key_hex(), from_hex.public_key_hex());

        let pem = key.to_pkcs8_pem().unwrap();
        let from_pem = EvidenceSigningKey::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(key.public_key_hex(), from_pem.public_key_hex());

        assert!(EvidenceSigningKey::from_hex("abcd").is_err());
    }
}
