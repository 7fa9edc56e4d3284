//! Detached signature verification

use crate::crypto::EvidenceVerifyingKey;
use crate::error::{SignerError, SignerResult};

/// Check a base64 signature over `message` with an SPKI PEM public key
///
/// `Ok(false)` for a well-formed key whose signature does not verify.
/// An unparseable key is an error.
pub fn verify_signature(public_key_pem: &str, message: &[u8], signature_b64: &str) -> SignerResult<bool> {
    let key = EvidenceVerifyingKey::from_pem(public_key_pem)?;
    match key.verify_base64(message, signature_b64) {
        Ok(()) => Ok(true),
        Err(SignerError::InvalidSignature(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
