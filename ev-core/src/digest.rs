//! SHA-256 digest type
//!
//! Digests travel as `sha256:<64 lowercase hex>` in records, manifests and
//! the database. Bare 64-char hex is accepted on input.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix used for every serialized digest
pub const HASH_PREFIX: &str = "sha256:";

/// Error type for digest parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("Invalid digest length: expected 64 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),
}

impl From<hex::FromHexError> for DigestError {
    fn from(err: hex::FromHexError) -> Self {
        DigestError::InvalidHex(err.to_string())
    }
}

/// 32-byte SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Digest(pub [u8; 32]);

impl Sha256Digest {
    /// Hash raw bytes
    pub fn hash(data: &[u8]) -> Self {
        let out = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        Self(bytes)
    }

    /// All-zero digest, used as the chain genesis
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `sha256:<hex>` form
    pub fn to_prefixed(&self) -> String {
        format!("{}{}", HASH_PREFIX, self.to_hex())
    }

    /// Parse `sha256:<hex>` or bare hex
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let hex_part = s.strip_prefix(HASH_PREFIX).unwrap_or(s);
        if hex_part.len() != 64 {
            return Err(DigestError::InvalidLength(hex_part.len()));
        }
        let bytes = hex::decode(hex_part)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", HASH_PREFIX, self.to_hex())
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Digest({}...)", &self.to_hex()[..16])
    }
}

impl FromStr for Sha256Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Sha256Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed())
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let d = Sha256Digest::hash(b"abc");
        assert_eq!(
            d.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(d.to_string().starts_with("sha256:ba7816bf"));
    }

    #[test]
    fn test_parse_prefixed_and_bare() {
        let d = Sha256Digest::hash(b"evidence");
        assert_eq!(Sha256Digest::parse(&d.to_prefixed()).unwrap(), d);
        assert_eq!(Sha256Digest::parse(&d.to_hex()).unwrap(), d);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            Sha256Digest::parse("sha256:abcd"),
            Err(DigestError::InvalidLength(4))
        );
        let not_hex = "z".repeat(64);
        assert!(matches!(
            Sha256Digest::parse(&not_hex),
            Err(DigestError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_serde_uses_prefixed_string() {
        let d = Sha256Digest::zero();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"sha256:{}\"", "0".repeat(64)));
        let back: Sha256Digest = serde_json::from_str(&json).unwrap();
        assert!(back.is_zero());
    }
}
