//! Evidence Signer - detached signatures over bundle aggregate hashes
//!
//! - Ed25519 keys with PKCS#8/SPKI PEM encodings
//! - [`KeyBackend`] contract with an in-process implementation
//! - [`SigningService`]: validation, per-tenant rate limit, audit trail
//! - [`verify_signature`] for offline checks

pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod service;
pub mod verify;

pub use backend::{KeyBackend, LocalKeyBackend};
pub use config::SignerConfig;
pub use crypto::{fingerprint, EvidenceSigningKey, EvidenceVerifyingKey, ALGORITHM};
pub use error::{SignerError, SignerResult};
pub use service::{PublicKeyInfo, SignRequest, SigningService};
pub use verify::verify_signature;
