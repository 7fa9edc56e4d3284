//! Evidence Core - shared foundation of the evidence ledger
//!
//! This crate provides the types and primitives every other layer builds on:
//! - Decision records and their hash-chain rule
//! - Jobs, evidence bundles and audit events
//! - Canonical JSON and SHA-256 digests
//! - The error taxonomy shared by all layers
//! - Logging conventions
//!
//! Storage, signing and verification live in their own crates
//! (`ev-db`, `ev-signer`, `ev-bundle`, `ev-verifier`).

pub mod canon;
pub mod digest;
pub mod error;
pub mod logging;
pub mod time;
pub mod types;

pub use canon::{canonical_json, canonicalize, hash_object};
pub use digest::{DigestError, Sha256Digest, HASH_PREFIX};
pub use error::{EvidenceError, EvidenceResult};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
