//! Evidence Verifier - independent checks over finished bundles
//!
//! - [`offline`]: manifest-only verification, optionally with the signer's
//!   public key; needs no store
//! - [`custody`]: chain-of-custody report over the store, ledger and
//!   stored artifacts

pub mod custody;
pub mod error;
pub mod offline;

pub use custody::{
    format_text, CustodyEvent, CustodyEventType, CustodyReport, CustodyService,
    CustodySignature, IntegrityChecks, IntegrityStatus,
};
pub use error::{VerifierError, VerifierResult};
pub use offline::{FileCheck, OfflineReport, OfflineVerifier, SignatureStatus, VerificationIssue};
