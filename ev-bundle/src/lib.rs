//! Evidence Bundle - bundle building, storage and the background worker
//!
//! - [`storage`]: artifact storage contract, local filesystem and memory adapters
//! - [`aggregate`] and [`manifest`]: the hashed, portable bundle description
//! - [`builder`]: record range → stored artifacts → READY bundle
//! - [`ops`]: request, reprocess, download, disclosure, retention cleanup
//! - [`worker`]: queue consumer and its background runner

pub mod aggregate;
pub mod builder;
pub mod config;
pub mod error;
pub mod manifest;
pub mod ops;
pub mod procedure;
pub mod storage;
pub mod worker;

pub use aggregate::{aggregate_hash, BundleMetadata};
pub use builder::{BuildOutcome, BundleBuilder};
pub use config::WorkerConfig;
pub use error::{StorageError, StorageResult};
pub use manifest::{
    bundle_prefix, manifest_hash_of_value, object_key, BundleManifest, ManifestFile,
    ManifestRecord, MANIFEST_FILE, MANIFEST_VERSION, RECORDS_FILE, VERIFY_FILE,
};
pub use ops::{
    new_bundle_id, AccessGrant, BundleOps, BundleRequest, CleanupEntry, CleanupReport,
    PipelineStatus, ReprocessOutcome,
};
pub use procedure::{render_verify_md, VerificationProcedure};
pub use storage::{
    LocalStorageAdapter, MemoryStorageAdapter, PresignedUrl, StorageAdapter, StoredObject,
};
pub use worker::{BundleWorker, DrainSummary, JobReport, JobResult, RunnerHandle};
