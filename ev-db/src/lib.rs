//! Evidence DB - storage layer and services
//!
//! - [`store`]: store traits with in-memory and PostgreSQL back ends
//! - [`services`]: ledger, job queue, audit log, rate limiter, idempotency keys
//! - [`config`]: queue and back-end configuration
//!
//! # Example
//!
//! ```ignore
//! use ev_db::{open_store, LedgerService, StoreConfig};
//!
//! let store = open_store(&StoreConfig::from_env()).await?;
//! let ledger = LedgerService::new(store, 3);
//! let record = ledger.append(request).await?;
//! ```

pub mod config;
pub mod error;
pub mod retry;
pub mod schema;
pub mod services;
pub mod store;

use std::sync::Arc;
use tracing::info;

pub use config::{QueueConfig, StoreConfig};
pub use error::map_sqlx;
pub use retry::BackoffPolicy;
pub use services::{
    AuditLog, FailureDisposition, IdempotencyChecker, JobQueue, LedgerService, QueueStatus,
    RateLimiter, SharedStore,
};
pub use store::{
    AuditStore, BundleStatusCounts, BundleStore, EvidenceStore, JobStore, LedgerStore,
    MemoryStore, PgStore,
};

use ev_core::EvidenceResult;

/// Open the configured back end. PostgreSQL gets its schema applied.
pub async fn open_store(config: &StoreConfig) -> EvidenceResult<SharedStore> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.max_connections).await?;
            store.init_schema().await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
