//! Services over the store traits
//!
//! Every service holds a [`SharedStore`] so the same code runs against the
//! in-memory and PostgreSQL back ends.

pub mod audit;
pub mod idempotency;
pub mod ledger;
pub mod queue;

use std::sync::Arc;

use crate::store::EvidenceStore;

/// Store handle shared by all services
pub type SharedStore = Arc<dyn EvidenceStore>;

pub use audit::{AuditLog, RateLimiter};
pub use idempotency::IdempotencyChecker;
pub use ledger::LedgerService;
pub use queue::{FailureDisposition, JobQueue, QueueStatus};
