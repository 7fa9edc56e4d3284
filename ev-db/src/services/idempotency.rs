//! Request idempotency
//!
//! Client keys are bound to the record they produced in the store, so a
//! retry replays the first record no matter which process receives it.
//! Bindings older than the TTL are ignored and can be pruned.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::SharedStore;
use ev_core::{DecisionRecord, EvidenceResult};

/// Default time a bound record is replayed
pub const DEFAULT_TTL_HOURS: i64 = 24;

const MIN_KEY_LEN: usize = 16;
const MAX_KEY_LEN: usize = 64;

/// A UUID v4 or 16 to 64 characters of `[A-Za-z0-9_-]`
pub fn is_valid_key(key: &str) -> bool {
    if let Ok(uuid) = Uuid::parse_str(key) {
        if uuid.get_version_num() == 4 {
            return true;
        }
    }
    (MIN_KEY_LEN..=MAX_KEY_LEN).contains(&key.len())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Store-backed idempotency key check
#[derive(Clone)]
pub struct IdempotencyChecker {
    store: SharedStore,
    ttl: Duration,
}

impl IdempotencyChecker {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record already produced under `key`, while the binding is live
    pub async fn check(&self, tenant_id: &str, key: &str) -> EvidenceResult<Option<DecisionRecord>> {
        let since = Utc::now() - self.ttl;
        let found = self.store.find_by_idempotency_key(tenant_id, key, since).await?;
        if let Some(record) = &found {
            debug!(tenant_id, sequence = record.sequence, "Idempotency key hit");
        }
        Ok(found)
    }

    pub async fn remember(&self, tenant_id: &str, key: &str, record: &DecisionRecord) -> EvidenceResult<()> {
        self.store
            .save_idempotency_key(tenant_id, key, record.id, Utc::now())
            .await
    }

    /// Delete bindings past the TTL as of `now`
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> EvidenceResult<u64> {
        let pruned = self.store.prune_idempotency_keys(now - self.ttl).await?;
        info!(count = pruned, "Pruned expired idempotency keys");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LedgerStore, MemoryStore};
    use crate::LedgerService;
    use ev_core::{AppendRequest, Sha256Digest};
    use std::sync::Arc;

    const KEY: &str = "key_0123456789abcdef";

    async fn record(store: &Arc<MemoryStore>) -> DecisionRecord {
        LedgerService::new(store.clone(), 3)
            .append(AppendRequest {
                tenant_id: "tenant-a".to_string(),
                transaction_id: "txn_1".to_string(),
                input_hash: Sha256Digest::hash(b"in"),
                output_hash: Sha256Digest::hash(b"out"),
                context_hash: Sha256Digest::hash(b"ctx"),
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key(&Uuid::new_v4().to_string()));
        assert!(is_valid_key("order_2024-01-15_abc"));
        assert!(!is_valid_key("short"));
        assert!(!is_valid_key("has spaces in the key!!"));
        assert!(!is_valid_key(&"x".repeat(65)));
    }

    #[tokio::test]
    async fn test_keys_are_tenant_scoped() {
        let store = Arc::new(MemoryStore::new());
        let record = record(&store).await;
        let checker = IdempotencyChecker::new(store.clone());

        checker.remember("tenant-a", KEY, &record).await.unwrap();
        assert_eq!(checker.check("tenant-a", KEY).await.unwrap(), Some(record));
        assert_eq!(checker.check("tenant-b", KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bindings_survive_a_new_checker() {
        let store = Arc::new(MemoryStore::new());
        let record = record(&store).await;
        IdempotencyChecker::new(store.clone())
            .remember("tenant-a", KEY, &record)
            .await
            .unwrap();

        let fresh = IdempotencyChecker::new(store.clone());
        assert_eq!(fresh.check("tenant-a", KEY).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_expired_bindings_are_ignored_and_pruned() {
        let store = Arc::new(MemoryStore::new());
        let record = record(&store).await;
        let earlier = Utc::now() - Duration::hours(25);
        store
            .save_idempotency_key("tenant-a", KEY, record.id, earlier)
            .await
            .unwrap();

        let checker = IdempotencyChecker::new(store.clone());
        assert_eq!(checker.check("tenant-a", KEY).await.unwrap(), None);
        assert_eq!(checker.prune_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(checker.prune_expired(Utc::now()).await.unwrap(), 0);
    }
}
