//! Audit log writer and audit-derived rate limiting

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::SharedStore;
use ev_core::{AuditEvent, AuditStatus, EvidenceError, EvidenceResult};

/// Append-only audit writer
#[derive(Clone)]
pub struct AuditLog {
    store: SharedStore,
}

impl AuditLog {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn record(&self, event: AuditEvent) -> EvidenceResult<()> {
        debug!(
            action = %event.action,
            status = event.status.as_str(),
            resource_id = event.resource_id.as_deref().unwrap_or("-"),
            "Audit event"
        );
        self.store.append_event(&event).await
    }

    /// Record after the audited action already committed. A failed write is
    /// logged and swallowed so the caller still sees the committed result.
    pub async fn record_after_commit(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.record(event).await {
            warn!(action = %action, error = %e, "Failed to write audit event");
        }
    }

    /// Events touching any of the resources, oldest first
    pub async fn events_for(&self, resource_ids: &[String]) -> EvidenceResult<Vec<AuditEvent>> {
        self.store.events_for_resources(resource_ids).await
    }
}

/// Per-tenant sliding-window limit over SUCCESS audit events
///
/// Counts come from the append-only audit log rather than an atomic
/// counter, so concurrent bursts may briefly exceed the limit.
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    action: String,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: SharedStore, action: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            action: action.into(),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Successful actions inside the trailing window
    pub async fn used(&self, tenant_id: &str) -> EvidenceResult<u64> {
        let since = Utc::now() - self.window;
        self.store
            .count_events(tenant_id, &self.action, AuditStatus::Success, since)
            .await
    }

    /// `RateLimited` once the window already holds `limit` successes
    pub async fn check(&self, tenant_id: &str) -> EvidenceResult<()> {
        let used = self.used(tenant_id).await?;
        if used >= u64::from(self.limit) {
            warn!(
                tenant_id,
                action = %self.action,
                count = used,
                limit = self.limit,
                "Rate limit exceeded"
            );
            return Err(EvidenceError::RateLimited {
                action: self.action.clone(),
                limit: self.limit,
                window_secs: self.window.num_seconds().max(0) as u64,
            });
        }
        Ok(())
    }
}
