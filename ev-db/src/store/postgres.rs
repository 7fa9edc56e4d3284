//! PostgreSQL store
//!
//! All coordination between worker processes happens here: the unique
//! `(tenant_id, sequence)` constraint serializes ledger appends, and
//! `FOR UPDATE SKIP LOCKED` hands each due job to one claimer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use super::{AuditStore, BundleStatusCounts, BundleStore, JobStore, LedgerStore};
use crate::error::map_sqlx;
use crate::schema::SCHEMA;
use ev_core::{
    AuditEvent, AuditStatus, BundleSignature, BundleStatus, DateFilter, DeadLetterJob,
    DecisionRecord, DisclosureLevel, EnqueueOptions, EnqueueOutcome, EvidenceBundle,
    EvidenceError, EvidenceResult, Job, JobSelector, JobStatus, QueueCounts, ReadyUpdate,
    Sha256Digest,
};

const RECORD_COLUMNS: &str = "id, tenant_id, transaction_id, input_hash, output_hash, \
     context_hash, record_hash, previous_hash, timestamp, sequence";

const JOB_COLUMNS: &str = "id, type, payload, dedupe_key, status, attempts, max_attempts, \
     run_at, last_error, created_at, updated_at";

const BUNDLE_COLUMNS: &str = "id, bundle_id, tenant_id, status, record_count, date_from, \
     date_to, purpose, created_by, disclosure, storage_key, bundle_hash, manifest_hash, \
     signature, first_sequence, last_sequence, error_message, legal_hold, retention_until, \
     expires_at, created_at, updated_at, completed_at, accessed_at";

const AUDIT_COLUMNS: &str = "id, tenant_id, user_id, action, resource_type, resource_id, \
     metadata, ip_address, user_agent, status, error_message, timestamp";

/// PostgreSQL-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> EvidenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx)?;
        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create tables, indexes and triggers if missing
    pub async fn init_schema(&self) -> EvidenceResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        info!("Schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_digest(column: &str, value: &str) -> EvidenceResult<Sha256Digest> {
    Sha256Digest::parse(value)
        .map_err(|e| EvidenceError::integrity(format!("{} holds a malformed digest: {}", column, e)))
}

fn parse_optional_digest(column: &str, value: Option<String>) -> EvidenceResult<Option<Sha256Digest>> {
    value.map(|v| parse_digest(column, &v)).transpose()
}

fn to_u64(column: &str, value: i64) -> EvidenceResult<u64> {
    u64::try_from(value)
        .map_err(|_| EvidenceError::integrity(format!("{} is negative: {}", column, value)))
}

fn to_i64(value: u64) -> EvidenceResult<i64> {
    i64::try_from(value).map_err(|_| EvidenceError::validation(format!("{} exceeds i64", value)))
}

fn to_u32(column: &str, value: i32) -> EvidenceResult<u32> {
    u32::try_from(value)
        .map_err(|_| EvidenceError::integrity(format!("{} is negative: {}", column, value)))
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    tenant_id: String,
    transaction_id: String,
    input_hash: String,
    output_hash: String,
    context_hash: String,
    record_hash: String,
    previous_hash: String,
    timestamp: DateTime<Utc>,
    sequence: i64,
}

impl TryFrom<RecordRow> for DecisionRecord {
    type Error = EvidenceError;

    fn try_from(row: RecordRow) -> EvidenceResult<Self> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            transaction_id: row.transaction_id,
            input_hash: parse_digest("input_hash", &row.input_hash)?,
            output_hash: parse_digest("output_hash", &row.output_hash)?,
            context_hash: parse_digest("context_hash", &row.context_hash)?,
            record_hash: parse_digest("record_hash", &row.record_hash)?,
            previous_hash: parse_digest("previous_hash", &row.previous_hash)?,
            timestamp: row.timestamp,
            sequence: to_u64("sequence", row.sequence)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    #[sqlx(rename = "type")]
    job_type: String,
    payload: Value,
    dedupe_key: Option<String>,
    status: String,
    attempts: i32,
    max_attempts: i32,
    run_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = EvidenceError;

    fn try_from(row: JobRow) -> EvidenceResult<Self> {
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| EvidenceError::integrity(format!("unknown job status {}", row.status)))?;
        Ok(Self {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            dedupe_key: row.dedupe_key,
            status,
            attempts: to_u32("attempts", row.attempts)?,
            max_attempts: to_u32("max_attempts", row.max_attempts)?,
            run_at: row.run_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: Uuid,
    #[sqlx(rename = "type")]
    job_type: String,
    payload: Value,
    dedupe_key: Option<String>,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    failed_at: DateTime<Utc>,
}

impl TryFrom<DeadLetterRow> for DeadLetterJob {
    type Error = EvidenceError;

    fn try_from(row: DeadLetterRow) -> EvidenceResult<Self> {
        Ok(Self {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            dedupe_key: row.dedupe_key,
            attempts: to_u32("attempts", row.attempts)?,
            max_attempts: to_u32("max_attempts", row.max_attempts)?,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            failed_at: row.failed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BundleRow {
    id: Uuid,
    bundle_id: String,
    tenant_id: String,
    status: String,
    record_count: i64,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    purpose: Option<String>,
    created_by: Option<String>,
    disclosure: String,
    storage_key: Option<String>,
    bundle_hash: Option<String>,
    manifest_hash: Option<String>,
    signature: Option<Value>,
    first_sequence: Option<i64>,
    last_sequence: Option<i64>,
    error_message: Option<String>,
    legal_hold: bool,
    retention_until: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    accessed_at: Option<DateTime<Utc>>,
}

impl TryFrom<BundleRow> for EvidenceBundle {
    type Error = EvidenceError;

    fn try_from(row: BundleRow) -> EvidenceResult<Self> {
        let status = BundleStatus::parse(&row.status).ok_or_else(|| {
            EvidenceError::integrity(format!("unknown bundle status {}", row.status))
        })?;
        let disclosure = DisclosureLevel::parse(&row.disclosure).ok_or_else(|| {
            EvidenceError::integrity(format!("unknown disclosure level {}", row.disclosure))
        })?;
        let signature = row
            .signature
            .map(serde_json::from_value::<BundleSignature>)
            .transpose()?;

        Ok(Self {
            id: row.id,
            bundle_id: row.bundle_id,
            tenant_id: row.tenant_id,
            status,
            record_count: to_u64("record_count", row.record_count)?,
            date_from: row.date_from,
            date_to: row.date_to,
            purpose: row.purpose,
            created_by: row.created_by,
            disclosure,
            storage_key: row.storage_key,
            bundle_hash: parse_optional_digest("bundle_hash", row.bundle_hash)?,
            manifest_hash: parse_optional_digest("manifest_hash", row.manifest_hash)?,
            signature,
            first_sequence: row
                .first_sequence
                .map(|s| to_u64("first_sequence", s))
                .transpose()?,
            last_sequence: row
                .last_sequence
                .map(|s| to_u64("last_sequence", s))
                .transpose()?,
            error_message: row.error_message,
            legal_hold: row.legal_hold,
            retention_until: row.retention_until,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            accessed_at: row.accessed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    tenant_id: Option<String>,
    user_id: Option<String>,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    metadata: Value,
    ip_address: Option<String>,
    user_agent: Option<String>,
    status: String,
    error_message: Option<String>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = EvidenceError;

    fn try_from(row: AuditRow) -> EvidenceResult<Self> {
        let status = AuditStatus::parse(&row.status).ok_or_else(|| {
            EvidenceError::integrity(format!("unknown audit status {}", row.status))
        })?;
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            metadata: row.metadata,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            status,
            error_message: row.error_message,
            timestamp: row.timestamp,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> EvidenceResult<Vec<T>>
where
    T: TryFrom<R, Error = EvidenceError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn chain_tail(&self, tenant_id: &str) -> EvidenceResult<Option<DecisionRecord>> {
        let sql = format!(
            "SELECT {} FROM decision_records WHERE tenant_id = $1 ORDER BY sequence DESC LIMIT 1",
            RECORD_COLUMNS
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(DecisionRecord::try_from).transpose()
    }

    async fn insert_record(&self, record: &DecisionRecord) -> EvidenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO decision_records
                (id, tenant_id, transaction_id, input_hash, output_hash,
                 context_hash, record_hash, previous_hash, timestamp, sequence)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(&record.transaction_id)
        .bind(record.input_hash.to_prefixed())
        .bind(record.output_hash.to_prefixed())
        .bind(record.context_hash.to_prefixed())
        .bind(record.record_hash.to_prefixed())
        .bind(record.previous_hash.to_prefixed())
        .bind(record.timestamp)
        .bind(to_i64(record.sequence)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn records_by_sequence(
        &self,
        tenant_id: &str,
        from_seq: u64,
        to_seq: u64,
    ) -> EvidenceResult<Vec<DecisionRecord>> {
        let sql = format!(
            "SELECT {} FROM decision_records \
             WHERE tenant_id = $1 AND sequence >= $2 AND sequence <= $3 \
             ORDER BY sequence",
            RECORD_COLUMNS
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant_id)
            .bind(to_i64(from_seq)?)
            .bind(to_i64(to_seq)?)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        convert_all(rows)
    }

    async fn records_in_range(
        &self,
        tenant_id: &str,
        filter: &DateFilter,
    ) -> EvidenceResult<Vec<DecisionRecord>> {
        let sql = format!(
            "SELECT {} FROM decision_records \
             WHERE tenant_id = $1 \
               AND ($2::timestamptz IS NULL OR timestamp >= $2) \
               AND ($3::timestamptz IS NULL OR timestamp <= $3) \
             ORDER BY sequence",
            RECORD_COLUMNS
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant_id)
            .bind(filter.gte)
            .bind(filter.lte)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        debug!(tenant_id, count = rows.len(), "Selected records in range");
        convert_all(rows)
    }

    async fn count_in_range(&self, tenant_id: &str, filter: &DateFilter) -> EvidenceResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM decision_records
            WHERE tenant_id = $1
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
              AND ($3::timestamptz IS NULL OR timestamp <= $3)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.gte)
        .bind(filter.lte)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        to_u64("count", count)
    }

    async fn find_by_transaction(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> EvidenceResult<Option<DecisionRecord>> {
        let sql = format!(
            "SELECT {} FROM decision_records WHERE tenant_id = $1 AND transaction_id = $2",
            RECORD_COLUMNS
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant_id)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(DecisionRecord::try_from).transpose()
    }

    async fn save_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
        record_id: Uuid,
        at: DateTime<Utc>,
    ) -> EvidenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_idempotency_keys (tenant_id, idempotency_key, record_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, idempotency_key)
            DO UPDATE SET record_id = EXCLUDED.record_id, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(tenant_id)
        .bind(key)
        .bind(record_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> EvidenceResult<Option<DecisionRecord>> {
        let sql = format!(
            "SELECT {} FROM decision_records WHERE id = ( \
                 SELECT record_id FROM ledger_idempotency_keys \
                 WHERE tenant_id = $1 AND idempotency_key = $2 AND created_at >= $3)",
            RECORD_COLUMNS
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant_id)
            .bind(key)
            .bind(since)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(DecisionRecord::try_from).transpose()
    }

    async fn prune_idempotency_keys(&self, older_than: DateTime<Utc>) -> EvidenceResult<u64> {
        let result = sqlx::query("DELETE FROM ledger_idempotency_keys WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(
        &self,
        job_type: &str,
        payload: Value,
        options: &EnqueueOptions,
    ) -> EvidenceResult<EnqueueOutcome> {
        let max_attempts = i32::try_from(options.max_attempts)
            .map_err(|_| EvidenceError::validation("maxAttempts out of range"))?;
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO ev_jobs (id, type, payload, dedupe_key, status, attempts, max_attempts, run_at)
            VALUES ($1, $2, $3, $4, 'PENDING', 0, $5, COALESCE($6, NOW()))
            ON CONFLICT (dedupe_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_type)
        .bind(payload)
        .bind(options.dedupe_key.as_deref())
        .bind(max_attempts)
        .bind(options.run_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(EnqueueOutcome {
            inserted: id.is_some(),
            id,
        })
    }

    async fn claim_next(&self, job_type: Option<&str>) -> EvidenceResult<Option<Job>> {
        let sql = format!(
            r#"
            WITH claimable AS (
                SELECT id
                FROM ev_jobs
                WHERE status = 'PENDING'
                  AND run_at <= NOW()
                  AND ($1::text IS NULL OR type = $1)
                ORDER BY run_at, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE ev_jobs j
            SET status = 'RUNNING', updated_at = NOW()
            FROM claimable c
            WHERE j.id = c.id
            RETURNING {}
            "#,
            JOB_COLUMNS
                .split(", ")
                .map(|c| format!("j.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(Job::try_from).transpose()
    }

    async fn mark_done(&self, id: Uuid) -> EvidenceResult<()> {
        let result = sqlx::query("UPDATE ev_jobs SET status = 'DONE', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(EvidenceError::not_found(format!("job {}", id)));
        }
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> EvidenceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ev_jobs
            SET status = 'PENDING', attempts = attempts + 1, last_error = $2,
                run_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(run_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(EvidenceError::not_found(format!("job {}", id)));
        }
        Ok(())
    }

    async fn move_to_dead_letter(&self, id: Uuid, error: &str) -> EvidenceResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let copied = sqlx::query(
            r#"
            INSERT INTO ev_jobs_dlq
                (id, type, payload, dedupe_key, attempts, max_attempts,
                 last_error, created_at, updated_at, failed_at)
            SELECT id, type, payload, dedupe_key, attempts + 1, max_attempts,
                   $2, created_at, NOW(), NOW()
            FROM ev_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if copied.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx)?;
            return Err(EvidenceError::not_found(format!("job {}", id)));
        }

        sqlx::query("DELETE FROM ev_jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> EvidenceResult<Option<Job>> {
        let sql = format!("SELECT {} FROM ev_jobs WHERE id = $1", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(Job::try_from).transpose()
    }

    async fn reset_jobs(&self, selector: &JobSelector) -> EvidenceResult<u64> {
        let query = match selector {
            JobSelector::Id(id) => sqlx::query(
                r#"
                UPDATE ev_jobs
                SET status = 'PENDING', run_at = NOW(), last_error = NULL, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(*id),
            JobSelector::BundleId(bundle_id) => sqlx::query(
                r#"
                UPDATE ev_jobs
                SET status = 'PENDING', run_at = NOW(), last_error = NULL, updated_at = NOW()
                WHERE dedupe_key = $1 OR payload->>'bundleId' = $1
                "#,
            )
            .bind(bundle_id.clone()),
        };
        let result = query.execute(&self.pool).await.map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn force_now(&self, job_type: &str) -> EvidenceResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ev_jobs
            SET run_at = NOW(), attempts = 0, last_error = NULL, updated_at = NOW()
            WHERE type = $1 AND status = 'PENDING'
            "#,
        )
        .bind(job_type)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn queue_counts(&self) -> EvidenceResult<QueueCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM ev_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?;
        let dead_letter: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ev_jobs_dlq")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;

        let mut counts = QueueCounts {
            dead_letter: to_u64("count", dead_letter)?,
            ..Default::default()
        };
        for (status, count) in rows {
            let count = to_u64("count", count)?;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => counts.pending = count,
                Some(JobStatus::Running) => counts.running = count,
                Some(JobStatus::Done) => counts.done = count,
                None => {
                    return Err(EvidenceError::integrity(format!("unknown job status {}", status)))
                }
            }
        }
        Ok(counts)
    }

    async fn list_pending(&self, due: bool, limit: usize) -> EvidenceResult<Vec<Job>> {
        let comparison = if due { "<=" } else { ">" };
        let sql = format!(
            "SELECT {} FROM ev_jobs WHERE status = 'PENDING' AND run_at {} NOW() \
             ORDER BY run_at LIMIT $1",
            JOB_COLUMNS, comparison
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        convert_all(rows)
    }

    async fn dead_letters(&self, limit: usize) -> EvidenceResult<Vec<DeadLetterJob>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT id, type, payload, dedupe_key, attempts, max_attempts,
                   last_error, created_at, updated_at, failed_at
            FROM ev_jobs_dlq
            ORDER BY failed_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        convert_all(rows)
    }

    async fn prune_done(&self, older_than: DateTime<Utc>) -> EvidenceResult<u64> {
        let result = sqlx::query("DELETE FROM ev_jobs WHERE status = 'DONE' AND updated_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}

impl PgStore {
    async fn bundle_by_row_id(&self, id: Uuid) -> EvidenceResult<EvidenceBundle> {
        let sql = format!("SELECT {} FROM evidence_bundles WHERE id = $1", BUNDLE_COLUMNS);
        let row = sqlx::query_as::<_, BundleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| EvidenceError::not_found(format!("bundle row {}", id)))?;
        EvidenceBundle::try_from(row)
    }

    /// Check the transition against the current row before writing.
    /// The UPDATE itself repeats the status guard so a concurrent
    /// transition turns into zero rows affected.
    async fn guard_transition(&self, id: Uuid, target: BundleStatus) -> EvidenceResult<BundleStatus> {
        let current = self.bundle_by_row_id(id).await?;
        if current.status.is_immutable() {
            return Err(EvidenceError::Immutable(format!(
                "bundle {} is READY",
                current.bundle_id
            )));
        }
        if !current.status.can_transition_to(target) {
            return Err(EvidenceError::conflict(format!(
                "bundle {} cannot move from {} to {}",
                current.bundle_id, current.status, target
            )));
        }
        Ok(current.status)
    }
}

fn check_transition_applied(rows: u64, id: Uuid) -> EvidenceResult<()> {
    if rows == 0 {
        return Err(EvidenceError::conflict(format!(
            "bundle row {} changed status concurrently",
            id
        )));
    }
    Ok(())
}

#[async_trait]
impl BundleStore for PgStore {
    async fn insert_bundle(&self, bundle: &EvidenceBundle) -> EvidenceResult<()> {
        let signature = bundle
            .signature
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO evidence_bundles
                (id, bundle_id, tenant_id, status, record_count, date_from, date_to,
                 purpose, created_by, disclosure, storage_key, bundle_hash, manifest_hash,
                 signature, first_sequence, last_sequence, error_message, legal_hold,
                 retention_until, expires_at, created_at, updated_at, completed_at, accessed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            "#,
        )
        .bind(bundle.id)
        .bind(&bundle.bundle_id)
        .bind(&bundle.tenant_id)
        .bind(bundle.status.as_str())
        .bind(to_i64(bundle.record_count)?)
        .bind(bundle.date_from)
        .bind(bundle.date_to)
        .bind(bundle.purpose.as_deref())
        .bind(bundle.created_by.as_deref())
        .bind(bundle.disclosure.as_str())
        .bind(bundle.storage_key.as_deref())
        .bind(bundle.bundle_hash.map(|h| h.to_prefixed()))
        .bind(bundle.manifest_hash.map(|h| h.to_prefixed()))
        .bind(signature)
        .bind(bundle.first_sequence.map(to_i64).transpose()?)
        .bind(bundle.last_sequence.map(to_i64).transpose()?)
        .bind(bundle.error_message.as_deref())
        .bind(bundle.legal_hold)
        .bind(bundle.retention_until)
        .bind(bundle.expires_at)
        .bind(bundle.created_at)
        .bind(bundle.updated_at)
        .bind(bundle.completed_at)
        .bind(bundle.accessed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_bundle(
        &self,
        tenant_id: &str,
        bundle_id: &str,
    ) -> EvidenceResult<Option<EvidenceBundle>> {
        let sql = format!(
            "SELECT {} FROM evidence_bundles WHERE tenant_id = $1 AND bundle_id = $2",
            BUNDLE_COLUMNS
        );
        let row = sqlx::query_as::<_, BundleRow>(&sql)
            .bind(tenant_id)
            .bind(bundle_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(EvidenceBundle::try_from).transpose()
    }

    async fn find_bundle(&self, bundle_id: &str) -> EvidenceResult<Option<EvidenceBundle>> {
        let sql = format!("SELECT {} FROM evidence_bundles WHERE bundle_id = $1", BUNDLE_COLUMNS);
        let row = sqlx::query_as::<_, BundleRow>(&sql)
            .bind(bundle_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(EvidenceBundle::try_from).transpose()
    }

    async fn mark_processing(&self, id: Uuid) -> EvidenceResult<()> {
        let from = self.guard_transition(id, BundleStatus::Processing).await?;
        let result = sqlx::query(
            r#"
            UPDATE evidence_bundles
            SET status = 'PROCESSING', error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        check_transition_applied(result.rows_affected(), id)
    }

    async fn mark_ready(&self, id: Uuid, update: &ReadyUpdate) -> EvidenceResult<()> {
        self.guard_transition(id, BundleStatus::Ready).await?;
        let signature = update
            .signature
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE evidence_bundles
            SET status = 'READY', storage_key = $2, bundle_hash = $3, manifest_hash = $4,
                signature = $5, record_count = $6, first_sequence = $7, last_sequence = $8,
                completed_at = $9, error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id)
        .bind(&update.storage_key)
        .bind(update.bundle_hash.to_prefixed())
        .bind(update.manifest_hash.to_prefixed())
        .bind(signature)
        .bind(to_i64(update.record_count)?)
        .bind(to_i64(update.first_sequence)?)
        .bind(to_i64(update.last_sequence)?)
        .bind(update.completed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        check_transition_applied(result.rows_affected(), id)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> EvidenceResult<()> {
        self.guard_transition(id, BundleStatus::Failed).await?;
        let result = sqlx::query(
            r#"
            UPDATE evidence_bundles
            SET status = 'FAILED', error_message = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        check_transition_applied(result.rows_affected(), id)
    }

    async fn touch_accessed(&self, id: Uuid, at: DateTime<Utc>) -> EvidenceResult<()> {
        let result = sqlx::query("UPDATE evidence_bundles SET accessed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(EvidenceError::not_found(format!("bundle row {}", id)));
        }
        Ok(())
    }

    async fn bundle_status_counts(&self) -> EvidenceResult<BundleStatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM evidence_bundles GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?;
        let mut counts = BundleStatusCounts::default();
        for (status, count) in rows {
            let status = BundleStatus::parse(&status)
                .ok_or_else(|| EvidenceError::integrity(format!("unknown bundle status {}", status)))?;
            counts.add(status, to_u64("count", count)?);
        }
        Ok(counts)
    }

    async fn expired_bundles(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> EvidenceResult<Vec<EvidenceBundle>> {
        let sql = format!(
            "SELECT {} FROM evidence_bundles \
             WHERE status = 'READY' AND legal_hold = FALSE \
               AND expires_at IS NOT NULL AND expires_at < $1 \
               AND (retention_until IS NULL OR retention_until < $1) \
             ORDER BY expires_at LIMIT $2",
            BUNDLE_COLUMNS
        );
        let rows = sqlx::query_as::<_, BundleRow>(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        convert_all(rows)
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append_event(&self, event: &AuditEvent) -> EvidenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, tenant_id, user_id, action, resource_type, resource_id,
                 metadata, ip_address, user_agent, status, error_message, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id.as_deref())
        .bind(event.user_id.as_deref())
        .bind(&event.action)
        .bind(&event.resource_type)
        .bind(event.resource_id.as_deref())
        .bind(&event.metadata)
        .bind(event.ip_address.as_deref())
        .bind(event.user_agent.as_deref())
        .bind(event.status.as_str())
        .bind(event.error_message.as_deref())
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn count_events(
        &self,
        tenant_id: &str,
        action: &str,
        status: AuditStatus,
        since: DateTime<Utc>,
    ) -> EvidenceResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM audit_logs
            WHERE tenant_id = $1 AND action = $2 AND status = $3 AND timestamp >= $4
            "#,
        )
        .bind(tenant_id)
        .bind(action)
        .bind(status.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        to_u64("count", count)
    }

    async fn events_for_resources(&self, resource_ids: &[String]) -> EvidenceResult<Vec<AuditEvent>> {
        let sql = format!(
            "SELECT {} FROM audit_logs WHERE resource_id = ANY($1) ORDER BY timestamp",
            AUDIT_COLUMNS
        );
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(resource_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        convert_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_rejects_bad_digest() {
        let row = RecordRow {
            id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            transaction_id: "txn".to_string(),
            input_hash: "sha256:zz".to_string(),
            output_hash: String::new(),
            context_hash: String::new(),
            record_hash: String::new(),
            previous_hash: String::new(),
            timestamp: Utc::now(),
            sequence: 1,
        };
        let err = DecisionRecord::try_from(row).unwrap_err();
        assert!(matches!(err, EvidenceError::Integrity(_)));
    }

    #[test]
    fn test_job_row_conversion() {
        let now = Utc::now();
        let row = JobRow {
            id: Uuid::new_v4(),
            job_type: "GENERATE_BUNDLE".to_string(),
            payload: serde_json::json!({ "bundleId": "bundle_1" }),
            dedupe_key: Some("bundle_1".to_string()),
            status: "RUNNING".to_string(),
            attempts: 2,
            max_attempts: 5,
            run_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let job = Job::try_from(row).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 2);

        let bad = JobRow {
            id: Uuid::new_v4(),
            job_type: "X".to_string(),
            payload: Value::Null,
            dedupe_key: None,
            status: "LOST".to_string(),
            attempts: 0,
            max_attempts: 5,
            run_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        assert!(Job::try_from(bad).is_err());
    }
}
