//! PostgreSQL schema
//!
//! Applied idempotently by [`PgStore::init_schema`](crate::store::PgStore::init_schema).

/// Unique constraint guarding per-tenant sequence numbers
pub const SEQUENCE_CONSTRAINT: &str = "decision_records_tenant_sequence_key";

/// Unique constraint guarding per-tenant transaction ids
pub const TRANSACTION_CONSTRAINT: &str = "decision_records_tenant_transaction_key";

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS decision_records (
    id              UUID PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    transaction_id  TEXT NOT NULL,
    input_hash      TEXT NOT NULL,
    output_hash     TEXT NOT NULL,
    context_hash    TEXT NOT NULL,
    record_hash     TEXT NOT NULL,
    previous_hash   TEXT NOT NULL,
    timestamp       TIMESTAMPTZ NOT NULL,
    sequence        BIGINT NOT NULL,
    CONSTRAINT decision_records_tenant_sequence_key UNIQUE (tenant_id, sequence),
    CONSTRAINT decision_records_tenant_transaction_key UNIQUE (tenant_id, transaction_id)
);

CREATE INDEX IF NOT EXISTS decision_records_tenant_timestamp_idx
    ON decision_records (tenant_id, timestamp);

CREATE OR REPLACE FUNCTION decision_records_append_only() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'decision_records is append-only';
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS decision_records_no_mutation ON decision_records;
CREATE TRIGGER decision_records_no_mutation
    BEFORE UPDATE OR DELETE ON decision_records
    FOR EACH ROW EXECUTE FUNCTION decision_records_append_only();

CREATE TABLE IF NOT EXISTS ledger_idempotency_keys (
    tenant_id        TEXT NOT NULL,
    idempotency_key  TEXT NOT NULL,
    record_id        UUID NOT NULL REFERENCES decision_records (id),
    created_at       TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (tenant_id, idempotency_key)
);

CREATE TABLE IF NOT EXISTS ev_jobs (
    id            UUID PRIMARY KEY,
    type          TEXT NOT NULL,
    payload       JSONB NOT NULL,
    dedupe_key    TEXT UNIQUE,
    status        TEXT NOT NULL CHECK (status IN ('PENDING', 'RUNNING', 'DONE')),
    attempts      INTEGER NOT NULL DEFAULT 0,
    max_attempts  INTEGER NOT NULL DEFAULT 5,
    run_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_error    TEXT,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS ev_jobs_status_run_at_idx ON ev_jobs (status, run_at);

CREATE TABLE IF NOT EXISTS ev_jobs_dlq (
    id            UUID PRIMARY KEY,
    type          TEXT NOT NULL,
    payload       JSONB NOT NULL,
    dedupe_key    TEXT,
    attempts      INTEGER NOT NULL,
    max_attempts  INTEGER NOT NULL,
    last_error    TEXT,
    created_at    TIMESTAMPTZ NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL,
    failed_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS evidence_bundles (
    id              UUID PRIMARY KEY,
    bundle_id       TEXT NOT NULL UNIQUE,
    tenant_id       TEXT NOT NULL,
    status          TEXT NOT NULL CHECK (status IN ('PENDING', 'PROCESSING', 'READY', 'FAILED')),
    record_count    BIGINT NOT NULL DEFAULT 0,
    date_from       TIMESTAMPTZ,
    date_to         TIMESTAMPTZ,
    purpose         TEXT,
    created_by      TEXT,
    disclosure      TEXT NOT NULL DEFAULT 'HASHES_ONLY',
    storage_key     TEXT,
    bundle_hash     TEXT,
    manifest_hash   TEXT,
    signature       JSONB,
    first_sequence  BIGINT,
    last_sequence   BIGINT,
    error_message   TEXT,
    legal_hold      BOOLEAN NOT NULL DEFAULT FALSE,
    retention_until TIMESTAMPTZ,
    expires_at      TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at    TIMESTAMPTZ,
    accessed_at     TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS evidence_bundles_tenant_idx ON evidence_bundles (tenant_id, created_at);

CREATE OR REPLACE FUNCTION evidence_bundles_ready_guard() RETURNS trigger AS $$
BEGIN
    IF OLD.status = 'READY' AND (
        NEW.status IS DISTINCT FROM OLD.status
        OR NEW.bundle_hash IS DISTINCT FROM OLD.bundle_hash
        OR NEW.manifest_hash IS DISTINCT FROM OLD.manifest_hash
        OR NEW.signature IS DISTINCT FROM OLD.signature
        OR NEW.storage_key IS DISTINCT FROM OLD.storage_key
        OR NEW.record_count IS DISTINCT FROM OLD.record_count
    ) THEN
        RAISE EXCEPTION 'evidence bundle % is READY and immutable', OLD.bundle_id;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS evidence_bundles_ready_immutable ON evidence_bundles;
CREATE TRIGGER evidence_bundles_ready_immutable
    BEFORE UPDATE ON evidence_bundles
    FOR EACH ROW EXECUTE FUNCTION evidence_bundles_ready_guard();

CREATE TABLE IF NOT EXISTS audit_logs (
    id             UUID PRIMARY KEY,
    tenant_id      TEXT,
    user_id        TEXT,
    action         TEXT NOT NULL,
    resource_type  TEXT NOT NULL,
    resource_id    TEXT,
    metadata       JSONB NOT NULL DEFAULT '{}'::jsonb,
    ip_address     TEXT,
    user_agent     TEXT,
    status         TEXT NOT NULL,
    error_message  TEXT,
    timestamp      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS audit_logs_rate_idx
    ON audit_logs (tenant_id, action, status, timestamp);
CREATE INDEX IF NOT EXISTS audit_logs_resource_idx
    ON audit_logs (resource_id, timestamp);
"#;
