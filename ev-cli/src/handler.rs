//! Command Handlers

use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::commands::{
    bundle::BundleCommands, keys::KeysCommands, ledger::LedgerCommands, queue::QueueCommands, Cli,
    Commands, OutputFormat,
};
use crate::error::{CliError, CliResult};
use crate::output;
use ev_bundle::{
    BundleBuilder, BundleOps, BundleRequest, BundleWorker, LocalStorageAdapter, StorageAdapter,
    WorkerConfig,
};
use ev_core::{AppendRequest, DateFilter, DisclosureLevel, JobSelector};
use ev_db::{open_store, JobQueue, LedgerService, QueueConfig, SharedStore, StoreConfig};
use ev_signer::{EvidenceSigningKey, LocalKeyBackend, SignerConfig, SigningService};
use ev_verifier::{format_text, CustodyService, OfflineVerifier};

/// Store handle and configuration shared by the handlers
struct Context {
    store: SharedStore,
    queue_config: QueueConfig,
    worker_config: WorkerConfig,
    signer_config: SignerConfig,
}

impl Context {
    async fn open(cli: &Cli) -> CliResult<Self> {
        let mut store_config = StoreConfig::from_env();
        if cli.database_url.is_some() {
            store_config.database_url = cli.database_url.clone();
        }
        let mut worker_config = WorkerConfig::from_env();
        if let Some(root) = &cli.storage_root {
            worker_config.storage_root = root.clone();
        }

        Ok(Self {
            store: open_store(&store_config).await?,
            queue_config: QueueConfig::from_env(),
            worker_config,
            signer_config: SignerConfig::from_env(),
        })
    }

    fn queue(&self) -> JobQueue {
        JobQueue::new(self.store.clone(), self.queue_config.clone())
    }

    fn ledger(&self) -> LedgerService {
        LedgerService::new(self.store.clone(), self.queue_config.append_retries)
    }

    async fn storage(&self) -> CliResult<Arc<dyn StorageAdapter>> {
        let adapter = LocalStorageAdapter::new(&self.worker_config.storage_root).await?;
        Ok(Arc::new(adapter))
    }

    async fn ops(&self) -> CliResult<BundleOps> {
        Ok(BundleOps::new(
            self.store.clone(),
            self.queue(),
            self.storage().await?,
            self.worker_config.clone(),
        ))
    }

    async fn signer(&self) -> CliResult<Arc<SigningService>> {
        let key = self.signer_config.load_key().await?;
        Ok(Arc::new(SigningService::new(
            self.store.clone(),
            Arc::new(LocalKeyBackend::new(key)),
            &self.signer_config,
        )))
    }
}

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli) -> CliResult<()> {
    let format = cli.format;
    match &cli.command {
        // Store-free commands
        Commands::Verify {
            manifest,
            public_key,
            fingerprint,
        } => return handle_verify(manifest, public_key.as_deref(), fingerprint.as_deref(), format).await,
        Commands::Keys(KeysCommands::Generate { out, force }) => {
            return handle_generate_key(out, *force).await
        }
        _ => {}
    }

    let ctx = Context::open(&cli).await?;
    let persistent = cli.database_url.is_some();
    match cli.command {
        Commands::Init => handle_init(persistent),
        Commands::Worker { once, max } => handle_worker(&ctx, once, max, format).await,
        Commands::Ledger(cmd) => handle_ledger(&ctx, cmd, format).await,
        Commands::Queue(cmd) => handle_queue(&ctx, cmd, format).await,
        Commands::Bundle(cmd) => handle_bundle(&ctx, cmd, format).await,
        Commands::Custody {
            bundle_id,
            tenant,
            public_key,
            generated_by,
        } => {
            handle_custody(
                &ctx,
                &bundle_id,
                tenant.as_deref(),
                public_key.as_deref(),
                generated_by.as_deref(),
                format,
            )
            .await
        }
        Commands::Keys(KeysCommands::Public) => {
            let info = ctx.signer().await?.public_key().await?;
            output::print_public_key(&info, format);
            Ok(())
        }
        Commands::Verify { .. } | Commands::Keys(KeysCommands::Generate { .. }) => Ok(()),
    }
}

/// Schema is applied by `open_store`; this only reports the outcome
fn handle_init(persistent: bool) -> CliResult<()> {
    if persistent {
        println!("Database schema initialized successfully.");
    } else {
        output::print_warning("DATABASE_URL not set; the in-memory store needs no schema");
    }
    Ok(())
}

async fn handle_worker(ctx: &Context, once: bool, max: usize, format: OutputFormat) -> CliResult<()> {
    let builder = BundleBuilder::new(ctx.store.clone(), ctx.storage().await?).with_signer(ctx.signer().await?);
    let worker = BundleWorker::new(ctx.queue(), builder, ctx.worker_config.clone());

    if once {
        let summary = worker.drain(max).await?;
        output::print_drain(&summary, format);
        return Ok(());
    }

    let handle = worker.start().await;
    info!("Worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker");
    handle.stop().await;
    Ok(())
}

async fn handle_ledger(ctx: &Context, cmd: LedgerCommands, format: OutputFormat) -> CliResult<()> {
    let ledger = ctx.ledger();
    match cmd {
        LedgerCommands::Append {
            tenant,
            transaction_id,
            input_hash,
            output_hash,
            context_hash,
            idempotency_key,
        } => {
            let request =
                AppendRequest::parse(tenant, transaction_id, &input_hash, &output_hash, &context_hash)?;
            let record = match idempotency_key {
                Some(key) => ledger.append_idempotent(request, &key).await?,
                None => ledger.append(request).await?,
            };
            output::print_record(&record, format);
        }
        LedgerCommands::Verify { tenant, from, to } => {
            let result = match (from, to) {
                (None, None) => ledger.verify_tenant(&tenant).await?,
                (from, to) => {
                    let to = match to {
                        Some(to) => to,
                        None => ctx
                            .store
                            .chain_tail(&tenant)
                            .await?
                            .map_or(0, |tail| tail.sequence),
                    };
                    ledger.verify_chain(&tenant, from.unwrap_or(1), to).await?
                }
            };
            output::print_chain(&tenant, &result, format);
            if !result.valid {
                return Err(CliError::verification_failed(format!(
                    "chain of {} broken at sequence {}",
                    tenant,
                    result.broken_at.unwrap_or_default()
                )));
            }
        }
        LedgerCommands::Get {
            tenant,
            transaction_id,
        } => {
            let record = ledger
                .find_by_transaction(&tenant, &transaction_id)
                .await?
                .ok_or_else(|| {
                    ev_core::EvidenceError::not_found(format!("transaction {}", transaction_id))
                })?;
            output::print_record(&record, format);
        }
        LedgerCommands::PruneKeys => {
            let pruned = ledger.idempotency().prune_expired(Utc::now()).await?;
            println!("Pruned {} expired idempotency key(s)", pruned);
        }
    }
    Ok(())
}

async fn handle_queue(ctx: &Context, cmd: QueueCommands, format: OutputFormat) -> CliResult<()> {
    let queue = ctx.queue();
    match cmd {
        QueueCommands::Status { limit } => {
            let status = ctx.ops().await?.status(limit).await?;
            output::print_status(&status, format);
        }
        QueueCommands::Reset { job_id, bundle_id } => {
            let selector = match (job_id, bundle_id) {
                (Some(id), _) => JobSelector::Id(id),
                (None, Some(bundle_id)) => JobSelector::BundleId(bundle_id),
                (None, None) => return Err(CliError::invalid_arg("--job-id or --bundle-id is required")),
            };
            let count = queue.reset(&selector).await?;
            println!("Reset {} job(s)", count);
        }
        QueueCommands::ForceNow { job_type } => {
            let count = queue.force_now(&job_type).await?;
            println!("{} {} job(s) due now", count, job_type);
        }
        QueueCommands::Dlq { limit } => {
            let jobs = queue.dead_letters(limit).await?;
            output::print_dead_letters(&jobs, format);
        }
        QueueCommands::Prune { older_than_days } => {
            if older_than_days < 0 {
                return Err(CliError::invalid_arg("--older-than-days must not be negative"));
            }
            let count = queue.prune_done(Utc::now() - Duration::days(older_than_days)).await?;
            println!("Pruned {} done job(s)", count);
        }
    }
    Ok(())
}

async fn handle_bundle(ctx: &Context, cmd: BundleCommands, format: OutputFormat) -> CliResult<()> {
    let ops = ctx.ops().await?;
    match cmd {
        BundleCommands::Request {
            tenant,
            purpose,
            from,
            to,
            created_by,
            full,
            legal_hold,
            retention_until,
        } => {
            let bundle = ops
                .request_bundle(BundleRequest {
                    tenant_id: tenant,
                    date_filter: DateFilter::new(from, to),
                    purpose,
                    created_by,
                    disclosure: if full {
                        DisclosureLevel::Full
                    } else {
                        DisclosureLevel::HashesOnly
                    },
                    legal_hold,
                    retention_until,
                })
                .await?;
            output::print_bundle(&bundle, format);
        }
        BundleCommands::Show {
            tenant,
            bundle_id,
            user,
        } => {
            let bundle = ops.view(&tenant, &bundle_id, user.as_deref()).await?;
            output::print_bundle(&bundle, format);
        }
        BundleCommands::Reprocess {
            tenant,
            bundle_id,
            user,
        } => {
            let outcome = ops.reprocess(&tenant, &bundle_id, user.as_deref()).await?;
            output::print_reprocess(&outcome, format);
        }
        BundleCommands::Access {
            tenant,
            bundle_id,
            user,
            ip,
        } => {
            let grant = ops
                .record_access(&tenant, &bundle_id, user.as_deref(), ip.as_deref())
                .await?;
            output::print_access(&grant, format);
        }
        BundleCommands::Disclose {
            tenant,
            bundle_id,
            recipient,
            user,
        } => {
            ops.record_disclosure(&tenant, &bundle_id, &recipient, user.as_deref())
                .await?;
            println!("Disclosure of {} to {} recorded", bundle_id, recipient);
        }
        BundleCommands::Cleanup { dry_run, limit } => {
            let report = ops.cleanup_expired(dry_run, limit).await?;
            output::print_cleanup(&report, format);
        }
    }
    Ok(())
}

async fn handle_custody(
    ctx: &Context,
    bundle_id: &str,
    tenant: Option<&str>,
    public_key: Option<&Path>,
    generated_by: Option<&str>,
    format: OutputFormat,
) -> CliResult<()> {
    let mut custody = CustodyService::new(ctx.store.clone(), ctx.storage().await?);
    if let Some(path) = public_key {
        custody = custody.with_public_key(tokio::fs::read_to_string(path).await?);
    }

    let report = custody.build_report(bundle_id, tenant, generated_by).await?;
    match format {
        OutputFormat::Json => output::print_json(&report),
        OutputFormat::Text => print!("{}", format_text(&report)),
    }
    Ok(())
}

async fn handle_verify(
    manifest: &Path,
    public_key: Option<&Path>,
    fingerprint: Option<&str>,
    format: OutputFormat,
) -> CliResult<()> {
    let mut verifier = OfflineVerifier::new();
    if let Some(path) = public_key {
        let pem = tokio::fs::read_to_string(path).await?;
        verifier = verifier.with_public_key(&pem, fingerprint)?;
    }

    let report = if tokio::fs::metadata(manifest).await?.is_dir() {
        verifier.verify_dir(manifest).await?
    } else {
        verifier.verify_bytes(&tokio::fs::read(manifest).await?)?
    };

    match format {
        OutputFormat::Json => output::print_json(&report),
        OutputFormat::Text => println!("{}", report),
    }

    if report.is_valid() {
        Ok(())
    } else {
        let codes: Vec<&str> = report.errors.iter().map(|e| e.code.as_str()).collect();
        Err(CliError::verification_failed(codes.join(", ")))
    }
}

async fn handle_generate_key(out: &Path, force: bool) -> CliResult<()> {
    if !force && tokio::fs::try_exists(out).await? {
        return Err(CliError::invalid_arg(format!(
            "{} exists, pass --force to overwrite",
            out.display()
        )));
    }

    let key = EvidenceSigningKey::generate();
    tokio::fs::write(out, key.to_pkcs8_pem()?).await?;
    println!("Wrote {} (key id {})", out.display(), key.kid);
    println!("Set EV_SIGNER_KEY_PATH={} to sign with it", out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ev_db::MemoryStore;

    fn memory_context(storage_root: &Path) -> Context {
        Context {
            store: Arc::new(MemoryStore::new()),
            queue_config: QueueConfig::default(),
            worker_config: WorkerConfig {
                storage_root: storage_root.to_path_buf(),
                ..WorkerConfig::default()
            },
            signer_config: SignerConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_generated_key_is_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signer.pem");

        handle_generate_key(&path, false).await.unwrap();
        let config = SignerConfig {
            key_path: Some(path.clone()),
            ..SignerConfig::default()
        };
        assert!(config.load_key().await.is_ok());

        // Refuses to clobber without --force
        let err = handle_generate_key(&path, false).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        handle_generate_key(&path, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_ledger_commands_against_memory_store() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = memory_context(dir.path());

        let append = |tx: &str| LedgerCommands::Append {
            tenant: "tenant-a".to_string(),
            transaction_id: tx.to_string(),
            input_hash: "a".repeat(64),
            output_hash: format!("sha256:{}", "b".repeat(64)),
            context_hash: "c".repeat(64),
            idempotency_key: None,
        };
        handle_ledger(&ctx, append("tx-1"), OutputFormat::Json).await.unwrap();
        handle_ledger(&ctx, append("tx-2"), OutputFormat::Text).await.unwrap();

        let err = handle_ledger(&ctx, append("tx-1"), OutputFormat::Text)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let verify = LedgerCommands::Verify {
            tenant: "tenant-a".to_string(),
            from: Some(2),
            to: None,
        };
        handle_ledger(&ctx, verify, OutputFormat::Text).await.unwrap();

        // Each command builds its own ledger service; the key still replays
        let keyed = || LedgerCommands::Append {
            tenant: "tenant-a".to_string(),
            transaction_id: "tx-3".to_string(),
            input_hash: "d".repeat(64),
            output_hash: "e".repeat(64),
            context_hash: "f".repeat(64),
            idempotency_key: Some("retry_0123456789abcdef".to_string()),
        };
        handle_ledger(&ctx, keyed(), OutputFormat::Text).await.unwrap();
        handle_ledger(&ctx, keyed(), OutputFormat::Text).await.unwrap();
        assert_eq!(ctx.store.chain_tail("tenant-a").await.unwrap().unwrap().sequence, 3);

        handle_ledger(&ctx, LedgerCommands::PruneKeys, OutputFormat::Text)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_reports_failure_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        tokio::fs::write(&path, b"{}").await.unwrap();

        let err = handle_verify(&path, None, None, OutputFormat::Text)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 11);
    }
}
