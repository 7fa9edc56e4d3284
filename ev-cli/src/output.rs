//! Output Formatting

use serde::Serialize;

use crate::commands::OutputFormat;
use ev_bundle::{AccessGrant, CleanupReport, DrainSummary, PipelineStatus, ReprocessOutcome};
use ev_core::time::to_iso;
use ev_core::{ChainVerification, DeadLetterJob, DecisionRecord, EvidenceBundle, Job};
use ev_signer::PublicKeyInfo;

/// Print as JSON
pub fn print_json<T: Serialize + ?Sized>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error formatting JSON: {}", e),
    }
}

/// Print a table row
pub fn print_row(key: &str, value: impl std::fmt::Display) {
    println!("{:<18} {}", key, value);
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn print_record(record: &DecisionRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Text => {
            print_row("Sequence:", record.sequence);
            print_row("Tenant:", &record.tenant_id);
            print_row("Transaction:", &record.transaction_id);
            print_row("Timestamp:", to_iso(&record.timestamp));
            print_row("Record hash:", record.record_hash);
            print_row("Previous hash:", record.previous_hash);
        }
    }
}

pub fn print_chain(tenant_id: &str, result: &ChainVerification, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(result),
        OutputFormat::Text => {
            print_row("Tenant:", tenant_id);
            print_row("Valid:", result.valid);
            print_row("Records checked:", result.records_checked);
            if let Some(at) = result.broken_at {
                print_row("Broken at:", at);
            }
            if let Some(reason) = &result.reason {
                print_row("Reason:", reason);
            }
        }
    }
}

fn print_jobs(title: &str, jobs: &[Job]) {
    println!("{} ({})", title, jobs.len());
    for job in jobs {
        println!(
            "  {} {} attempts={}/{} runAt={} key={}",
            job.id,
            job.job_type,
            job.attempts,
            job.max_attempts,
            to_iso(&job.run_at),
            job.dedupe_key.as_deref().unwrap_or("-")
        );
        if let Some(error) = &job.last_error {
            println!("      last error: {}", error);
        }
    }
}

pub fn print_status(status: &PipelineStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(status),
        OutputFormat::Text => {
            let q = &status.queue.counts;
            let b = &status.bundles;
            println!("Jobs");
            println!("====");
            print_row("Pending:", q.pending);
            print_row("Running:", q.running);
            print_row("Done:", q.done);
            print_row("Dead letter:", q.dead_letter);
            println!();
            println!("Bundles");
            println!("=======");
            print_row("Pending:", b.pending);
            print_row("Processing:", b.processing);
            print_row("Ready:", b.ready);
            print_row("Failed:", b.failed);
            println!();
            print_jobs("Due", &status.queue.due);
            print_jobs("Scheduled", &status.queue.scheduled);
        }
    }
}

pub fn print_dead_letters(jobs: &[DeadLetterJob], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(jobs),
        OutputFormat::Text => {
            println!("Dead-lettered jobs ({})", jobs.len());
            for job in jobs {
                println!(
                    "  {} {} attempts={}/{} failedAt={} key={}",
                    job.id,
                    job.job_type,
                    job.attempts,
                    job.max_attempts,
                    to_iso(&job.failed_at),
                    job.dedupe_key.as_deref().unwrap_or("-")
                );
                if let Some(error) = &job.last_error {
                    println!("      {}", error);
                }
            }
        }
    }
}

pub fn print_bundle(bundle: &EvidenceBundle, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(bundle),
        OutputFormat::Text => {
            print_row("Bundle:", &bundle.bundle_id);
            print_row("Tenant:", &bundle.tenant_id);
            print_row("Status:", bundle.status);
            print_row("Records:", bundle.record_count);
            print_row("From:", or_dash(bundle.date_from.as_ref().map(to_iso)));
            print_row("To:", or_dash(bundle.date_to.as_ref().map(to_iso)));
            print_row("Disclosure:", bundle.disclosure.as_str());
            print_row("Bundle hash:", or_dash(bundle.bundle_hash));
            print_row("Manifest hash:", or_dash(bundle.manifest_hash));
            print_row("Storage key:", or_dash(bundle.storage_key.as_deref()));
            print_row(
                "Signed by:",
                or_dash(bundle.signature.as_ref().map(|s| s.key_id.as_str())),
            );
            print_row("Legal hold:", bundle.legal_hold);
            print_row("Expires:", or_dash(bundle.expires_at.as_ref().map(to_iso)));
            if let Some(error) = &bundle.error_message {
                print_row("Error:", error);
            }
        }
    }
}

pub fn print_reprocess(outcome: &ReprocessOutcome, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(outcome),
        OutputFormat::Text => {
            if outcome.enqueued {
                println!("Enqueued a new build job for {}", outcome.bundle_id);
            } else {
                println!("Reset {} job(s) for {}", outcome.jobs_reset, outcome.bundle_id);
            }
        }
    }
}

pub fn print_access(grant: &AccessGrant, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(grant),
        OutputFormat::Text => {
            print_row("Bundle:", &grant.bundle_id);
            print_row("URL:", &grant.url);
            print_row("Expires:", to_iso(&grant.expires_at));
        }
    }
}

pub fn print_cleanup(report: &CleanupReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Text => {
            let verb = if report.dry_run { "Would clean" } else { "Cleaned" };
            println!("{} {} bundle(s), {} failed", verb, report.cleaned(), report.failed());
            for entry in &report.entries {
                match &entry.error {
                    Some(error) => println!("  {} {} FAILED: {}", entry.tenant_id, entry.bundle_id, error),
                    None => println!("  {} {} ({} objects)", entry.tenant_id, entry.bundle_id, entry.keys.len()),
                }
            }
        }
    }
}

pub fn print_drain(summary: &DrainSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Text => println!(
            "Processed {} job(s): {} built, {} skipped, {} failed",
            summary.processed, summary.built, summary.skipped, summary.failed
        ),
    }
}

pub fn print_public_key(info: &PublicKeyInfo, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(info),
        OutputFormat::Text => {
            print_row("Key id:", &info.key_id);
            print_row("Algorithm:", &info.algorithm);
            print_row("Fingerprint:", &info.fingerprint);
            println!();
            print!("{}", info.pem);
        }
    }
}

/// Print warning message
pub fn print_warning(message: &str) {
    eprintln!("Warning: {}", message);
}
