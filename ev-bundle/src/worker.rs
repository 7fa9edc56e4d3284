//! Bundle worker
//!
//! Claim → handle → `mark_done` or the queue's failure path. Any number of
//! workers may run against one store; the store's claim is the only
//! coordination between them.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::builder::{BuildOutcome, BundleBuilder};
use crate::config::WorkerConfig;
use ev_core::logging::{fields, operations, LogContext};
use ev_core::{EvidenceError, EvidenceResult, GenerateBundlePayload, Job, GENERATE_BUNDLE};
use ev_db::{FailureDisposition, JobQueue};

/// How one claimed job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Built(BuildOutcome),
    /// Marked DONE without work: unknown type or missing bundle
    Skipped(String),
    Failed {
        error: String,
        disposition: FailureDisposition,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: Uuid,
    pub job_type: String,
    pub result: JobResult,
}

/// Totals for a drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub processed: usize,
    pub built: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DrainSummary {
    fn add(&mut self, report: &JobReport) {
        self.processed += 1;
        match report.result {
            JobResult::Built(_) => self.built += 1,
            JobResult::Skipped(_) => self.skipped += 1,
            JobResult::Failed { .. } => self.failed += 1,
        }
    }
}

fn unrecorded(job: &Job, err: &EvidenceError) -> FailureDisposition {
    error!(
        job_id = %job.id,
        error = %err,
        "Queue update failed, job left RUNNING until reset"
    );
    FailureDisposition::Unrecorded {
        error: err.to_string(),
    }
}

/// Bundle worker
#[derive(Clone)]
pub struct BundleWorker {
    queue: JobQueue,
    builder: BundleBuilder,
    config: WorkerConfig,
}

impl BundleWorker {
    pub fn new(queue: JobQueue, builder: BundleBuilder, config: WorkerConfig) -> Self {
        Self {
            queue,
            builder,
            config,
        }
    }

    /// Claim and handle at most one job
    ///
    /// Only a failed claim is an error. Handler and queue-update failures
    /// are reported in the [`JobReport`].
    pub async fn run_once(&self) -> EvidenceResult<Option<JobReport>> {
        let Some(job) = self.queue.claim_next(self.config.job_type.as_deref()).await? else {
            return Ok(None);
        };

        let span = LogContext::new()
            .with_operation(operations::JOB_CLAIM)
            .with_tag(fields::JOB_ID, job.id.to_string())
            .with_tag(fields::JOB_TYPE, job.job_type.clone())
            .span();
        let result = self.handle(&job).instrument(span).await;

        Ok(Some(JobReport {
            job_id: job.id,
            job_type: job.job_type,
            result,
        }))
    }

    async fn handle(&self, job: &Job) -> JobResult {
        if job.job_type != GENERATE_BUNDLE {
            warn!(job_id = %job.id, job_type = %job.job_type, "Unknown job type, marking done");
            return self
                .finish(job, JobResult::Skipped(format!("unknown job type {}", job.job_type)))
                .await;
        }

        let outcome = match serde_json::from_value::<GenerateBundlePayload>(job.payload.clone()) {
            Ok(payload) => {
                self.builder
                    .build(&payload.bundle_id, &payload.tenant_id, &payload.date_filter)
                    .await
            }
            Err(e) => Err(EvidenceError::validation(format!("malformed payload: {}", e))),
        };

        match outcome {
            Ok(outcome) => {
                debug!(job_id = %job.id, "Bundle job done");
                self.finish(job, JobResult::Built(outcome)).await
            }
            Err(EvidenceError::NotFound(what)) => {
                warn!(job_id = %job.id, missing = %what, "Bundle row missing, marking done");
                self.finish(job, JobResult::Skipped(format!("{} not found", what)))
                    .await
            }
            Err(e) => {
                let disposition = match self.queue.handle_error(job, &e).await {
                    Ok(disposition) => disposition,
                    Err(queue_err) => unrecorded(job, &queue_err),
                };
                JobResult::Failed {
                    error: e.to_string(),
                    disposition,
                }
            }
        }
    }

    /// Mark the job DONE and pass `result` through, or report the queue error
    async fn finish(&self, job: &Job, result: JobResult) -> JobResult {
        match self.queue.mark_done(job.id).await {
            Ok(()) => result,
            Err(e) => JobResult::Failed {
                error: e.to_string(),
                disposition: unrecorded(job, &e),
            },
        }
    }

    /// Handle jobs until the queue has nothing due or `max` were processed
    pub async fn drain(&self, max: usize) -> EvidenceResult<DrainSummary> {
        let mut summary = DrainSummary::default();
        while summary.processed < max {
            match self.run_once().await? {
                Some(report) => summary.add(&report),
                None => break,
            }
        }
        Ok(summary)
    }

    /// Poll in the background until the handle is stopped
    pub async fn start(self) -> RunnerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let running = Arc::new(RwLock::new(true));
        let running_clone = running.clone();
        let poll = self.config.poll_interval();
        let batch = self.config.batch_size.max(1);

        tokio::spawn(async move {
            let mut timer = interval(poll);
            info!(poll_ms = poll.as_millis() as u64, batch, "Bundle worker started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Bundle worker received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => {
                        if *running_clone.read().await {
                            match self.drain(batch).await {
                                Ok(summary) if summary.processed > 0 => {
                                    info!(
                                        processed = summary.processed,
                                        built = summary.built,
                                        failed = summary.failed,
                                        "Worker tick"
                                    );
                                }
                                Ok(_) => {}
                                Err(e) => error!("Error processing queue: {}", e),
                            }
                        }
                    }
                }
            }

            info!("Bundle worker stopped");
        });

        RunnerHandle {
            shutdown_tx,
            running,
        }
    }
}

/// Control handle for a started worker
pub struct RunnerHandle {
    shutdown_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl RunnerHandle {
    pub async fn stop(self) {
        *self.running.write().await = false;
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Skip ticks until resumed
    pub async fn pause(&self) {
        *self.running.write().await = false;
    }

    pub async fn resume(&self) {
        *self.running.write().await = true;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
