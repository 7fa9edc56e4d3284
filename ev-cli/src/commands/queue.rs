//! Queue Commands

use clap::{ArgGroup, Subcommand};
use ev_core::GENERATE_BUNDLE;
use uuid::Uuid;

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Job counts plus due and scheduled jobs
    Status {
        /// Jobs listed per section
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Put a job back to PENDING, due now
    #[command(group(ArgGroup::new("selector").required(true).args(["job_id", "bundle_id"])))]
    Reset {
        #[arg(long)]
        job_id: Option<Uuid>,

        /// Matches the dedupe key or payload bundle id
        #[arg(long)]
        bundle_id: Option<String>,
    },

    /// Make every PENDING job of a type due now with a fresh retry budget
    ForceNow {
        #[arg(long, default_value = GENERATE_BUNDLE)]
        job_type: String,
    },

    /// List dead-lettered jobs
    Dlq {
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Delete DONE jobs older than the given age
    Prune {
        #[arg(long, default_value = "7")]
        older_than_days: i64,
    },
}
