//! Bundle Commands

use chrono::{DateTime, Utc};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum BundleCommands {
    /// Request a bundle over a date range
    Request {
        #[arg(long)]
        tenant: String,

        /// Why the bundle is produced, recorded with it
        #[arg(long)]
        purpose: String,

        /// Inclusive lower bound, RFC 3339
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Inclusive upper bound, RFC 3339
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        #[arg(long)]
        created_by: Option<String>,

        /// Ship each record's full hash tuple
        #[arg(long)]
        full: bool,

        /// Exempt from retention cleanup
        #[arg(long)]
        legal_hold: bool,

        #[arg(long)]
        retention_until: Option<DateTime<Utc>>,
    },

    /// Show a bundle
    Show {
        #[arg(long)]
        tenant: String,

        bundle_id: String,

        #[arg(long)]
        user: Option<String>,
    },

    /// Queue a failed or stuck bundle for another build
    Reprocess {
        #[arg(long)]
        tenant: String,

        bundle_id: String,

        #[arg(long)]
        user: Option<String>,
    },

    /// Issue a download link and record the access
    Access {
        #[arg(long)]
        tenant: String,

        bundle_id: String,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        ip: Option<String>,
    },

    /// Record a disclosure to an outside party
    Disclose {
        #[arg(long)]
        tenant: String,

        bundle_id: String,

        /// e.g. regulator or counsel name
        #[arg(long)]
        recipient: String,

        #[arg(long)]
        user: Option<String>,
    },

    /// Delete artifacts of expired bundles
    Cleanup {
        /// Report what would be deleted
        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = "100")]
        limit: usize,
    },
}
