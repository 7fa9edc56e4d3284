//! CLI Commands Module

pub mod bundle;
pub mod keys;
pub mod ledger;
pub mod queue;

use clap::{Parser, Subcommand};
use ev_core::logging::LogLevel;
use std::path::PathBuf;

/// Evidence pipeline CLI
#[derive(Parser, Debug)]
#[command(name = "evidence")]
#[command(version)]
#[command(about = "Decision ledger, evidence bundles and offline verification")]
#[command(long_about = "Operator tool for the evidence pipeline.\n\n\
    Append and verify decision records, drive bundle generation, inspect the \
    job queue, and verify bundles with nothing but the manifest and a public key.")]
pub struct Cli {
    /// PostgreSQL URL; the in-memory store is used when unset
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Bundle artifact directory (env: EV_WORKER_STORAGE_ROOT)
    #[arg(long, env = "EV_WORKER_STORAGE_ROOT", global = true)]
    pub storage_root: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Log level (env: EV_LOG_LEVEL)
    #[arg(long, env = "EV_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// `--verbose` wins, then `--log-level`, then INFO
    pub fn log_level(&self) -> LogLevel {
        if self.verbose {
            return LogLevel::Debug;
        }
        self.log_level
            .as_deref()
            .and_then(LogLevel::parse)
            .unwrap_or_default()
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the database schema
    Init,

    /// Run the bundle worker until interrupted
    Worker {
        /// Drain due jobs once and exit
        #[arg(long)]
        once: bool,

        /// Maximum jobs per drain with --once
        #[arg(long, default_value = "100")]
        max: usize,
    },

    /// Decision ledger
    #[command(subcommand)]
    Ledger(ledger::LedgerCommands),

    /// Job queue maintenance
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Evidence bundles
    #[command(subcommand)]
    Bundle(bundle::BundleCommands),

    /// Chain-of-custody report for a bundle
    Custody {
        /// Bundle identifier
        bundle_id: String,

        /// Restrict the lookup to this tenant
        #[arg(long)]
        tenant: Option<String>,

        /// Also check the signature against this SPKI PEM file
        #[arg(long)]
        public_key: Option<PathBuf>,

        /// Recorded as the report's author
        #[arg(long)]
        generated_by: Option<String>,
    },

    /// Verify a bundle offline
    Verify {
        /// manifest.json, or an unpacked bundle directory
        #[arg(short, long)]
        manifest: PathBuf,

        /// Signer's SPKI PEM public key file
        #[arg(long)]
        public_key: Option<PathBuf>,

        /// Trusted SHA-256 fingerprint of the public key
        #[arg(long, requires = "public_key")]
        fingerprint: Option<String>,
    },

    /// Signing key utilities
    #[command(subcommand)]
    Keys(keys::KeysCommands),
}
