//! Evidence CLI Entry Point
//!
//! Configuration is loaded from environment variables (via .env file).
//! Command-line arguments override environment variables.
//!
//! Usage:
//!   evidence init      - Apply the database schema
//!   evidence worker    - Run the bundle worker
//!   evidence ledger    - Append and verify decision records
//!   evidence queue     - Inspect and repair the job queue
//!   evidence bundle    - Request, reprocess, access and clean up bundles
//!   evidence custody   - Chain-of-custody report for a bundle
//!   evidence verify    - Verify a bundle manifest offline
//!   evidence keys      - Signing key utilities

use clap::Parser;
use ev_cli::{handler, Cli};
use ev_core::logging::{LogContext, LogLevel};
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_level());

    // One id per invocation ties together every log line it produces
    let span = LogContext::new()
        .with_request_id(uuid::Uuid::new_v4().to_string())
        .span();
    if let Err(e) = handler::run(cli).instrument(span).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Logs go to stderr so command output stays machine-readable
fn init_logging(level: LogLevel) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.directive().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
