//! Evidence CLI - operator tooling for the evidence pipeline
//!
//! # Usage
//!
//! ```text
//! evidence [OPTIONS] <COMMAND>
//!
//! Commands:
//!   init     Apply the database schema
//!   worker   Run the bundle worker
//!   ledger   Append and verify decision records
//!   queue    Inspect and repair the job queue
//!   bundle   Request, reprocess, access and clean up bundles
//!   custody  Chain-of-custody report for a bundle
//!   verify   Verify a bundle manifest offline
//!   keys     Signing key utilities
//!
//! Options:
//!   -f, --format <FORMAT>        Output format (text, json) [default: text]
//!       --database-url <URL>     PostgreSQL URL; in-memory store when unset
//!       --storage-root <DIR>     Bundle artifact directory
//!       --log-level <LEVEL>      error, warn, info, debug, trace
//!   -v, --verbose                Debug logging
//! ```
//!
//! # Examples
//!
//! ```text
//! evidence bundle request --tenant acme-bank --purpose "regulator inquiry" \
//!   --from 2024-01-01T00:00:00Z --to 2024-03-31T23:59:59Z
//! evidence worker --once
//! evidence verify --manifest ./bundle_ab12/manifest.json --public-key signer.pem
//! ```

pub mod commands;
pub mod error;
pub mod handler;
pub mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use error::{CliError, CliResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
