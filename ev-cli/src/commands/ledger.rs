//! Ledger Commands

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum LedgerCommands {
    /// Append a decision record
    Append {
        #[arg(long)]
        tenant: String,

        /// Caller-side transaction identifier, unique per tenant
        #[arg(long)]
        transaction_id: String,

        /// `sha256:<hex>` or 64-char hex
        #[arg(long)]
        input_hash: String,

        #[arg(long)]
        output_hash: String,

        #[arg(long)]
        context_hash: String,

        /// Replays the first record when repeated
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Verify a tenant's chain, or a segment of it
    Verify {
        #[arg(long)]
        tenant: String,

        /// First sequence to check [default: 1]
        #[arg(long)]
        from: Option<u64>,

        /// Last sequence to check [default: chain tail]
        #[arg(long)]
        to: Option<u64>,
    },

    /// Look up a record by transaction id
    Get {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        transaction_id: String,
    },

    /// Delete idempotency keys older than their replay window
    PruneKeys,
}
