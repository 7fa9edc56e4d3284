//! Key Commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum KeysCommands {
    /// Print the configured signing key's public PEM and fingerprint
    Public,

    /// Generate a new Ed25519 key as a PKCS#8 PEM file
    Generate {
        /// Output path for the private key
        #[arg(short, long)]
        out: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
