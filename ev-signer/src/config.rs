//! Signer configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use tracing::warn;

use crate::crypto::EvidenceSigningKey;
use crate::error::SignerResult;

/// Signing service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Successful signatures allowed per tenant inside the window
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Overrides the public-key-derived key id
    #[serde(default)]
    pub key_id: Option<String>,
    /// Hex-encoded 32-byte secret key
    #[serde(default, skip_serializing)]
    pub secret_key_hex: Option<String>,
    /// PKCS#8 PEM private key file
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_rate_limit() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    3600
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            window_secs: default_window_secs(),
            key_id: None,
            secret_key_hex: None,
            key_path: None,
        }
    }
}

impl SignerConfig {
    /// Load configuration from environment variables
    ///
    /// - EV_SIGNER_RATE_LIMIT: Signatures per tenant per window (10)
    /// - EV_SIGNER_WINDOW_SECS: Window length (3600)
    /// - EV_SIGNER_KEY_ID: Key id override
    /// - EV_SIGNER_SECRET_KEY: Hex secret key
    /// - EV_SIGNER_KEY_PATH: PKCS#8 PEM file, used when no hex key is set
    pub fn from_env() -> Self {
        Self {
            rate_limit: env::var("EV_SIGNER_RATE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_rate_limit),
            window_secs: env::var("EV_SIGNER_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_window_secs),
            key_id: env::var("EV_SIGNER_KEY_ID").ok(),
            secret_key_hex: env::var("EV_SIGNER_SECRET_KEY").ok(),
            key_path: env::var("EV_SIGNER_KEY_PATH").ok().map(PathBuf::from),
        }
    }

    /// Ephemeral key, default limits
    pub fn development() -> Self {
        Self::default()
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(i64::MAX as u64) as i64)
    }

    /// Load the configured key, or generate an ephemeral one
    pub async fn load_key(&self) -> SignerResult<EvidenceSigningKey> {
        let key = if let Some(hex_key) = &self.secret_key_hex {
            EvidenceSigningKey::from_hex(hex_key)?
        } else if let Some(path) = &self.key_path {
            let pem = tokio::fs::read_to_string(path).await?;
            EvidenceSigningKey::from_pkcs8_pem(&pem)?
        } else {
            warn!("No signing key configured, generated an ephemeral key");
            EvidenceSigningKey::generate()
        };

        Ok(match &self.key_id {
            Some(kid) => key.with_kid(kid.clone()),
            None => key,
        })
    }
}
