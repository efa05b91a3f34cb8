use std::{fmt, path::Path, time::Duration};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use stash_core::TierTable;

use crate::error::{GatewayError, GatewayResult};

pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

/// Gateway settings, usually loaded from a TOML file:
///
/// ```toml
/// secret_salt = "..."
/// retry_delay_ms = 2000
///
/// [tiers]
/// default_max_bytes = 26110000
/// tiers = [{ tier = 2, max_bytes = 52420000 }]
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Secret mixed into every key derivation.
    pub secret_salt: String,
    /// Grace period before the single read retry.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub tiers: TierTable,
}

impl GatewayConfig {
    pub fn new(secret_salt: impl Into<String>) -> Self {
        Self {
            secret_salt: secret_salt.into(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            tiers: TierTable::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> GatewayResult<Self> {
        let config: GatewayConfig = toml::from_str(content)
            .context("failed to parse gateway config")
            .map_err(GatewayError::Config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(GatewayError::Config)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.secret_salt.is_empty() {
            return Err(GatewayError::Config(anyhow!("secret_salt must not be empty")));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("secret_salt", &"<redacted>")
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("tiers", &self.tiers)
            .finish()
    }
}
