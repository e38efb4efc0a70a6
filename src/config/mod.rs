//! Configuration for the signer session bridge

use crate::signer::{AccountKind, SolanaCluster};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable overriding the sandbox URL
pub const SANDBOX_URL_ENV: &str = "SIGNER_BRIDGE_SANDBOX_URL";

/// Environment variable overriding the application id
pub const APP_ID_ENV: &str = "SIGNER_BRIDGE_APP_ID";

const DEFAULT_SANDBOX_URL: &str = "https://auth.example.app/embedded-wallets";

/// Chain id constants
pub mod chains {
    pub const ETHEREUM: u64 = 1;
    pub const OPTIMISM: u64 = 10;
    pub const POLYGON: u64 = 137;
    pub const BASE: u64 = 8453;
    pub const ARBITRUM: u64 = 42161;
}

/// Embedded state poller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    /// Interval between state queries (milliseconds)
    pub interval_ms: u64,
}

impl PollerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

/// Sandbox health-check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Ping timeout (milliseconds). Kept sub-second so app resume never stalls.
    pub ping_timeout_ms: u64,
}

impl HealthSettings {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 500,
        }
    }
}

/// Ethereum wallet settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumSettings {
    /// Chains the application allows wallets on
    pub supported_chains: Vec<u64>,
    /// Chain used when an operation names none
    #[serde(default)]
    pub default_chain: Option<u64>,
    /// Kind of account this application provisions
    #[serde(default)]
    pub account_kind: AccountKind,
}

impl Default for EthereumSettings {
    fn default() -> Self {
        Self {
            supported_chains: vec![chains::ETHEREUM, chains::BASE],
            default_chain: None,
            account_kind: AccountKind::Eoa,
        }
    }
}

/// Solana wallet settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaSettings {
    pub supported_clusters: Vec<SolanaCluster>,
    #[serde(default)]
    pub default_cluster: Option<SolanaCluster>,
}

impl Default for SolanaSettings {
    fn default() -> Self {
        Self {
            supported_clusters: vec![SolanaCluster::MainnetBeta, SolanaCluster::Devnet],
            default_cluster: None,
        }
    }
}

/// Secure storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Origin whose per-origin keys a flush clears
    pub origin: String,
    /// Path of the file-backed credential store used by the CLI
    #[serde(default)]
    pub store_path: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            origin: "https://auth.example.app".to_string(),
            store_path: Some("credentials.json".to_string()),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Where the sandboxed signer is hosted
    pub sandbox_url: Url,
    /// Application id passed to the signer
    pub app_id: String,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub ethereum: EthereumSettings,
    #[serde(default)]
    pub solana: SolanaSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl BridgeConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Apply environment overrides for the sandbox URL and app id
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(SANDBOX_URL_ENV) {
            tracing::debug!("Using {} for sandbox URL", SANDBOX_URL_ENV);
            self.sandbox_url = raw
                .parse()
                .map_err(|e| Error::Config(format!("Invalid {}: {}", SANDBOX_URL_ENV, e)))?;
        }
        if let Ok(app_id) = std::env::var(APP_ID_ENV) {
            self.app_id = app_id;
        }
        Ok(self)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sandbox_url: Url::parse(DEFAULT_SANDBOX_URL).expect("default sandbox URL is valid"),
            app_id: String::new(),
            poller: PollerSettings::default(),
            health: HealthSettings::default(),
            ethereum: EthereumSettings::default(),
            solana: SolanaSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}
