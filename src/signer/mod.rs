//! Signer contract and data model
//!
//! The signer runs inside the sandbox and owns all key material. The host
//! only sees accounts, lifecycle state and signatures; it never holds a
//! private key. [`ChannelSigner`] is the host-side client that speaks this
//! contract over the message channel.

mod remote;

pub use remote::ChannelSigner;

use crate::channel::ChannelBuffer;
use crate::wallet::RecoveryParams;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Chain family an account belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Ethereum,
    Solana,
}

impl ChainType {
    pub fn name(&self) -> &'static str {
        match self {
            ChainType::Ethereum => "ethereum",
            ChainType::Solana => "solana",
        }
    }

    /// Whether addresses compare case-insensitively (hex) or exactly (base58)
    pub fn addresses_match(&self, a: &str, b: &str) -> bool {
        match self {
            ChainType::Ethereum => a.eq_ignore_ascii_case(b),
            ChainType::Solana => a == b,
        }
    }

    pub fn canonical_address(&self, address: &str) -> String {
        match self {
            ChainType::Ethereum => address.to_ascii_lowercase(),
            ChainType::Solana => address.to_string(),
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Externally-owned key or contract (smart) account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    #[default]
    Eoa,
    Contract,
}

/// Solana cluster a provider signs for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolanaCluster {
    MainnetBeta,
    Devnet,
    Testnet,
}

impl SolanaCluster {
    pub fn name(&self) -> &'static str {
        match self {
            SolanaCluster::MainnetBeta => "mainnet-beta",
            SolanaCluster::Devnet => "devnet",
            SolanaCluster::Testnet => "testnet",
        }
    }
}

impl std::fmt::Display for SolanaCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How an account's key material is recovered on a new device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryMethod {
    UserPasscode,
    Automatic,
}

impl std::fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryMethod::UserPasscode => f.write_str("user-passcode"),
            RecoveryMethod::Automatic => f.write_str("automatic"),
        }
    }
}

/// Read-only snapshot of a key-management unit provisioned by the signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedAccount {
    pub id: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_type: Option<String>,
    pub chain_type: ChainType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_method: Option<RecoveryMethod>,
}

impl EmbeddedAccount {
    /// Contract accounts carry an implementation type; EOAs do not
    pub fn kind(&self) -> AccountKind {
        if self.implementation_type.is_some() {
            AccountKind::Contract
        } else {
            AccountKind::Eoa
        }
    }
}

/// Coarse signer lifecycle, ordered by progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddedState {
    #[default]
    None,
    Unauthenticated,
    SignerNotConfigured,
    CreatingAccount,
    Ready,
}

impl EmbeddedState {
    pub fn is_authenticated(&self) -> bool {
        *self >= EmbeddedState::SignerNotConfigured
    }
}

impl std::fmt::Display for EmbeddedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EmbeddedState::None => "none",
            EmbeddedState::Unauthenticated => "unauthenticated",
            EmbeddedState::SignerNotConfigured => "signer-not-configured",
            EmbeddedState::CreatingAccount => "creating-account",
            EmbeddedState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Account list filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFilter {
    pub chain_type: ChainType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AccountKind>,
}

/// Parameters for provisioning a new account
#[derive(Debug)]
pub struct CreateParams {
    pub chain_type: ChainType,
    pub chain_id: Option<u64>,
    pub kind: AccountKind,
    pub recovery: RecoveryParams,
}

/// Parameters for recovering an existing account
#[derive(Debug)]
pub struct RecoverParams {
    pub account_id: String,
    pub address: String,
    pub chain_id: Option<u64>,
    pub recovery: RecoveryParams,
}

/// Which account and chain an Ethereum provider acts for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOptions {
    pub account_id: String,
    pub address: String,
    pub chain_id: u64,
}

/// Opaque signer-side provider reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderHandle(pub String);

/// Which account signs a raw message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOptions {
    pub address: String,
    pub chain_type: ChainType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<SolanaCluster>,
}

/// EIP-1193 style request arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RequestArguments {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Operations the sandboxed signer exposes to the host.
///
/// Every method is a suspension point; the bridge applies no timeout except
/// to `ping`.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn get_embedded_state(&self) -> Result<EmbeddedState>;

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<EmbeddedAccount>>;

    /// The signer's currently active account
    async fn get(&self) -> Result<EmbeddedAccount>;

    async fn create(&self, params: CreateParams) -> Result<EmbeddedAccount>;

    async fn recover(&self, params: RecoverParams) -> Result<EmbeddedAccount>;

    async fn set_recovery_method(
        &self,
        previous: RecoveryParams,
        next: RecoveryParams,
    ) -> Result<()>;

    async fn ethereum_provider(&self, options: ProviderOptions) -> Result<ProviderHandle>;

    /// Forward a JSON-RPC request verbatim through a provider
    async fn ethereum_request(
        &self,
        provider: &ProviderHandle,
        request: RequestArguments,
    ) -> Result<Value>;

    async fn sign_message(&self, payload: ChannelBuffer, options: SignOptions) -> Result<String>;

    async fn ping(&self, timeout: Duration) -> Result<()>;
}
