//! EIP-1193 shaped provider backed by the sandboxed signer
//!
//! `request` forwards verbatim and returns the signer's raw result. Events
//! use one handler per event name; registering again replaces the handler.

use crate::signer::{
    EmbeddedAccount, ProviderHandle, ProviderOptions, RequestArguments, Signer,
};
use crate::{Error, Result};
use alloy::primitives::{hex, U64};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Provider events applications can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEvent {
    AccountsChanged,
    ChainChanged,
    Connect,
    Disconnect,
    Message,
}

impl ProviderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEvent::AccountsChanged => "accountsChanged",
            ProviderEvent::ChainChanged => "chainChanged",
            ProviderEvent::Connect => "connect",
            ProviderEvent::Disconnect => "disconnect",
            ProviderEvent::Message => "message",
        }
    }
}

impl FromStr for ProviderEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accountsChanged" => Ok(ProviderEvent::AccountsChanged),
            "chainChanged" => Ok(ProviderEvent::ChainChanged),
            "connect" => Ok(ProviderEvent::Connect),
            "disconnect" => Ok(ProviderEvent::Disconnect),
            "message" => Ok(ProviderEvent::Message),
            other => Err(Error::Channel(format!("unsupported provider event '{}'", other))),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Ethereum provider for one account
#[derive(Clone)]
pub struct EthereumProvider {
    signer: Arc<dyn Signer>,
    handle: ProviderHandle,
    address: String,
    chain_id: Arc<AtomicU64>,
    listeners: Arc<RwLock<HashMap<ProviderEvent, EventHandler>>>,
}

impl EthereumProvider {
    /// Ask the signer for a provider bound to `account` on `chain_id`
    pub async fn connect(
        signer: Arc<dyn Signer>,
        account: &EmbeddedAccount,
        chain_id: u64,
    ) -> Result<Self> {
        let handle = signer
            .ethereum_provider(ProviderOptions {
                account_id: account.id.clone(),
                address: account.address.clone(),
                chain_id,
            })
            .await?;

        tracing::debug!(address = %account.address, chain_id, "Obtained Ethereum provider");
        Ok(Self {
            signer,
            handle,
            address: account.address.clone(),
            chain_id: Arc::new(AtomicU64::new(chain_id)),
            listeners: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Chain the provider was last connected or switched to
    pub fn current_chain_id(&self) -> u64 {
        self.chain_id.load(Ordering::Acquire)
    }

    /// Forward a request to the signer and return its raw result
    pub async fn request(&self, args: RequestArguments) -> Result<Value> {
        self.signer.ethereum_request(&self.handle, args).await
    }

    /// Register the handler for `event`, replacing any previous one
    pub fn on<F>(&self, event: ProviderEvent, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners.write().insert(event, Arc::new(handler));
    }

    /// Remove the handler for `event`; true if one was registered
    pub fn remove_listener(&self, event: ProviderEvent) -> bool {
        self.listeners.write().remove(&event).is_some()
    }

    pub(crate) fn emit(&self, event: ProviderEvent, payload: &Value) {
        let handler = self.listeners.read().get(&event).cloned();
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    /// `eth_chainId`, decoded from its hex quantity
    pub async fn chain_id(&self) -> Result<u64> {
        let value = self
            .request(RequestArguments::new("eth_chainId", json!([])))
            .await?;
        let raw = value
            .as_str()
            .ok_or_else(|| Error::Signer(format!("eth_chainId returned {}", value)))?;
        let parsed = U64::from_str(raw)
            .map_err(|e| Error::Signer(format!("invalid chain id '{}': {}", raw, e)))?;
        Ok(parsed.to::<u64>())
    }

    /// `personal_sign` over raw message bytes
    pub async fn personal_sign(&self, message: &[u8]) -> Result<String> {
        let value = self
            .request(RequestArguments::new(
                "personal_sign",
                json!([hex::encode_prefixed(message), self.address]),
            ))
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Signer(format!("personal_sign returned {}", value)))
    }

    /// `wallet_switchEthereumChain`, emitting `chainChanged` on success
    pub async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        let chain_hex = format!("{:#x}", chain_id);
        self.request(RequestArguments::new(
            "wallet_switchEthereumChain",
            json!([{ "chainId": chain_hex }]),
        ))
        .await?;

        let previous = self.chain_id.swap(chain_id, Ordering::AcqRel);
        if previous != chain_id {
            tracing::info!(from = previous, to = chain_id, "Switched Ethereum chain");
            self.emit(ProviderEvent::ChainChanged, &json!(chain_hex));
        }
        Ok(())
    }

    /// Tell listeners the provider is going away
    pub fn disconnect(&self) {
        self.emit(
            ProviderEvent::Disconnect,
            &json!({ "code": 4900, "message": "Provider disconnected" }),
        );
    }
}

impl std::fmt::Debug for EthereumProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthereumProvider")
            .field("address", &self.address)
            .field("chain_id", &self.current_chain_id())
            .finish()
    }
}
