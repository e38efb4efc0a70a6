//! Signer session
//!
//! One session per host process. It is built once when the host mounts its
//! wallet provider and handed by reference to everything that needs it.

use crate::auth::{IdentityCell, UserIdentity};
use crate::channel::{MessageChannel, RpcResponse, StorageEnvelope, StorageEvent};
use crate::config::BridgeConfig;
use crate::coordinator::{EthereumCoordinator, SolanaCoordinator};
use crate::poller::{EmbeddedStatePoller, PollerOptions, StateSnapshot};
use crate::sandbox::{Sandbox, SandboxHealth, SandboxSupervisor};
use crate::signer::{AccountFilter, AccountKind, ChainType, ChannelSigner, Signer};
use crate::storage::{CredentialStore, StorageRelay};
use crate::wallet::{RecoverySessionSupplier, WalletRegistry};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;

/// Builder for [`SignerSession`]
pub struct SignerSessionBuilder {
    config: BridgeConfig,
    store: Option<Arc<dyn CredentialStore>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    sessions: Option<Arc<dyn RecoverySessionSupplier>>,
    poller: Option<PollerOptions>,
}

impl SignerSessionBuilder {
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_recovery_sessions(mut self, sessions: Arc<dyn RecoverySessionSupplier>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Override the poller derived from the config (interval, comparator)
    pub fn with_poller_options(mut self, options: PollerOptions) -> Self {
        self.poller = Some(options);
        self
    }

    /// Wire every component, load the sandbox and start polling
    pub async fn start(self) -> Result<SignerSession> {
        let store = self
            .store
            .ok_or_else(|| Error::Config("a credential store is required".to_string()))?;
        let sandbox = self
            .sandbox
            .ok_or_else(|| Error::Config("a sandbox is required".to_string()))?;
        let sessions = self
            .sessions
            .ok_or_else(|| Error::Config("a recovery session supplier is required".to_string()))?;
        let config = self.config;

        let channel = MessageChannel::new();
        let relay = StorageRelay::new(store);
        let signer = Arc::new(ChannelSigner::new(channel.clone()));
        {
            let relay = relay.clone();
            let signer = Arc::clone(&signer);
            let outbound = channel.clone();
            channel.on_receive(move |value| route(&relay, &signer, &outbound, value));
        }

        let supervisor = SandboxSupervisor::new(
            sandbox,
            config.sandbox_url.clone(),
            channel.clone(),
            signer.clone(),
            config.health.ping_timeout(),
        );
        supervisor.start().await?;

        let ethereum_kind = match config.ethereum.account_kind {
            AccountKind::Contract => Some(AccountKind::Contract),
            AccountKind::Eoa => None,
        };
        let ethereum_registry = Arc::new(WalletRegistry::new(
            signer.clone(),
            AccountFilter {
                chain_type: ChainType::Ethereum,
                kind: ethereum_kind,
            },
        ));
        let solana_registry = Arc::new(WalletRegistry::new(
            signer.clone(),
            AccountFilter {
                chain_type: ChainType::Solana,
                kind: None,
            },
        ));

        let identity = IdentityCell::new();
        let options = self
            .poller
            .unwrap_or_else(|| PollerOptions::with_interval(config.poller.interval()));
        let poller = {
            let ethereum = Arc::clone(&ethereum_registry);
            let solana = Arc::clone(&solana_registry);
            EmbeddedStatePoller::start(signer.clone(), options, move |state| {
                if !state.is_authenticated() {
                    return;
                }
                let ethereum = Arc::clone(&ethereum);
                let solana = Arc::clone(&solana);
                tokio::spawn(async move {
                    futures::join!(ethereum.refresh(), solana.refresh());
                });
            })
        };

        let ethereum = EthereumCoordinator::new(
            config.ethereum.clone(),
            Arc::clone(&ethereum_registry),
            poller.observed(),
            identity.clone(),
            Arc::clone(&sessions),
        )?;
        let solana = SolanaCoordinator::new(
            config.solana.clone(),
            Arc::clone(&solana_registry),
            poller.observed(),
            identity.clone(),
            sessions,
        )?;

        tracing::info!(url = %config.sandbox_url, app_id = %config.app_id, "Signer session started");
        Ok(SignerSession {
            config,
            channel,
            relay,
            signer,
            supervisor,
            identity,
            ethereum_registry,
            solana_registry,
            ethereum,
            solana,
            poller,
        })
    }
}

/// Route one decoded inbound envelope.
///
/// Reserved storage events go to the relay, correlated responses to the
/// signer client. Anything else is dropped.
fn route(
    relay: &StorageRelay,
    signer: &ChannelSigner,
    channel: &MessageChannel,
    value: Value,
) -> Result<()> {
    if let Some(event) = value.get("event").and_then(Value::as_str) {
        match StorageEvent::parse(event) {
            Ok(Some(_)) => {
                let envelope: StorageEnvelope = serde_json::from_value(value)
                    .map_err(|e| Error::Protocol(format!("malformed storage envelope: {}", e)))?;
                return relay.dispatch(envelope, channel).inspect_err(|e| {
                    tracing::error!(error = %e, "Rejecting storage envelope");
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Storage protocol mismatch");
                return Err(e);
            }
        }
    }

    if RpcResponse::matches(&value) {
        signer.on_value(value);
        return Ok(());
    }

    tracing::debug!("Dropping unrouted inbound envelope");
    Ok(())
}

/// Live bridge between the host and the sandboxed signer
pub struct SignerSession {
    config: BridgeConfig,
    channel: MessageChannel,
    relay: StorageRelay,
    signer: Arc<ChannelSigner>,
    supervisor: SandboxSupervisor,
    identity: IdentityCell,
    ethereum_registry: Arc<WalletRegistry>,
    solana_registry: Arc<WalletRegistry>,
    ethereum: EthereumCoordinator,
    solana: SolanaCoordinator,
    poller: EmbeddedStatePoller,
}

impl SignerSession {
    pub fn builder(config: BridgeConfig) -> SignerSessionBuilder {
        SignerSessionBuilder {
            config,
            store: None,
            sandbox: None,
            sessions: None,
            poller: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }

    pub fn relay(&self) -> &StorageRelay {
        &self.relay
    }

    pub fn signer(&self) -> Arc<dyn Signer> {
        self.signer.clone()
    }

    pub fn ethereum(&self) -> &EthereumCoordinator {
        &self.ethereum
    }

    pub fn solana(&self) -> &SolanaCoordinator {
        &self.solana
    }

    /// Last observed signer lifecycle state
    pub fn lifecycle(&self) -> StateSnapshot {
        self.poller.observed().snapshot()
    }

    pub fn identity(&self) -> Option<UserIdentity> {
        self.identity.current()
    }

    /// Record the host's signed-in user.
    ///
    /// A new identity refreshes both registries. Signing out clears them
    /// and resets both coordinators.
    pub async fn set_identity(&self, identity: Option<UserIdentity>) {
        if !self.identity.replace(identity.clone()) {
            return;
        }
        match identity {
            Some(user) => {
                tracing::info!(user_id = %user.user_id, "Host identity changed, refreshing wallets");
                futures::join!(self.ethereum_registry.refresh(), self.solana_registry.refresh());
            }
            None => {
                tracing::info!("Host identity cleared");
                self.ethereum_registry.clear();
                self.solana_registry.clear();
                self.ethereum.reset();
                self.solana.reset();
            }
        }
    }

    /// Health-check the sandbox when the app returns to the foreground.
    ///
    /// Calls still waiting on a reloaded sandbox will never be answered and
    /// are failed.
    pub async fn on_app_resume(&self) -> Result<SandboxHealth> {
        let health = self.supervisor.on_app_resume().await?;
        if health == SandboxHealth::Reloaded {
            self.signer.fail_pending("sandbox was reloaded");
        }
        Ok(health)
    }

    pub fn shutdown(&self) {
        self.poller.stop();
        self.supervisor.shutdown();
        self.signer.fail_pending("session shut down");
        self.channel.clear_handler();
        tracing::info!("Signer session shut down");
    }
}

impl std::fmt::Debug for SignerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerSession")
            .field("supervisor", &self.supervisor)
            .field("ethereum", &self.ethereum)
            .field("solana", &self.solana)
            .finish()
    }
}
