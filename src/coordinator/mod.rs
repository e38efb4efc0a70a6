//! Connection coordinators
//!
//! One coordinator per wallet kind drives create / set-active / set-recovery.
//! Each holds two in-flight slots, one for recovery and one for creation,
//! so at most one of each runs at a time. The slots are per coordinator,
//! not per account: a `set_active` for another address issued while one is
//! running joins the running call and receives its result.

mod ethereum;
mod in_flight;
mod solana;

pub use ethereum::EthereumCoordinator;
pub use in_flight::InFlight;
pub use solana::SolanaCoordinator;

use crate::auth::IdentityCell;
use crate::poller::ObservedState;
use crate::signer::{ChainType, EmbeddedAccount, EmbeddedState, Signer};
use crate::wallet::{
    ConnectedWallet, RecoveryOptions, RecoveryParams, RecoverySessionSupplier, WalletRegistry,
};
use crate::{Error, Result, WalletError};
use parking_lot::RwLock;
use std::fmt::Display;
use std::sync::Arc;

/// Wallet that finished connecting, with its provider
#[derive(Debug, Clone)]
pub struct ActiveWallet<P> {
    pub account: EmbeddedAccount,
    pub provider: P,
}

/// Connection status of one wallet kind.
///
/// Only `Connected` carries an account and provider. `NeedsRecovery` is
/// never stored; it is derived from the registry and the observed signer
/// state when the stored status is `Disconnected`.
#[derive(Debug, Clone)]
pub enum WalletStatus<P> {
    Disconnected,
    Connecting,
    Creating,
    NeedsRecovery,
    Connected(ActiveWallet<P>),
    Error(Error),
}

impl<P> WalletStatus<P> {
    pub fn name(&self) -> &'static str {
        match self {
            WalletStatus::Disconnected => "disconnected",
            WalletStatus::Connecting => "connecting",
            WalletStatus::Creating => "creating",
            WalletStatus::NeedsRecovery => "needs-recovery",
            WalletStatus::Connected(_) => "connected",
            WalletStatus::Error(_) => "error",
        }
    }

    pub fn active(&self) -> Option<&ActiveWallet<P>> {
        match self {
            WalletStatus::Connected(active) => Some(active),
            _ => None,
        }
    }
}

/// Options for provisioning a new wallet
#[derive(Debug)]
pub struct CreateOptions<C> {
    /// Target chain; falls back to the configured default, then the first supported
    pub chain: Option<C>,
    pub recovery: RecoveryOptions,
}

/// Options for recovering and activating an existing wallet
#[derive(Debug)]
pub struct SetActiveOptions<C> {
    pub address: String,
    pub chain: Option<C>,
    pub recovery: RecoveryOptions,
}

/// Pick the target chain: explicit, then default, then first supported.
///
/// An explicit or default chain outside `supported` is rejected, naming the
/// supported set.
pub fn resolve_chain<C>(explicit: Option<C>, default: Option<C>, supported: &[C]) -> Result<C>
where
    C: Copy + PartialEq + Display,
{
    match explicit.or(default) {
        Some(chain) if supported.contains(&chain) => Ok(chain),
        Some(chain) => Err(WalletError::ChainNotSupported {
            requested: chain.to_string(),
            supported: supported.iter().map(ToString::to_string).collect(),
        }
        .into()),
        None => supported
            .first()
            .copied()
            .ok_or_else(|| Error::Config("no supported chains are configured".to_string())),
    }
}

/// State and collaborators shared by both coordinators
pub(crate) struct CoordinatorCore<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub(crate) chain_type: ChainType,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) registry: Arc<WalletRegistry>,
    observed: ObservedState,
    identity: IdentityCell,
    sessions: Arc<dyn RecoverySessionSupplier>,
    status: RwLock<WalletStatus<P>>,
    pub(crate) recovering: InFlight<ActiveWallet<P>>,
    pub(crate) creating: InFlight<ActiveWallet<P>>,
}

impl<P> CoordinatorCore<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        signer: Arc<dyn Signer>,
        registry: Arc<WalletRegistry>,
        observed: ObservedState,
        identity: IdentityCell,
        sessions: Arc<dyn RecoverySessionSupplier>,
    ) -> Self {
        Self {
            chain_type: registry.filter().chain_type,
            signer,
            registry,
            observed,
            identity,
            sessions,
            status: RwLock::new(WalletStatus::Disconnected),
            recovering: InFlight::new(),
            creating: InFlight::new(),
        }
    }

    pub(crate) fn status(&self) -> WalletStatus<P> {
        let status = self.status.read().clone();
        match status {
            WalletStatus::Disconnected
                if !self.registry.is_empty()
                    && self.observed.current() == EmbeddedState::SignerNotConfigured =>
            {
                WalletStatus::NeedsRecovery
            }
            other => other,
        }
    }

    pub(crate) fn set_status(&self, next: WalletStatus<P>) {
        let mut status = self.status.write();
        if status.name() != next.name() {
            tracing::debug!(
                chain_type = %self.chain_type,
                from = status.name(),
                to = next.name(),
                "Wallet status changed"
            );
        }
        *status = next;
    }

    /// Record the outcome of a create or recover as the new status.
    ///
    /// A wallet that finishes connecting after the user signed out is not
    /// kept: the status stays `Disconnected` and the caller gets an
    /// `Authentication` error.
    pub(crate) fn settle(&self, outcome: Result<ActiveWallet<P>>) -> Result<ActiveWallet<P>> {
        if outcome.is_ok() && !self.identity.is_authenticated() {
            tracing::info!(
                chain_type = %self.chain_type,
                "User signed out mid-operation, dropping wallet"
            );
            self.set_status(WalletStatus::Disconnected);
            return Err(Error::Authentication(
                "user signed out before the wallet connected".to_string(),
            ));
        }
        match &outcome {
            Ok(active) => {
                tracing::info!(
                    chain_type = %self.chain_type,
                    address = %active.account.address,
                    "Embedded wallet connected"
                );
                self.set_status(WalletStatus::Connected(active.clone()));
            }
            Err(e) => {
                tracing::warn!(chain_type = %self.chain_type, error = %e, "Embedded wallet operation failed");
                self.set_status(WalletStatus::Error(e.clone()));
            }
        }
        outcome
    }

    pub(crate) fn wallets(&self) -> Vec<ConnectedWallet> {
        self.registry.wallets()
    }

    pub(crate) fn require_identity(&self) -> Result<()> {
        self.identity.require().map(|_| ())
    }

    /// Find `address` in the cached registry snapshot. Never calls the signer.
    pub(crate) fn locate(
        &self,
        address: &str,
        chain_id: Option<u64>,
        chain_label: &str,
    ) -> Result<EmbeddedAccount> {
        if self.registry.is_empty() {
            return Err(WalletError::NoAccounts.into());
        }
        self.registry.find(address, chain_id).ok_or_else(|| {
            WalletError::AccountNotFound {
                address: address.to_string(),
                chain: chain_label.to_string(),
            }
            .into()
        })
    }

    pub(crate) async fn recovery_params(&self, options: RecoveryOptions) -> Result<RecoveryParams> {
        RecoveryParams::build(options, &*self.sessions).await
    }

    /// Change the recovery method and confirm it by re-reading the account
    pub(crate) async fn set_recovery(
        &self,
        previous: RecoveryOptions,
        next: RecoveryOptions,
    ) -> Result<EmbeddedAccount> {
        self.require_identity()?;
        let expected = next.method();
        let previous = self.recovery_params(previous).await?;
        let next = self.recovery_params(next).await?;

        self.signer.set_recovery_method(previous, next).await?;
        let account = self.signer.get().await?;
        if account.recovery_method != Some(expected) {
            let reported = account
                .recovery_method
                .map(|m| m.to_string())
                .unwrap_or_else(|| "none".to_string());
            return Err(WalletError::RecoveryMethodNotUpdated(reported).into());
        }

        tracing::info!(address = %account.address, method = %expected, "Recovery method updated");
        let mut status = self.status.write();
        if let WalletStatus::Connected(active) = &mut *status {
            if self
                .chain_type
                .addresses_match(&active.account.address, &account.address)
            {
                active.account = account.clone();
            }
        }
        Ok(account)
    }
}
