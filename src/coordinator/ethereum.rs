//! Ethereum connection coordinator

use super::{resolve_chain, ActiveWallet, CoordinatorCore, CreateOptions, SetActiveOptions, WalletStatus};
use crate::auth::IdentityCell;
use crate::config::EthereumSettings;
use crate::poller::ObservedState;
use crate::provider::EthereumProvider;
use crate::signer::{ChainType, CreateParams, EmbeddedAccount, RecoverParams};
use crate::wallet::{ConnectedWallet, RecoveryOptions, RecoverySessionSupplier, WalletRegistry};
use crate::{Error, Result};
use std::sync::Arc;

pub type EthereumStatus = WalletStatus<EthereumProvider>;

/// Coordinates Ethereum wallet lifecycle operations
pub struct EthereumCoordinator {
    core: Arc<CoordinatorCore<EthereumProvider>>,
    settings: EthereumSettings,
}

impl EthereumCoordinator {
    pub fn new(
        settings: EthereumSettings,
        registry: Arc<WalletRegistry>,
        observed: ObservedState,
        identity: IdentityCell,
        sessions: Arc<dyn RecoverySessionSupplier>,
    ) -> Result<Self> {
        if registry.filter().chain_type != ChainType::Ethereum {
            return Err(Error::Config(format!(
                "Ethereum coordinator given a {} registry",
                registry.filter().chain_type
            )));
        }
        let signer = registry.signer();
        Ok(Self {
            core: Arc::new(CoordinatorCore::new(
                signer, registry, observed, identity, sessions,
            )),
            settings,
        })
    }

    pub fn status(&self) -> EthereumStatus {
        self.core.status()
    }

    pub fn wallets(&self) -> Vec<ConnectedWallet> {
        self.core.wallets()
    }

    pub fn supported_chains(&self) -> &[u64] {
        &self.settings.supported_chains
    }

    /// Provision a new account and connect to it
    pub async fn create(&self, options: CreateOptions<u64>) -> Result<ActiveWallet<EthereumProvider>> {
        let core = Arc::clone(&self.core);
        let settings = self.settings.clone();
        self.core
            .creating
            .run(move || async move {
                core.set_status(WalletStatus::Creating);
                let outcome = create(&core, &settings, options).await;
                core.settle(outcome)
            })
            .await
    }

    /// Recover an existing account and make it the active wallet.
    ///
    /// Joins the running call if one is already in flight, even if it
    /// targets a different address.
    pub async fn set_active(
        &self,
        options: SetActiveOptions<u64>,
    ) -> Result<ActiveWallet<EthereumProvider>> {
        let core = Arc::clone(&self.core);
        let settings = self.settings.clone();
        self.core
            .recovering
            .run(move || async move {
                core.set_status(WalletStatus::Connecting);
                let outcome = recover(&core, &settings, options).await;
                core.settle(outcome)
            })
            .await
    }

    /// Switch the active account's recovery method
    pub async fn set_recovery(
        &self,
        previous: RecoveryOptions,
        next: RecoveryOptions,
    ) -> Result<EmbeddedAccount> {
        self.core.set_recovery(previous, next).await
    }

    /// Forget the active wallet, e.g. on logout
    pub fn reset(&self) {
        if let Some(active) = self.core.status().active() {
            active.provider.disconnect();
        }
        self.core.set_status(WalletStatus::Disconnected);
    }
}

impl std::fmt::Debug for EthereumCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthereumCoordinator")
            .field("status", &self.core.status().name())
            .field("supported_chains", &self.settings.supported_chains)
            .finish()
    }
}

async fn create(
    core: &CoordinatorCore<EthereumProvider>,
    settings: &EthereumSettings,
    options: CreateOptions<u64>,
) -> Result<ActiveWallet<EthereumProvider>> {
    core.require_identity()?;
    let chain_id = resolve_chain(
        options.chain,
        settings.default_chain,
        &settings.supported_chains,
    )?;
    let recovery = core.recovery_params(options.recovery).await?;

    let account = core
        .signer
        .create(CreateParams {
            chain_type: ChainType::Ethereum,
            chain_id: Some(chain_id),
            kind: settings.account_kind,
            recovery,
        })
        .await?;
    let provider = EthereumProvider::connect(Arc::clone(&core.signer), &account, chain_id).await?;
    core.registry.refresh().await;

    Ok(ActiveWallet { account, provider })
}

async fn recover(
    core: &CoordinatorCore<EthereumProvider>,
    settings: &EthereumSettings,
    options: SetActiveOptions<u64>,
) -> Result<ActiveWallet<EthereumProvider>> {
    core.require_identity()?;
    let chain_id = resolve_chain(
        options.chain,
        settings.default_chain,
        &settings.supported_chains,
    )?;
    let target = core.locate(&options.address, Some(chain_id), &chain_id.to_string())?;
    let recovery = core.recovery_params(options.recovery).await?;

    let account = core
        .signer
        .recover(RecoverParams {
            account_id: target.id.clone(),
            address: target.address.clone(),
            chain_id: Some(chain_id),
            recovery,
        })
        .await?;
    let provider = EthereumProvider::connect(Arc::clone(&core.signer), &account, chain_id).await?;

    Ok(ActiveWallet { account, provider })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserIdentity;
    use crate::signer::{AccountFilter, AccountKind, EmbeddedState, RecoveryMethod};
    use crate::testing::{contract_account, eoa, MockSigner, StaticSessions};
    use crate::WalletError;

    struct Fixture {
        signer: Arc<MockSigner>,
        registry: Arc<WalletRegistry>,
        observed: ObservedState,
        identity: IdentityCell,
        coordinator: Arc<EthereumCoordinator>,
    }

    async fn fixture(accounts: Vec<EmbeddedAccount>, supported: Vec<u64>) -> Fixture {
        let signer = Arc::new(MockSigner::new());
        signer.set_accounts(accounts);
        let registry = Arc::new(WalletRegistry::new(
            signer.clone(),
            AccountFilter {
                chain_type: ChainType::Ethereum,
                kind: None,
            },
        ));
        registry.refresh().await;

        let identity = IdentityCell::new();
        identity.replace(Some(UserIdentity::new("user-1")));
        let observed = ObservedState::default();
        let settings = EthereumSettings {
            supported_chains: supported,
            default_chain: None,
            account_kind: AccountKind::Eoa,
        };
        let coordinator = EthereumCoordinator::new(
            settings,
            Arc::clone(&registry),
            observed.clone(),
            identity.clone(),
            Arc::new(StaticSessions),
        )
        .unwrap();

        Fixture {
            signer,
            registry,
            observed,
            identity,
            coordinator: Arc::new(coordinator),
        }
    }

    fn activate(address: &str) -> SetActiveOptions<u64> {
        SetActiveOptions {
            address: address.to_string(),
            chain: None,
            recovery: RecoveryOptions::password("pass"),
        }
    }

    #[tokio::test]
    async fn concurrent_set_active_recovers_once() {
        let fx = fixture(vec![eoa("a", "0xAA", None)], vec![1, 137]).await;
        fx.signer.hold_recovery();

        let first = {
            let coordinator = Arc::clone(&fx.coordinator);
            tokio::spawn(async move { coordinator.set_active(activate("0xAA")).await })
        };
        fx.signer.wait_for_call("recover").await;
        let second = {
            let coordinator = Arc::clone(&fx.coordinator);
            tokio::spawn(async move { coordinator.set_active(activate("0xaa")).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(fx.coordinator.status().name(), "connecting");

        fx.signer.release_recovery();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(fx.signer.calls("recover"), 1);
        assert_eq!(first.account, second.account);
        assert_eq!(fx.coordinator.status().name(), "connected");
    }

    #[tokio::test]
    async fn concurrent_set_active_shares_failure() {
        let fx = fixture(vec![eoa("a", "0xAA", None)], vec![1]).await;
        fx.signer.fail_recovery(true);
        fx.signer.hold_recovery();

        let first = {
            let coordinator = Arc::clone(&fx.coordinator);
            tokio::spawn(async move { coordinator.set_active(activate("0xAA")).await })
        };
        fx.signer.wait_for_call("recover").await;
        let second = {
            let coordinator = Arc::clone(&fx.coordinator);
            tokio::spawn(async move { coordinator.set_active(activate("0xAA")).await })
        };
        tokio::task::yield_now().await;
        fx.signer.release_recovery();

        let first = first.await.unwrap().unwrap_err();
        let second = second.await.unwrap().unwrap_err();
        assert!(matches!(first, Error::Signer(_)));
        assert!(matches!(second, Error::Signer(_)));
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(fx.signer.calls("recover"), 1);
        assert_eq!(fx.coordinator.status().name(), "error");

        fx.signer.fail_recovery(false);
        fx.coordinator.set_active(activate("0xAA")).await.unwrap();
        assert_eq!(fx.signer.calls("recover"), 2);
    }

    #[tokio::test]
    async fn sign_out_during_recovery_stays_disconnected() {
        let fx = fixture(vec![eoa("a", "0xAA", None)], vec![1]).await;
        fx.signer.hold_recovery();

        let pending = {
            let coordinator = Arc::clone(&fx.coordinator);
            tokio::spawn(async move { coordinator.set_active(activate("0xAA")).await })
        };
        fx.signer.wait_for_call("recover").await;
        fx.identity.replace(None);
        fx.coordinator.reset();
        fx.signer.release_recovery();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(fx.coordinator.status().name(), "disconnected");
    }

    #[tokio::test]
    async fn different_account_joins_running_call() {
        let fx = fixture(
            vec![eoa("a", "0xAA", None), eoa("b", "0xBB", None)],
            vec![1],
        )
        .await;
        fx.signer.hold_recovery();

        let first = {
            let coordinator = Arc::clone(&fx.coordinator);
            tokio::spawn(async move { coordinator.set_active(activate("0xAA")).await })
        };
        fx.signer.wait_for_call("recover").await;
        let second = {
            let coordinator = Arc::clone(&fx.coordinator);
            tokio::spawn(async move { coordinator.set_active(activate("0xBB")).await })
        };
        tokio::task::yield_now().await;
        fx.signer.release_recovery();

        let second = second.await.unwrap().unwrap();
        assert_eq!(second.account.address, "0xAA");
        first.await.unwrap().unwrap();
        assert_eq!(fx.signer.calls("recover"), 1);
    }

    #[tokio::test]
    async fn unsupported_chain_fails_before_signer() {
        let fx = fixture(vec![], vec![1, 137]).await;
        let err = fx
            .coordinator
            .create(CreateOptions {
                chain: Some(999),
                recovery: RecoveryOptions::password("pass"),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Wallet(WalletError::ChainNotSupported { ref supported, .. })
                if supported == &vec!["1".to_string(), "137".to_string()]
        ));
        assert_eq!(fx.signer.calls("create"), 0);
        assert_eq!(fx.coordinator.status().name(), "error");
    }

    #[tokio::test]
    async fn missing_account_is_not_found_without_signer_call() {
        let fx = fixture(vec![eoa("a", "0xAA", None)], vec![1]).await;
        let err = fx.coordinator.set_active(activate("0xbb")).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Wallet(WalletError::AccountNotFound { ref address, .. }) if address == "0xbb"
        ));
        assert_eq!(fx.signer.calls("recover"), 0);
    }

    #[tokio::test]
    async fn no_accounts_fails_immediately() {
        let fx = fixture(vec![], vec![1]).await;
        let err = fx.coordinator.set_active(activate("0xAA")).await.unwrap_err();
        assert!(matches!(err, Error::Wallet(WalletError::NoAccounts)));
        assert_eq!(fx.signer.calls("recover"), 0);
    }

    #[tokio::test]
    async fn guard_clears_after_failure() {
        let fx = fixture(vec![eoa("a", "0xAA", None)], vec![1]).await;
        fx.signer.fail_recovery(true);
        assert!(fx.coordinator.set_active(activate("0xAA")).await.is_err());
        assert_eq!(fx.coordinator.status().name(), "error");

        fx.signer.fail_recovery(false);
        let active = fx.coordinator.set_active(activate("0xAA")).await.unwrap();
        assert_eq!(active.provider.current_chain_id(), 1);
        assert_eq!(fx.signer.calls("recover"), 2);
    }

    #[tokio::test]
    async fn contract_accounts_match_on_chain() {
        let fx = fixture(vec![contract_account("c", "0xCC", 137)], vec![1, 137]).await;
        let err = fx
            .coordinator
            .set_active(SetActiveOptions {
                chain: Some(1),
                ..activate("0xCC")
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chain 1"));

        let active = fx
            .coordinator
            .set_active(SetActiveOptions {
                chain: Some(137),
                ..activate("0xCC")
            })
            .await
            .unwrap();
        assert_eq!(active.provider.current_chain_id(), 137);
    }

    #[tokio::test]
    async fn create_connects_and_refreshes_registry() {
        let fx = fixture(vec![], vec![8453]).await;
        let refreshes = fx.registry.refresh_count();

        let active = fx
            .coordinator
            .create(CreateOptions {
                chain: None,
                recovery: RecoveryOptions::Automatic,
            })
            .await
            .unwrap();

        assert_eq!(active.provider.current_chain_id(), 8453);
        assert_eq!(fx.registry.refresh_count(), refreshes + 1);
        assert_eq!(fx.coordinator.wallets().len(), 1);
        assert!(fx.coordinator.status().active().is_some());
    }

    #[tokio::test]
    async fn missing_identity_is_an_authentication_error() {
        let signer = Arc::new(MockSigner::new());
        let registry = Arc::new(WalletRegistry::new(
            signer.clone(),
            AccountFilter {
                chain_type: ChainType::Ethereum,
                kind: None,
            },
        ));
        let coordinator = EthereumCoordinator::new(
            EthereumSettings::default(),
            registry,
            ObservedState::default(),
            IdentityCell::new(),
            Arc::new(StaticSessions),
        )
        .unwrap();

        let err = coordinator
            .create(CreateOptions {
                chain: None,
                recovery: RecoveryOptions::password("pass"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(signer.calls("create"), 0);
    }

    #[tokio::test]
    async fn needs_recovery_is_derived() {
        let fx = fixture(vec![eoa("a", "0xAA", None)], vec![1]).await;
        assert_eq!(fx.coordinator.status().name(), "disconnected");

        fx.observed.force(EmbeddedState::SignerNotConfigured);
        assert_eq!(fx.coordinator.status().name(), "needs-recovery");

        fx.coordinator.set_active(activate("0xAA")).await.unwrap();
        assert_eq!(fx.coordinator.status().name(), "connected");
    }

    #[tokio::test]
    async fn set_recovery_confirms_on_reread() {
        let fx = fixture(vec![eoa("a", "0xAA", None)], vec![1]).await;
        fx.coordinator.set_active(activate("0xAA")).await.unwrap();

        let account = fx
            .coordinator
            .set_recovery(RecoveryOptions::password("pass"), RecoveryOptions::Automatic)
            .await
            .unwrap();
        assert_eq!(account.recovery_method, Some(RecoveryMethod::Automatic));
        let status = fx.coordinator.status();
        assert_eq!(
            status.active().unwrap().account.recovery_method,
            Some(RecoveryMethod::Automatic)
        );

        fx.signer.ignore_recovery_changes(true);
        let err = fx
            .coordinator
            .set_recovery(
                RecoveryOptions::Automatic,
                RecoveryOptions::password("new-pass"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Wallet(WalletError::RecoveryMethodNotUpdated(_))
        ));
    }
}
