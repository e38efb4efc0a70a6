//! Solana connection coordinator
//!
//! Solana accounts are always externally owned and carry no chain id; the
//! "chain" here is the cluster the provider signs for.

use super::{resolve_chain, ActiveWallet, CoordinatorCore, CreateOptions, SetActiveOptions, WalletStatus};
use crate::auth::IdentityCell;
use crate::config::SolanaSettings;
use crate::poller::ObservedState;
use crate::provider::SolanaProvider;
use crate::signer::{AccountKind, ChainType, CreateParams, EmbeddedAccount, RecoverParams, SolanaCluster};
use crate::wallet::{ConnectedWallet, RecoveryOptions, RecoverySessionSupplier, WalletRegistry};
use crate::{Error, Result};
use std::sync::Arc;

pub type SolanaStatus = WalletStatus<SolanaProvider>;

/// Coordinates Solana wallet lifecycle operations
pub struct SolanaCoordinator {
    core: Arc<CoordinatorCore<SolanaProvider>>,
    settings: SolanaSettings,
}

impl SolanaCoordinator {
    pub fn new(
        settings: SolanaSettings,
        registry: Arc<WalletRegistry>,
        observed: ObservedState,
        identity: IdentityCell,
        sessions: Arc<dyn RecoverySessionSupplier>,
    ) -> Result<Self> {
        if registry.filter().chain_type != ChainType::Solana {
            return Err(Error::Config(format!(
                "Solana coordinator given a {} registry",
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

    pub fn status(&self) -> SolanaStatus {
        self.core.status()
    }

    pub fn wallets(&self) -> Vec<ConnectedWallet> {
        self.core.wallets()
    }

    pub fn supported_clusters(&self) -> &[SolanaCluster] {
        &self.settings.supported_clusters
    }

    pub async fn create(
        &self,
        options: CreateOptions<SolanaCluster>,
    ) -> Result<ActiveWallet<SolanaProvider>> {
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
    /// Joins the running call if one is already in flight.
    pub async fn set_active(
        &self,
        options: SetActiveOptions<SolanaCluster>,
    ) -> Result<ActiveWallet<SolanaProvider>> {
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

    pub async fn set_recovery(
        &self,
        previous: RecoveryOptions,
        next: RecoveryOptions,
    ) -> Result<EmbeddedAccount> {
        self.core.set_recovery(previous, next).await
    }

    pub fn reset(&self) {
        self.core.set_status(WalletStatus::Disconnected);
    }
}

impl std::fmt::Debug for SolanaCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaCoordinator")
            .field("status", &self.core.status().name())
            .field("supported_clusters", &self.settings.supported_clusters)
            .finish()
    }
}

fn pick_cluster(settings: &SolanaSettings, explicit: Option<SolanaCluster>) -> Result<SolanaCluster> {
    resolve_chain(
        explicit,
        settings.default_cluster,
        &settings.supported_clusters,
    )
}

async fn create(
    core: &CoordinatorCore<SolanaProvider>,
    settings: &SolanaSettings,
    options: CreateOptions<SolanaCluster>,
) -> Result<ActiveWallet<SolanaProvider>> {
    core.require_identity()?;
    let cluster = pick_cluster(settings, options.chain)?;
    let recovery = core.recovery_params(options.recovery).await?;

    let account = core
        .signer
        .create(CreateParams {
            chain_type: ChainType::Solana,
            chain_id: None,
            kind: AccountKind::Eoa,
            recovery,
        })
        .await?;
    let provider = SolanaProvider::new(Arc::clone(&core.signer), account.clone(), cluster);
    core.registry.refresh().await;

    Ok(ActiveWallet { account, provider })
}

async fn recover(
    core: &CoordinatorCore<SolanaProvider>,
    settings: &SolanaSettings,
    options: SetActiveOptions<SolanaCluster>,
) -> Result<ActiveWallet<SolanaProvider>> {
    core.require_identity()?;
    let cluster = pick_cluster(settings, options.chain)?;
    let target = core.locate(&options.address, None, cluster.name())?;
    let recovery = core.recovery_params(options.recovery).await?;

    let account = core
        .signer
        .recover(RecoverParams {
            account_id: target.id.clone(),
            address: target.address.clone(),
            chain_id: None,
            recovery,
        })
        .await?;
    let provider = SolanaProvider::new(Arc::clone(&core.signer), account.clone(), cluster);

    Ok(ActiveWallet { account, provider })
}
