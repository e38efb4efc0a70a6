//! Wallet registry
//!
//! Caches a deduplicated snapshot of the signer's accounts for one chain
//! family. A failed fetch degrades to an empty list: having no wallets is
//! always a valid state.

use crate::provider::{EthereumProvider, SolanaProvider};
use crate::signer::{
    AccountFilter, AccountKind, ChainType, EmbeddedAccount, Signer, SolanaCluster,
};
use crate::{Result, WalletError};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity used for deduplication.
///
/// EOAs are valid on every chain, so only the address counts. Contract
/// accounts are deployed per chain, so the chain id is part of the key.
fn dedup_key(account: &EmbeddedAccount) -> (String, Option<u64>) {
    let address = account.chain_type.canonical_address(&account.address);
    match account.kind() {
        AccountKind::Eoa => (address, None),
        AccountKind::Contract => (address, account.chain_id),
    }
}

/// Drop repeated accounts, keeping the first occurrence and input order
pub fn dedup_accounts(accounts: Vec<EmbeddedAccount>) -> Vec<EmbeddedAccount> {
    let mut seen = HashSet::new();
    accounts
        .into_iter()
        .filter(|account| seen.insert(dedup_key(account)))
        .collect()
}

/// Projection of an account handed to application code.
///
/// Recomputed on every refresh; `wallet_index` is a display position, not
/// an identity.
#[derive(Clone)]
pub struct ConnectedWallet {
    pub wallet_index: usize,
    pub account: EmbeddedAccount,
    signer: Arc<dyn Signer>,
}

impl ConnectedWallet {
    pub fn address(&self) -> &str {
        &self.account.address
    }

    /// Provider for this wallet on `chain_id` (or the account's own chain)
    pub async fn ethereum_provider(&self, chain_id: Option<u64>) -> Result<EthereumProvider> {
        self.expect_chain_type(ChainType::Ethereum)?;
        let chain_id = chain_id
            .or(self.account.chain_id)
            .unwrap_or(crate::config::chains::ETHEREUM);
        EthereumProvider::connect(Arc::clone(&self.signer), &self.account, chain_id).await
    }

    pub fn solana_provider(&self, cluster: SolanaCluster) -> Result<SolanaProvider> {
        self.expect_chain_type(ChainType::Solana)?;
        Ok(SolanaProvider::new(
            Arc::clone(&self.signer),
            self.account.clone(),
            cluster,
        ))
    }

    fn expect_chain_type(&self, expected: ChainType) -> Result<()> {
        if self.account.chain_type != expected {
            return Err(WalletError::ChainTypeMismatch {
                expected: expected.to_string(),
                actual: self.account.chain_type.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedWallet")
            .field("wallet_index", &self.wallet_index)
            .field("account", &self.account)
            .finish()
    }
}

#[derive(Default)]
struct Snapshot {
    /// Ticket of the refresh (or clear) that produced `accounts`
    ticket: u64,
    accounts: Vec<EmbeddedAccount>,
}

/// Registry of provisioned accounts for one chain family.
///
/// Refreshes may overlap. Each takes a ticket before listing and its result
/// is kept only if nothing newer has been stored meanwhile.
pub struct WalletRegistry {
    signer: Arc<dyn Signer>,
    filter: AccountFilter,
    snapshot: RwLock<Snapshot>,
    tickets: AtomicU64,
    refreshes: AtomicU64,
}

impl WalletRegistry {
    pub fn new(signer: Arc<dyn Signer>, filter: AccountFilter) -> Self {
        Self {
            signer,
            filter,
            snapshot: RwLock::new(Snapshot::default()),
            tickets: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn filter(&self) -> AccountFilter {
        self.filter
    }

    pub fn signer(&self) -> Arc<dyn Signer> {
        Arc::clone(&self.signer)
    }

    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fetch, dedup and cache the account list.
    ///
    /// Returns the cached list afterwards, which is a newer refresh's result
    /// if one finished first.
    pub async fn refresh(&self) -> Vec<EmbeddedAccount> {
        let ticket = self.next_ticket();
        let accounts = match self.signer.list(&self.filter).await {
            Ok(accounts) => dedup_accounts(
                accounts
                    .into_iter()
                    .filter(|a| a.chain_type == self.filter.chain_type)
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(
                    chain_type = %self.filter.chain_type,
                    error = %e,
                    "Failed to list embedded wallets, treating as none"
                );
                Vec::new()
            }
        };

        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let mut snapshot = self.snapshot.write();
        if ticket < snapshot.ticket {
            tracing::debug!(
                chain_type = %self.filter.chain_type,
                ticket,
                current = snapshot.ticket,
                "Discarding stale wallet list"
            );
            return snapshot.accounts.clone();
        }
        tracing::debug!(
            chain_type = %self.filter.chain_type,
            count = accounts.len(),
            "Refreshed wallet registry"
        );
        snapshot.ticket = ticket;
        snapshot.accounts = accounts.clone();
        accounts
    }

    /// Drop the cached snapshot, e.g. on logout. Refreshes already in
    /// flight are discarded when they finish.
    pub fn clear(&self) {
        let ticket = self.next_ticket();
        let mut snapshot = self.snapshot.write();
        snapshot.ticket = ticket;
        snapshot.accounts.clear();
    }

    pub fn accounts(&self) -> Vec<EmbeddedAccount> {
        self.snapshot.read().accounts.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().accounts.is_empty()
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn wallets(&self) -> Vec<ConnectedWallet> {
        self.snapshot
            .read()
            .accounts
            .iter()
            .enumerate()
            .map(|(wallet_index, account)| ConnectedWallet {
                wallet_index,
                account: account.clone(),
                signer: Arc::clone(&self.signer),
            })
            .collect()
    }

    /// Locate an account by the dedup rule of its kind.
    ///
    /// EOAs match on address alone; contract accounts also need `chain_id`.
    pub fn find(&self, address: &str, chain_id: Option<u64>) -> Option<EmbeddedAccount> {
        self.snapshot
            .read()
            .accounts
            .iter()
            .find(|account| {
                account.chain_type.addresses_match(&account.address, address)
                    && match account.kind() {
                        AccountKind::Eoa => true,
                        AccountKind::Contract => account.chain_id == chain_id,
                    }
            })
            .cloned()
    }
}

impl std::fmt::Debug for WalletRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRegistry")
            .field("filter", &self.filter)
            .field("accounts", &self.snapshot.read().accounts.len())
            .finish()
    }
}
