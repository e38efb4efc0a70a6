//! Embedded wallet bookkeeping on the host side
//!
//! This module never touches key material. It caches what the signer
//! reports (the registry) and assembles the recovery parameters the signer
//! needs to create or recover an account.

mod recovery;
mod registry;

pub use recovery::{EncryptionSession, RecoveryOptions, RecoveryParams, RecoverySessionSupplier};
pub use registry::{dedup_accounts, ConnectedWallet, WalletRegistry};
