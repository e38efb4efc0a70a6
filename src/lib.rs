//! Embedded Signer Bridge
//!
//! Host-side session bridge for an embedded wallet whose signer runs in a
//! sandbox:
//! - Supervises the sandbox and wires the message channel to it
//! - Answers the sandbox's storage requests from the host credential store
//! - Polls the signer's lifecycle state and refreshes the wallet registries
//! - Coordinates create / set-active / set-recovery with one call in flight
//!
//! # Security Model
//!
//! - Key material never leaves the sandboxed signer
//! - Passwords and encryption-session keys are `SecretString`s, exposed only
//!   when the signer payload is built
//! - Only the storage relay writes to the credential store on the sandbox's
//!   behalf

pub mod auth;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod poller;
pub mod provider;
pub mod sandbox;
pub mod session;
pub mod signer;
pub mod storage;
pub mod wallet;

mod error;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use auth::UserIdentity;
pub use config::{BridgeConfig, APP_ID_ENV, SANDBOX_URL_ENV};
pub use coordinator::{ActiveWallet, CreateOptions, SetActiveOptions, WalletStatus};
pub use error::{Error, Result, WalletError};
pub use session::{SignerSession, SignerSessionBuilder};
