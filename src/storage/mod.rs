//! Secure storage on behalf of the sandbox
//!
//! The sandbox cannot reach the platform keychain itself. It sends
//! `storage:*` envelopes which the [`StorageRelay`] answers through a
//! [`CredentialStore`]. The relay is the only component that writes to the
//! store for the sandbox.

pub mod keys;
mod relay;
mod store;

pub use keys::{flush_keys, normalize_key, origin_key};
pub use relay::StorageRelay;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
