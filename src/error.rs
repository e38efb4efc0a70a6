//! Error types for the signer session bridge

use std::sync::Arc;
use thiserror::Error;

/// Wallet-level failures surfaced by the connection coordinators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Chain {requested} is not supported. Supported chains: [{}]", .supported.join(", "))]
    ChainNotSupported {
        requested: String,
        supported: Vec<String>,
    },

    #[error("No embedded wallets are available for this user")]
    NoAccounts,

    #[error("No embedded wallet found for address {address} on chain {chain}")]
    AccountNotFound { address: String, chain: String },

    #[error("Recovery parameters missing: {0}")]
    RecoveryParamsMissing(String),

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Wallet belongs to chain type {actual}, expected {expected}")]
    ChainTypeMismatch { expected: String, actual: String },

    #[error("Recovery method was not updated (signer reports {0})")]
    RecoveryMethodNotUpdated(String),
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Message channel error: {0}")]
    Channel(String),

    #[error("Protocol mismatch: {0}")]
    Protocol(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(Arc::new(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
