//! Recovery parameters for create / recover / set-recovery
//!
//! SECURITY: passwords and encryption-session secrets are held in
//! `SecretString` and only exposed when the wire payload for the signer is
//! built. They are never logged.

use crate::signer::RecoveryMethod;
use crate::{Result, WalletError};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

/// Recovery choice made by application code
#[derive(Debug)]
pub enum RecoveryOptions {
    /// User-supplied passcode
    Password(SecretString),
    /// Automatic recovery backed by a server-side encryption session
    Automatic,
}

impl RecoveryOptions {
    pub fn password(password: impl Into<String>) -> Self {
        RecoveryOptions::Password(SecretString::from(password.into()))
    }

    pub fn method(&self) -> RecoveryMethod {
        match self {
            RecoveryOptions::Password(_) => RecoveryMethod::UserPasscode,
            RecoveryOptions::Automatic => RecoveryMethod::Automatic,
        }
    }
}

/// Encryption session used for automatic recovery
#[derive(Debug)]
pub struct EncryptionSession {
    pub id: String,
    pub key: SecretString,
}

/// Supplies encryption sessions for automatic recovery
#[async_trait]
pub trait RecoverySessionSupplier: Send + Sync {
    async fn encryption_session(&self) -> Result<EncryptionSession>;
}

/// Fully resolved recovery parameters handed to the signer
#[derive(Debug)]
pub enum RecoveryParams {
    UserPasscode { password: SecretString },
    Automatic { session: EncryptionSession },
}

impl RecoveryParams {
    /// Resolve application options, fetching a session for automatic recovery
    pub async fn build(
        options: RecoveryOptions,
        sessions: &dyn RecoverySessionSupplier,
    ) -> Result<Self> {
        match options {
            RecoveryOptions::Password(password) => {
                if password.expose_secret().is_empty() {
                    return Err(WalletError::RecoveryParamsMissing(
                        "a password is required for user-passcode recovery".to_string(),
                    )
                    .into());
                }
                Ok(RecoveryParams::UserPasscode { password })
            }
            RecoveryOptions::Automatic => {
                let session = sessions.encryption_session().await?;
                if session.key.expose_secret().is_empty() {
                    return Err(WalletError::RecoveryParamsMissing(
                        "the encryption session has no key".to_string(),
                    )
                    .into());
                }
                Ok(RecoveryParams::Automatic { session })
            }
        }
    }

    pub fn method(&self) -> RecoveryMethod {
        match self {
            RecoveryParams::UserPasscode { .. } => RecoveryMethod::UserPasscode,
            RecoveryParams::Automatic { .. } => RecoveryMethod::Automatic,
        }
    }

    /// Payload sent to the signer. This is the only place secrets are exposed.
    pub fn to_wire(&self) -> Value {
        match self {
            RecoveryParams::UserPasscode { password } => json!({
                "recoveryMethod": RecoveryMethod::UserPasscode,
                "password": password.expose_secret(),
            }),
            RecoveryParams::Automatic { session } => json!({
                "recoveryMethod": RecoveryMethod::Automatic,
                "encryptionSession": {
                    "id": session.id,
                    "key": session.key.expose_secret(),
                },
            }),
        }
    }
}
