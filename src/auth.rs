//! Host authentication identity
//!
//! Login itself happens outside the bridge. The host records who is signed
//! in here; wallet operations refuse to run without an identity.

use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Shared cell holding the current identity
#[derive(Debug, Clone, Default)]
pub struct IdentityCell {
    inner: Arc<RwLock<Option<UserIdentity>>>,
}

impl IdentityCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<UserIdentity> {
        self.inner.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Store `identity`; true if it differs from the previous one
    pub fn replace(&self, identity: Option<UserIdentity>) -> bool {
        let mut current = self.inner.write();
        if *current == identity {
            return false;
        }
        *current = identity;
        true
    }

    pub fn require(&self) -> Result<UserIdentity> {
        self.current()
            .ok_or_else(|| Error::Authentication("no user is signed in".to_string()))
    }
}
