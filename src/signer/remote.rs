//! Host-side signer client speaking over the message channel
//!
//! Each call is posted as `{id, method, params}` with a fresh uuid and
//! resolved when the sandbox answers with the same id. The channel does no
//! correlation of its own.

use super::{
    AccountFilter, CreateParams, EmbeddedAccount, EmbeddedState, ProviderHandle,
    ProviderOptions, RecoverParams, RequestArguments, SignOptions, Signer,
};
use crate::channel::{ChannelBuffer, MessageChannel, RpcRequest, RpcResponse};
use crate::wallet::RecoveryParams;
use crate::{Error, Result, WalletError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

type Pending = oneshot::Sender<Result<Value>>;

/// Signer client backed by the sandbox message channel
pub struct ChannelSigner {
    channel: MessageChannel,
    pending: Mutex<HashMap<String, Pending>>,
}

impl ChannelSigner {
    pub fn new(channel: MessageChannel) -> Self {
        Self {
            channel,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolve the call matching `response.id`.
    ///
    /// Returns `false` when no call is waiting for that id.
    pub fn on_message(&self, response: RpcResponse) -> bool {
        let waiter = self.pending.lock().remove(&response.id);
        match waiter {
            Some(tx) => {
                // The caller may have given up (ping timeout); nothing to do then.
                let _ = tx.send(response.into_result());
                true
            }
            None => {
                tracing::warn!(id = %response.id, "Dropping signer response with unknown id");
                false
            }
        }
    }

    /// Resolve a call from a raw response object.
    ///
    /// A body that does not decode still settles the call waiting on its
    /// id, with a `Signer` error.
    pub fn on_value(&self, value: Value) -> bool {
        let id = match value.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!("Dropping signer response without an id");
                return false;
            }
        };
        match serde_json::from_value::<RpcResponse>(value) {
            Ok(response) => self.on_message(response),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Undecodable signer response");
                let waiter = self.pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Err(Error::Signer(format!(
                            "undecodable signer response: {}",
                            e
                        ))));
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Fail every outstanding call, e.g. after the sandbox was reloaded
    pub fn fail_pending(&self, reason: &str) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::warn!(count = drained.len(), reason, "Failing outstanding signer calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(WalletError::SignerUnavailable(reason.to_string()).into()));
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, None).await
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if !self.channel.is_connected() {
            return Err(WalletError::SignerUnavailable(
                "sandbox channel is not connected".to_string(),
            )
            .into());
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        let _forget = ForgetOnDrop {
            pending: &self.pending,
            id: &id,
        };

        let request = RpcRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        self.channel.send_json(&request)?;
        tracing::debug!(method, id = %id, "Sent signer request");

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(WalletError::SignerUnavailable(format!(
                        "{} timed out after {}ms",
                        method,
                        limit.as_millis()
                    ))
                    .into());
                }
            },
            None => rx.await,
        };

        outcome.map_err(|_| {
            Error::from(WalletError::SignerUnavailable(format!(
                "{} was abandoned before a response arrived",
                method
            )))
        })?
    }
}

/// Removes a call's pending entry however the call ends, including when the
/// caller drops it mid-flight
struct ForgetOnDrop<'a> {
    pending: &'a Mutex<HashMap<String, Pending>>,
    id: &'a str,
}

impl Drop for ForgetOnDrop<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

impl std::fmt::Debug for ChannelSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSigner")
            .field("channel", &self.channel)
            .field("pending", &self.pending_requests())
            .finish()
    }
}

#[async_trait]
impl Signer for ChannelSigner {
    async fn get_embedded_state(&self) -> Result<EmbeddedState> {
        self.call_as("getEmbeddedState", Value::Null).await
    }

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<EmbeddedAccount>> {
        self.call_as("list", serde_json::to_value(filter)?).await
    }

    async fn get(&self) -> Result<EmbeddedAccount> {
        self.call_as("get", Value::Null).await
    }

    async fn create(&self, params: CreateParams) -> Result<EmbeddedAccount> {
        self.call_as(
            "create",
            json!({
                "chainType": params.chain_type,
                "chainId": params.chain_id,
                "accountKind": params.kind,
                "recovery": params.recovery.to_wire(),
            }),
        )
        .await
    }

    async fn recover(&self, params: RecoverParams) -> Result<EmbeddedAccount> {
        self.call_as(
            "recover",
            json!({
                "accountId": params.account_id,
                "address": params.address,
                "chainId": params.chain_id,
                "recovery": params.recovery.to_wire(),
            }),
        )
        .await
    }

    async fn set_recovery_method(
        &self,
        previous: RecoveryParams,
        next: RecoveryParams,
    ) -> Result<()> {
        self.call(
            "setRecoveryMethod",
            json!({
                "previous": previous.to_wire(),
                "next": next.to_wire(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn ethereum_provider(&self, options: ProviderOptions) -> Result<ProviderHandle> {
        self.call_as("getEthereumProvider", serde_json::to_value(options)?)
            .await
    }

    async fn ethereum_request(
        &self,
        provider: &ProviderHandle,
        request: RequestArguments,
    ) -> Result<Value> {
        self.call(
            "ethereumRequest",
            json!({
                "provider": provider,
                "request": request,
            }),
        )
        .await
    }

    async fn sign_message(&self, payload: ChannelBuffer, options: SignOptions) -> Result<String> {
        self.call_as(
            "signMessage",
            json!({
                "message": payload,
                "options": options,
            }),
        )
        .await
    }

    async fn ping(&self, timeout: Duration) -> Result<()> {
        self.call_with_timeout("ping", Value::Null, Some(timeout))
            .await?;
        Ok(())
    }
}
