//! Shared test doubles

use crate::channel::{ChannelBuffer, MessagePoster};
use crate::signer::{
    AccountFilter, AccountKind, ChainType, CreateParams, EmbeddedAccount, EmbeddedState,
    ProviderHandle, ProviderOptions, RecoverParams, RequestArguments, SignOptions, Signer,
};
use crate::wallet::{EncryptionSession, RecoveryParams, RecoverySessionSupplier};
use crate::{Error, Result, WalletError};
use alloy::primitives::hex;
use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn eoa(id: &str, address: &str, chain_id: Option<u64>) -> EmbeddedAccount {
    EmbeddedAccount {
        id: id.to_string(),
        address: address.to_string(),
        owner_address: None,
        implementation_type: None,
        chain_type: ChainType::Ethereum,
        chain_id,
        recovery_method: None,
    }
}

pub fn contract_account(id: &str, address: &str, chain_id: u64) -> EmbeddedAccount {
    EmbeddedAccount {
        owner_address: Some("0x0000000000000000000000000000000000000001".to_string()),
        implementation_type: Some("kernel".to_string()),
        ..eoa(id, address, Some(chain_id))
    }
}

pub fn solana_account(id: &str, address: &str) -> EmbeddedAccount {
    EmbeddedAccount {
        chain_type: ChainType::Solana,
        ..eoa(id, address, None)
    }
}

/// Poster that records every outbound payload
#[derive(Default)]
pub struct RecordingPoster {
    messages: Mutex<Vec<String>>,
    posted: Notify,
}

impl RecordingPoster {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Wait until at least `n` payloads were posted
    pub async fn wait_for(&self, n: usize) -> Vec<String> {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let posted = self.posted.notified();
                let messages = self.messages();
                if messages.len() >= n {
                    return messages;
                }
                posted.await;
            }
        })
        .await
        .expect("poster never received the expected messages")
    }
}

impl MessagePoster for RecordingPoster {
    fn post(&self, raw: String) {
        self.messages.lock().push(raw);
        self.posted.notify_waiters();
    }
}

/// Session supplier with a fixed encryption session
pub struct StaticSessions;

#[async_trait]
impl RecoverySessionSupplier for StaticSessions {
    async fn encryption_session(&self) -> Result<EncryptionSession> {
        Ok(EncryptionSession {
            id: "session-1".to_string(),
            key: SecretString::from("session-key".to_string()),
        })
    }
}

#[derive(Default)]
struct MockState {
    accounts: Vec<EmbeddedAccount>,
    active: Option<EmbeddedAccount>,
    created: usize,
    fail_list: bool,
    fail_recovery: bool,
    fail_ping: bool,
    ignore_recovery_changes: bool,
    recovery_gate: Option<Arc<Notify>>,
    list_gate: Option<Arc<Notify>>,
    list_release: Option<Arc<Notify>>,
    states: VecDeque<Result<EmbeddedState>>,
    last_state: Option<Result<EmbeddedState>>,
    state_delay: Option<Duration>,
    calls: HashMap<&'static str, usize>,
    last_ethereum_request: Option<RequestArguments>,
    signed: Vec<Vec<u8>>,
    signing: usize,
    max_signing: usize,
}

/// Scriptable in-process signer
#[derive(Default)]
pub struct MockSigner {
    state: Mutex<MockState>,
    called: Notify,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accounts(&self, accounts: Vec<EmbeddedAccount>) {
        self.state.lock().accounts = accounts;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    pub fn fail_recovery(&self, fail: bool) {
        self.state.lock().fail_recovery = fail;
    }

    pub fn fail_ping(&self, fail: bool) {
        self.state.lock().fail_ping = fail;
    }

    /// Make `set_recovery_method` succeed without changing anything
    pub fn ignore_recovery_changes(&self, ignore: bool) {
        self.state.lock().ignore_recovery_changes = ignore;
    }

    /// Answers for successive state reads; the last one repeats
    pub fn script_states(&self, states: Vec<Result<EmbeddedState>>) {
        self.state.lock().states = states.into();
    }

    pub fn delay_state_reads(&self, delay: Duration) {
        self.state.lock().state_delay = Some(delay);
    }

    /// Park every `recover` call until [`release_recovery`](Self::release_recovery)
    pub fn hold_recovery(&self) {
        self.state.lock().recovery_gate = Some(Arc::new(Notify::new()));
    }

    pub fn release_recovery(&self) {
        if let Some(gate) = self.state.lock().recovery_gate.take() {
            gate.notify_one();
        }
    }

    /// Park the next `list` call until [`release_list`](Self::release_list).
    /// It answers with the accounts as they were when it was issued.
    pub fn hold_next_list(&self) {
        let gate = Arc::new(Notify::new());
        let mut state = self.state.lock();
        state.list_gate = Some(Arc::clone(&gate));
        state.list_release = Some(gate);
    }

    pub fn release_list(&self) {
        if let Some(gate) = self.state.lock().list_release.take() {
            gate.notify_one();
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub async fn wait_for_call(&self, method: &str) {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let called = self.called.notified();
                if self.calls(method) > 0 {
                    return;
                }
                called.await;
            }
        })
        .await
        .expect("signer method was never called");
    }

    pub fn last_ethereum_request(&self) -> Option<RequestArguments> {
        self.state.lock().last_ethereum_request.clone()
    }

    pub fn signed_payloads(&self) -> Vec<Vec<u8>> {
        self.state.lock().signed.clone()
    }

    pub fn max_concurrent_signs(&self) -> usize {
        self.state.lock().max_signing
    }

    fn record(&self, method: &'static str) {
        *self.state.lock().calls.entry(method).or_default() += 1;
        self.called.notify_waiters();
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn get_embedded_state(&self) -> Result<EmbeddedState> {
        self.record("get_embedded_state");
        let delay = self.state.lock().state_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        match state.states.pop_front() {
            Some(next) => {
                state.last_state = Some(next.clone());
                next
            }
            None => state.last_state.clone().unwrap_or(Ok(EmbeddedState::Ready)),
        }
    }

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<EmbeddedAccount>> {
        let snapshot = {
            let mut state = self.state.lock();
            if state.fail_list {
                None
            } else {
                let listed: Vec<_> = state
                    .accounts
                    .iter()
                    .filter(|a| a.chain_type == filter.chain_type)
                    .filter(|a| filter.kind.map_or(true, |kind| a.kind() == kind))
                    .cloned()
                    .collect();
                Some((listed, state.list_gate.take()))
            }
        };
        self.record("list");
        let (listed, gate) = snapshot.ok_or_else(|| Error::Signer("list failed".to_string()))?;
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(listed)
    }

    async fn get(&self) -> Result<EmbeddedAccount> {
        self.record("get");
        self.state
            .lock()
            .active
            .clone()
            .ok_or_else(|| Error::Signer("no active account".to_string()))
    }

    async fn create(&self, params: CreateParams) -> Result<EmbeddedAccount> {
        self.record("create");
        let mut state = self.state.lock();
        state.created += 1;
        let n = state.created;

        let address = match params.chain_type {
            ChainType::Ethereum => format!("0x{:040x}", n),
            ChainType::Solana => format!("So1New{}", n),
        };
        let account = EmbeddedAccount {
            id: format!("created-{}", n),
            address,
            owner_address: None,
            implementation_type: match params.kind {
                AccountKind::Contract => Some("kernel".to_string()),
                AccountKind::Eoa => None,
            },
            chain_type: params.chain_type,
            chain_id: params.chain_id,
            recovery_method: Some(params.recovery.method()),
        };
        state.accounts.push(account.clone());
        state.active = Some(account.clone());
        Ok(account)
    }

    async fn recover(&self, params: RecoverParams) -> Result<EmbeddedAccount> {
        self.record("recover");
        let gate = self.state.lock().recovery_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if state.fail_recovery {
            return Err(Error::Signer("recovery rejected".to_string()));
        }
        let mut account = state
            .accounts
            .iter()
            .find(|a| a.chain_type.addresses_match(&a.address, &params.address))
            .cloned()
            .ok_or_else(|| Error::Signer(format!("unknown account {}", params.address)))?;
        account.recovery_method = Some(params.recovery.method());
        state.active = Some(account.clone());
        Ok(account)
    }

    async fn set_recovery_method(
        &self,
        _previous: RecoveryParams,
        next: RecoveryParams,
    ) -> Result<()> {
        self.record("set_recovery_method");
        let mut state = self.state.lock();
        if !state.ignore_recovery_changes {
            if let Some(active) = state.active.as_mut() {
                active.recovery_method = Some(next.method());
            }
        }
        Ok(())
    }

    async fn ethereum_provider(&self, options: ProviderOptions) -> Result<ProviderHandle> {
        self.record("ethereum_provider");
        Ok(ProviderHandle(format!(
            "provider:{}:{}",
            options.address, options.chain_id
        )))
    }

    async fn ethereum_request(
        &self,
        _provider: &ProviderHandle,
        request: RequestArguments,
    ) -> Result<Value> {
        self.record("ethereum_request");
        self.state.lock().last_ethereum_request = Some(request.clone());
        Ok(match request.method.as_str() {
            "eth_chainId" => json!("0x1"),
            "personal_sign" => json!("0xsigned"),
            "wallet_switchEthereumChain" => Value::Null,
            _ => json!({ "method": request.method, "params": request.params }),
        })
    }

    async fn sign_message(&self, payload: ChannelBuffer, options: SignOptions) -> Result<String> {
        self.record("sign_message");
        {
            let mut state = self.state.lock();
            state.signing += 1;
            state.max_signing = state.max_signing.max(state.signing);
        }
        tokio::task::yield_now().await;

        let bytes = payload.into_bytes();
        let mut state = self.state.lock();
        state.signing -= 1;
        let signature = format!("sig:{}:{}", options.address, hex::encode(&bytes));
        state.signed.push(bytes);
        Ok(signature)
    }

    async fn ping(&self, _timeout: Duration) -> Result<()> {
        self.record("ping");
        if self.state.lock().fail_ping {
            return Err(WalletError::SignerUnavailable("ping timed out".to_string()).into());
        }
        Ok(())
    }
}
