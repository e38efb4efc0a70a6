//! Storage relay
//!
//! Answers the sandbox's reserved storage envelopes through the host's
//! credential store. Every failure is absorbed: reads degrade to `null`,
//! writes report `{"success": false}`, a flush always reports success.
//! A request whose payload cannot be decoded gets the failure shape of its
//! event.
//!
//! Writes are tracked per normalized key so a read issued while a write is
//! outstanding observes that write.

use super::keys::{flush_keys, normalize_key};
use super::store::CredentialStore;
use crate::channel::{MessageChannel, StorageEnvelope, StorageEvent, StorageRequest};
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

type WriteFuture = Shared<BoxFuture<'static, bool>>;

struct PendingWrite {
    ticket: u64,
    done: WriteFuture,
}

enum WriteOp {
    Set(String),
    Remove,
}

impl WriteOp {
    fn name(&self) -> &'static str {
        match self {
            WriteOp::Set(_) => "set",
            WriteOp::Remove => "remove",
        }
    }
}

struct RelayInner {
    store: Arc<dyn CredentialStore>,
    pending: Mutex<HashMap<String, PendingWrite>>,
    next_ticket: AtomicU64,
    runtime: Option<Handle>,
}

impl RelayInner {
    fn pending_write(&self, key: &str) -> Option<WriteFuture> {
        self.pending.lock().get(key).map(|p| p.done.clone())
    }

    /// Forget a completed write unless a newer one replaced it
    fn settle(&self, key: &str, ticket: u64) {
        let removed = {
            let mut pending = self.pending.lock();
            match pending.get(key) {
                Some(p) if p.ticket == ticket => pending.remove(key),
                _ => None,
            }
        };
        drop(removed);
    }
}

/// Soft-failure answer for a request that could not be decoded
fn rejected(event: StorageEvent) -> Value {
    match event {
        StorageEvent::Get => json!({ "value": null }),
        StorageEvent::Set | StorageEvent::Remove | StorageEvent::Flush => {
            json!({ "success": false })
        }
    }
}

/// Relay between sandbox storage envelopes and the credential store
#[derive(Clone)]
pub struct StorageRelay {
    inner: Arc<RelayInner>,
}

impl StorageRelay {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                store,
                pending: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    /// Number of writes not yet settled
    pub fn pending_writes(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Decode an envelope and start answering it.
    ///
    /// Write tracking is registered before this returns, so envelopes must
    /// be submitted in arrival order. Unknown reserved events are `Protocol`
    /// errors. A known event with an undecodable payload is still answered,
    /// with the soft-failure shape for that event.
    pub fn handle_envelope(
        &self,
        envelope: StorageEnvelope,
    ) -> Result<BoxFuture<'static, StorageEnvelope>> {
        let event = StorageEvent::parse(&envelope.event)?.ok_or_else(|| {
            Error::Protocol(format!("'{}' is not a storage event", envelope.event))
        })?;
        let id = envelope.id;

        let response = match StorageRequest::from_data(event, envelope.data) {
            Ok(request) => {
                tracing::debug!(event = %event, id = %id, "Relaying storage envelope");
                self.handle(request)
            }
            Err(e) => {
                tracing::warn!(
                    event = %event,
                    id = %id,
                    error = %e,
                    "Answering malformed storage request"
                );
                futures::future::ready(rejected(event)).boxed()
            }
        };
        Ok(async move { StorageEnvelope::new(event, id, response.await) }.boxed())
    }

    /// Answer an envelope asynchronously and post the response to `channel`.
    ///
    /// May be called from threads outside the runtime; the answer is spawned
    /// on the runtime the relay was created in.
    pub fn dispatch(&self, envelope: StorageEnvelope, channel: &MessageChannel) -> Result<()> {
        let runtime = Handle::try_current()
            .ok()
            .or_else(|| self.inner.runtime.clone())
            .ok_or_else(|| {
                Error::Config("storage relay has no tokio runtime to answer on".to_string())
            })?;
        let response = self.handle_envelope(envelope)?;
        let channel = channel.clone();
        runtime.spawn(async move {
            let envelope = response.await;
            if let Err(e) = channel.send_json(&envelope) {
                tracing::warn!(error = %e, id = %envelope.id, "Failed to encode storage response");
            }
        });
        Ok(())
    }

    /// Start a typed storage request, returning the response `data`
    pub fn handle(&self, request: StorageRequest) -> BoxFuture<'static, Value> {
        match request {
            StorageRequest::Get { key } => self.get(key),
            StorageRequest::Set { key, value } => self.write(key, WriteOp::Set(value)),
            StorageRequest::Remove { key } => self.write(key, WriteOp::Remove),
            StorageRequest::Flush { origin } => self.flush(origin),
        }
    }

    fn get(&self, key: String) -> BoxFuture<'static, Value> {
        let key = normalize_key(&key);
        let pending = self.inner.pending_write(&key);
        let store = Arc::clone(&self.inner.store);

        async move {
            if let Some(write) = pending {
                write.await;
            }
            let value = match store.get(&key).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Storage read failed, answering null");
                    None
                }
            };
            json!({ "value": value })
        }
        .boxed()
    }

    fn write(&self, key: String, op: WriteOp) -> BoxFuture<'static, Value> {
        let key = normalize_key(&key);
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.pending_write(&key);
        let inner = Arc::clone(&self.inner);
        let write_key = key.clone();

        let done: WriteFuture = async move {
            // Same-key writes apply in submission order.
            if let Some(previous) = previous {
                previous.await;
            }
            let result = match &op {
                WriteOp::Set(value) => inner.store.set(&write_key, value).await,
                WriteOp::Remove => inner.store.remove(&write_key).await,
            };
            let success = match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        key = %write_key,
                        op = op.name(),
                        error = %e,
                        "Storage write failed"
                    );
                    false
                }
            };
            inner.settle(&write_key, ticket);
            success
        }
        .boxed()
        .shared();

        self.inner.pending.lock().insert(
            key,
            PendingWrite {
                ticket,
                done: done.clone(),
            },
        );

        async move { json!({ "success": done.await }) }.boxed()
    }

    fn flush(&self, origin: String) -> BoxFuture<'static, Value> {
        let keys = flush_keys(&origin);
        let store = Arc::clone(&self.inner.store);

        async move {
            for key in keys {
                if let Err(e) = store.remove(&key).await {
                    tracing::debug!(key = %key, error = %e, "Ignoring flush deletion failure");
                }
            }
            tracing::info!(origin = %origin, "Flushed per-origin credentials");
            json!({ "success": true })
        }
        .boxed()
    }
}

impl std::fmt::Debug for StorageRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRelay")
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::keys::origin_key;
    use crate::storage::MemoryCredentialStore;
    use crate::testing::RecordingPoster;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Store whose writes take a while to land
    struct SlowStore {
        inner: MemoryCredentialStore,
        delay: Duration,
    }

    #[async_trait]
    impl CredentialStore for SlowStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.remove(key).await
        }
    }

    /// Store that rejects everything
    struct BrokenStore;

    #[async_trait]
    impl CredentialStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Storage("keychain locked".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage("keychain locked".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(Error::Storage("item not found".to_string()))
        }
    }

    fn set(key: &str, value: &str) -> StorageRequest {
        StorageRequest::Set {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn get(key: &str) -> StorageRequest {
        StorageRequest::Get {
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn read_after_completed_write() {
        let relay = StorageRelay::new(Arc::new(MemoryCredentialStore::new()));
        assert_eq!(relay.handle(set("k", "v")).await, json!({ "success": true }));
        assert_eq!(relay.handle(get("k")).await, json!({ "value": "v" }));
        assert_eq!(relay.pending_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_read_waits_for_outstanding_write() {
        let relay = StorageRelay::new(Arc::new(SlowStore {
            inner: MemoryCredentialStore::new(),
            delay: Duration::from_millis(200),
        }));

        let write = relay.handle(set("a:b", "v1"));
        let read = relay.handle(get("a:b"));

        // Poll the read first; it must still observe the write.
        let (read, write) = tokio::join!(read, write);
        assert_eq!(read, json!({ "value": "v1" }));
        assert_eq!(write, json!({ "success": true }));
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_writes_apply_in_order() {
        let relay = StorageRelay::new(Arc::new(SlowStore {
            inner: MemoryCredentialStore::new(),
            delay: Duration::from_millis(50),
        }));

        let first = relay.handle(set("k", "old"));
        let second = relay.handle(set("k", "new"));
        let read = relay.handle(get("k"));

        let (read, _, _) = tokio::join!(read, second, first);
        assert_eq!(read, json!({ "value": "new" }));
    }

    #[tokio::test]
    async fn keys_are_normalized_before_the_store() {
        let store = Arc::new(MemoryCredentialStore::new());
        let relay = StorageRelay::new(store.clone());

        relay.handle(set("wallet:device", "d1")).await;
        assert_eq!(
            store.get("wallet-device").await.unwrap(),
            Some("d1".to_string())
        );
        // Already-normalized keys reach the same entry.
        assert_eq!(relay.handle(get("wallet-device")).await, json!({ "value": "d1" }));
    }

    #[tokio::test]
    async fn failures_are_soft() {
        let relay = StorageRelay::new(Arc::new(BrokenStore));
        assert_eq!(relay.handle(get("k")).await, json!({ "value": null }));
        assert_eq!(relay.handle(set("k", "v")).await, json!({ "success": false }));
        assert_eq!(
            relay
                .handle(StorageRequest::Remove {
                    key: "k".to_string()
                })
                .await,
            json!({ "success": false })
        );
        assert_eq!(
            relay
                .handle(StorageRequest::Flush {
                    origin: "https://auth.test".to_string()
                })
                .await,
            json!({ "success": true })
        );
    }

    #[tokio::test]
    async fn flush_is_idempotent() {
        let origin = "https://auth.test";
        let store = Arc::new(MemoryCredentialStore::new());
        let relay = StorageRelay::new(store.clone());

        relay.handle(set(&origin_key(origin, "key-share"), "share")).await;
        relay.handle(set(&origin_key(origin, "address"), "0xaa")).await;
        relay.handle(set("unrelated", "keep")).await;

        let flush = || StorageRequest::Flush {
            origin: origin.to_string(),
        };
        assert_eq!(relay.handle(flush()).await, json!({ "success": true }));
        relay.handle(set(&origin_key(origin, "chain-id"), "1")).await;
        assert_eq!(relay.handle(flush()).await, json!({ "success": true }));
        assert_eq!(relay.handle(flush()).await, json!({ "success": true }));

        for key in flush_keys(origin) {
            assert_eq!(store.get(&key).await.unwrap(), None);
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_reserved_event_fails_fast() {
        let relay = StorageRelay::new(Arc::new(MemoryCredentialStore::new()));
        let envelope = StorageEnvelope {
            event: "storage:clear-all".to_string(),
            id: "1".to_string(),
            data: json!({}),
        };
        assert!(matches!(
            relay.handle_envelope(envelope),
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_posts_correlated_response() {
        let relay = StorageRelay::new(Arc::new(MemoryCredentialStore::new()));
        let channel = MessageChannel::new();
        let poster = Arc::new(RecordingPoster::default());
        channel.set_poster(poster.clone());

        let envelope = StorageEnvelope::new(StorageEvent::Get, "req-7", json!({ "key": "missing" }));
        relay.dispatch(envelope, &channel).unwrap();

        let posted = poster.wait_for(1).await;
        let response: StorageEnvelope = serde_json::from_str(&posted[0]).unwrap();
        assert_eq!(response.id, "req-7");
        assert_eq!(response.event, "storage:get");
        assert_eq!(response.data, json!({ "value": null }));
    }

    async fn answer(relay: &StorageRelay, event: &str, data: Value) -> StorageEnvelope {
        let envelope = StorageEnvelope {
            event: event.to_string(),
            id: "req-9".to_string(),
            data,
        };
        relay.handle_envelope(envelope).unwrap().await
    }

    #[tokio::test]
    async fn malformed_get_answers_null() {
        let relay = StorageRelay::new(Arc::new(MemoryCredentialStore::new()));
        let response = answer(&relay, "storage:get", json!({})).await;
        assert_eq!(response.id, "req-9");
        assert_eq!(response.event, "storage:get");
        assert_eq!(response.data, json!({ "value": null }));
    }

    #[tokio::test]
    async fn malformed_set_answers_failure() {
        let store = Arc::new(MemoryCredentialStore::new());
        let relay = StorageRelay::new(store.clone());
        let response = answer(&relay, "storage:set", json!({ "key": "k", "value": 5 })).await;
        assert_eq!(response.id, "req-9");
        assert_eq!(response.data, json!({ "success": false }));
        assert_eq!(store.len().await, 0);
        assert_eq!(relay.pending_writes(), 0);
    }

    #[tokio::test]
    async fn malformed_remove_answers_failure() {
        let relay = StorageRelay::new(Arc::new(MemoryCredentialStore::new()));
        let response = answer(&relay, "storage:remove", json!({ "key": ["k"] })).await;
        assert_eq!(response.event, "storage:remove");
        assert_eq!(response.data, json!({ "success": false }));
    }

    #[tokio::test]
    async fn malformed_payload_is_posted_back() {
        let relay = StorageRelay::new(Arc::new(MemoryCredentialStore::new()));
        let channel = MessageChannel::new();
        let poster = Arc::new(RecordingPoster::default());
        channel.set_poster(poster.clone());

        let envelope =
            StorageEnvelope::new(StorageEvent::Set, "req-9", json!({ "key": "k", "value": 5 }));
        relay.dispatch(envelope, &channel).unwrap();

        let posted = poster.wait_for(1).await;
        let response: StorageEnvelope = serde_json::from_str(&posted[0]).unwrap();
        assert_eq!(response.id, "req-9");
        assert_eq!(response.data, json!({ "success": false }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispatch_from_foreign_thread() {
        let relay = StorageRelay::new(Arc::new(MemoryCredentialStore::new()));
        let channel = MessageChannel::new();
        let poster = Arc::new(RecordingPoster::default());
        channel.set_poster(poster.clone());

        let dispatched = {
            let relay = relay.clone();
            let channel = channel.clone();
            std::thread::spawn(move || {
                let envelope =
                    StorageEnvelope::new(StorageEvent::Get, "req-3", json!({ "key": "k" }));
                relay.dispatch(envelope, &channel)
            })
            .join()
            .unwrap()
        };
        assert!(dispatched.is_ok());

        let posted = poster.wait_for(1).await;
        let response: StorageEnvelope = serde_json::from_str(&posted[0]).unwrap();
        assert_eq!(response.id, "req-3");
    }
}
