//! Bidirectional string-only transport between the host and the sandbox
//!
//! The channel never correlates requests and responses and never buffers:
//! a send without a live poster is dropped. Inbound payloads are decoded
//! here so a malformed envelope is logged and discarded before it reaches
//! any handler.

mod envelope;

pub use envelope::{
    ChannelBuffer, RpcError, RpcRequest, RpcResponse, StorageEnvelope, StorageEvent,
    StorageRequest, STORAGE_EVENT_PREFIX,
};

use crate::Result;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Outbound half: how envelopes reach the sandboxed content
pub trait MessagePoster: Send + Sync {
    fn post(&self, raw: String);
}

/// Inbound handler. Receives every decoded envelope.
pub type ReceiveHandler = Arc<dyn Fn(Value) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct ChannelInner {
    poster: RwLock<Option<Arc<dyn MessagePoster>>>,
    handler: RwLock<Option<ReceiveHandler>>,
}

/// Message channel shared by the supervisor, relay and signer client
#[derive(Clone, Default)]
pub struct MessageChannel {
    inner: Arc<ChannelInner>,
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-forget send of an already encoded envelope
    pub fn send(&self, envelope: String) {
        let poster = self.inner.poster.read().clone();
        match poster {
            Some(poster) => {
                tracing::debug!(bytes = envelope.len(), "Posting envelope to sandbox");
                poster.post(envelope);
            }
            None => {
                tracing::warn!("No live sandbox channel, dropping outbound envelope");
            }
        }
    }

    /// Encode and send a value
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.send(raw);
        Ok(())
    }

    /// Register the inbound handler. The last registration wins.
    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(Value) -> Result<()> + Send + Sync + 'static,
    {
        *self.inner.handler.write() = Some(Arc::new(handler));
    }

    /// Drop the inbound handler; later payloads are discarded
    pub fn clear_handler(&self) {
        self.inner.handler.write().take();
    }

    /// Point outbound traffic at a new poster, returning the previous one
    pub fn set_poster(&self, poster: Arc<dyn MessagePoster>) -> Option<Arc<dyn MessagePoster>> {
        self.inner.poster.write().replace(poster)
    }

    pub fn clear_poster(&self) -> Option<Arc<dyn MessagePoster>> {
        self.inner.poster.write().take()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.poster.read().is_some()
    }

    /// Entry point for raw payloads arriving from the sandbox.
    ///
    /// Malformed JSON is logged and dropped. Errors returned by the handler
    /// (protocol mismatches) are propagated to the caller.
    ///
    /// Safe to call from threads outside the tokio runtime; the storage
    /// relay answers on the runtime the session was started in.
    pub fn deliver(&self, raw: &str) -> Result<()> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, bytes = raw.len(), "Dropping malformed inbound envelope");
                return Ok(());
            }
        };

        let handler = self.inner.handler.read().clone();
        match handler {
            Some(handler) => handler(value),
            None => {
                tracing::debug!("No receive handler registered, dropping inbound envelope");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("connected", &self.is_connected())
            .finish()
    }
}
