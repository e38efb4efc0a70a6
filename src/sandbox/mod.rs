//! Sandbox supervision
//!
//! The supervisor loads the sandboxed signer, points the message channel's
//! outbound half at it, and reloads it when a health ping goes unanswered.

use crate::channel::{MessageChannel, MessagePoster};
use crate::signer::Signer;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// Host surface able to run sandboxed content
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Load the content at `url`. Inbound payloads go to `channel.deliver`,
    /// which may be called from any thread; the returned poster carries
    /// outbound ones.
    async fn load(&self, url: &Url, channel: MessageChannel) -> Result<Arc<dyn MessagePoster>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxHealth {
    Healthy,
    /// The ping failed and the sandbox was loaded again
    Reloaded,
}

/// Owns the sandbox lifecycle for one session
pub struct SandboxSupervisor {
    sandbox: Arc<dyn Sandbox>,
    url: Url,
    channel: MessageChannel,
    signer: Arc<dyn Signer>,
    ping_timeout: Duration,
    lifecycle: Mutex<()>,
    loads: AtomicU64,
}

impl SandboxSupervisor {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        url: Url,
        channel: MessageChannel,
        signer: Arc<dyn Signer>,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            sandbox,
            url,
            channel,
            signer,
            ping_timeout,
            lifecycle: Mutex::new(()),
            loads: AtomicU64::new(0),
        }
    }

    /// Number of times the sandbox has been loaded
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.load().await
    }

    async fn load(&self) -> Result<()> {
        let poster = self.sandbox.load(&self.url, self.channel.clone()).await?;
        self.channel.set_poster(poster);
        let loads = self.loads.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(url = %self.url, loads, "Sandbox loaded");
        Ok(())
    }

    /// Ping the signer; reload and rewire the channel if it does not answer
    pub async fn check_health(&self) -> Result<SandboxHealth> {
        let _lifecycle = self.lifecycle.lock().await;

        let failure = if self.channel.is_connected() {
            match self.signer.ping(self.ping_timeout).await {
                Ok(()) => return Ok(SandboxHealth::Healthy),
                Err(e) => e.to_string(),
            }
        } else {
            "no live channel".to_string()
        };

        tracing::warn!(error = %failure, "Sandbox unresponsive, reloading");
        self.channel.clear_poster();
        self.load().await?;
        Ok(SandboxHealth::Reloaded)
    }

    /// The app came back to the foreground
    pub async fn on_app_resume(&self) -> Result<SandboxHealth> {
        self.check_health().await
    }

    pub fn shutdown(&self) {
        if self.channel.clear_poster().is_some() {
            tracing::debug!("Sandbox channel closed");
        }
    }
}

impl std::fmt::Debug for SandboxSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSupervisor")
            .field("url", &self.url.as_str())
            .field("loads", &self.load_count())
            .field("connected", &self.channel.is_connected())
            .finish()
    }
}
