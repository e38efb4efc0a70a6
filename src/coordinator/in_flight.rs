//! Single-slot in-flight operation guard
//!
//! The first caller starts the operation; callers arriving while it runs
//! join it and receive the same outcome. The operation runs on its own task
//! so it completes (and clears the slot) even if every caller goes away.

use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

pub struct InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    slot: Arc<Mutex<Option<SharedOutcome<T>>>>,
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Join the running operation, or start one with `start`.
    ///
    /// `start` is only invoked when the slot is empty. The slot is cleared
    /// when the operation settles, whether it succeeded or failed.
    pub async fn run<F, Fut>(&self, start: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let outcome = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!("Joining in-flight operation");
                    running.clone()
                }
                None => {
                    let operation = start();
                    let release = Arc::clone(&self.slot);
                    // The task cannot clear the slot before it is filled: it
                    // needs the lock we are holding.
                    let task = tokio::spawn(async move {
                        let outcome = operation.await;
                        release.lock().take();
                        outcome
                    });
                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(Error::Signer(format!("operation aborted: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        outcome.await
    }
}

impl<T> Default for InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
