//! Embedded state poller
//!
//! The sandbox cannot reliably push lifecycle changes, so the host polls.
//! Polling is edge-triggered: the callback fires once per observed change,
//! never once per read. A failed read is a transient no-op and leaves the
//! last good state in place.

use crate::signer::{EmbeddedState, Signer};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Decides whether a new reading counts as a change
pub type StateComparator = Arc<dyn Fn(EmbeddedState, EmbeddedState) -> bool + Send + Sync>;

/// Poller tuning
#[derive(Clone)]
pub struct PollerOptions {
    pub interval: Duration,
    /// Cached value before the first successful read
    pub initial: EmbeddedState,
    /// Returns true when `(previous, next)` is a transition
    pub changed: StateComparator,
}

impl PollerOptions {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1_000),
            initial: EmbeddedState::None,
            changed: Arc::new(|previous, next| previous != next),
        }
    }
}

/// Last observed lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: EmbeddedState,
    /// Bumped on every observed transition
    pub generation: u64,
    pub changed_at: Option<DateTime<Utc>>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            state: EmbeddedState::None,
            generation: 0,
            changed_at: None,
        }
    }
}

/// Shared read handle on the poller's cached state
#[derive(Debug, Clone, Default)]
pub struct ObservedState {
    inner: Arc<RwLock<StateSnapshot>>,
}

impl ObservedState {
    pub fn new(initial: EmbeddedState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StateSnapshot {
                state: initial,
                ..StateSnapshot::default()
            })),
        }
    }

    pub fn current(&self) -> EmbeddedState {
        self.inner.read().state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.read().clone()
    }

    /// Store `next` if the comparator reports a change; true when stored
    fn record_if_changed(&self, next: EmbeddedState, changed: &StateComparator) -> bool {
        let mut snapshot = self.inner.write();
        if !changed(snapshot.state, next) {
            return false;
        }
        snapshot.state = next;
        snapshot.generation += 1;
        snapshot.changed_at = Some(Utc::now());
        true
    }

    #[cfg(test)]
    pub(crate) fn force(&self, state: EmbeddedState) {
        let mut snapshot = self.inner.write();
        snapshot.state = state;
        snapshot.generation += 1;
    }
}

/// Running poll loop. Dropping it stops polling.
pub struct EmbeddedStatePoller {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
    observed: ObservedState,
}

impl EmbeddedStatePoller {
    /// Start polling. The first check runs immediately rather than after one
    /// interval, so observers never see a stale initial state for a full tick.
    pub fn start<F>(signer: Arc<dyn Signer>, options: PollerOptions, on_change: F) -> Self
    where
        F: Fn(EmbeddedState) + Send + Sync + 'static,
    {
        let observed = ObservedState::new(options.initial);
        let active = Arc::new(AtomicBool::new(true));

        let task = {
            let observed = observed.clone();
            let active = Arc::clone(&active);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(options.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !active.load(Ordering::Acquire) {
                        break;
                    }
                    check(&*signer, &observed, &options.changed, &active, &on_change).await;
                }
            })
        };

        tracing::debug!(interval_ms = options.interval.as_millis() as u64, "Started embedded state poller");
        Self {
            active,
            task,
            observed,
        }
    }

    pub fn observed(&self) -> ObservedState {
        self.observed.clone()
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop polling. A check already in flight becomes a no-op.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.task.abort();
            tracing::debug!("Stopped embedded state poller");
        }
    }
}

impl Drop for EmbeddedStatePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn check<F>(
    signer: &dyn Signer,
    observed: &ObservedState,
    changed: &StateComparator,
    active: &AtomicBool,
    on_change: &F,
) where
    F: Fn(EmbeddedState),
{
    let result = signer.get_embedded_state().await;
    if !active.load(Ordering::Acquire) {
        return;
    }

    match result {
        Ok(next) => {
            // Update the cache before notifying so the callback sees `next`.
            if observed.record_if_changed(next, changed) {
                tracing::info!(state = %next, "Embedded wallet state changed");
                on_change(next);
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to query embedded wallet state");
        }
    }
}
