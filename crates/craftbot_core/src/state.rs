//! Process-wide state shared between the supervisor and the dispatch worker.
//!
//! There are exactly two pieces of it: the run flag and the presence set.
//! Both live in one [`AgentState`] that is passed around explicitly.

use crate::presence::PresenceTracker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Running / stop-requested flag with a wake-up for waiters.
#[derive(Debug, Default)]
pub struct RunState {
    stop_requested: AtomicBool,
    notify: Notify,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.is_stop_requested()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Flips the flag to stop-requested and wakes every waiter.
    ///
    /// Returns `true` only for the call that actually performed the transition.
    pub fn request_stop(&self) -> bool {
        let first = !self.stop_requested.swap(true, Ordering::SeqCst);
        if first {
            info!("Stop requested");
            self.notify.notify_waiters();
        }
        first
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request_stop is not missed.
        notified.as_mut().enable();
        if self.is_stop_requested() {
            return;
        }
        notified.await;
    }
}

/// Everything more than one worker touches.
#[derive(Debug, Default)]
pub struct AgentState {
    pub run: RunState,
    pub presence: Arc<PresenceTracker>,
}

impl AgentState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
