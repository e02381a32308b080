//! Cache expiry countdown
//!
//! The timer is a tokio task whose only effect is setting
//! [`Flag::CacheExpired`]; the worker decides what to do about it on its next
//! wake.

use crate::daemon::signal::{Flag, Signals};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Restartable countdown that marks the open database as stale
pub struct CacheTimer {
    runtime: Handle,
    period: Duration,
    signals: Arc<Signals>,
    task: Option<JoinHandle<()>>,
}

impl CacheTimer {
    /// Create a stopped timer; `runtime` hosts the countdown task
    pub fn new(runtime: Handle, period: Duration, signals: Arc<Signals>) -> Self {
        Self {
            runtime,
            period,
            signals,
            task: None,
        }
    }

    /// Start counting down from the full period, cancelling any countdown in progress
    pub fn restart(&mut self) {
        self.cancel();
        let period = self.period;
        let signals = Arc::clone(&self.signals);
        self.task = Some(self.runtime.spawn(async move {
            tokio::time::sleep(period).await;
            debug!("Cache period of {:?} elapsed", period);
            signals.set(Flag::CacheExpired);
        }));
    }

    /// Stop the countdown without firing
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CacheTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
