//! Cancellable listener handles.
//!
//! Every background listener carries a liveness flag. Cancelling clears the
//! flag before aborting the task, and listeners check the flag before acting
//! on anything they receive, so a torn-down listener never applies a late
//! event.

use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Handle to a spawned listener; cancelled on drop.
pub struct Subscription {
    label: String,
    live: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Forward every item of a broadcast receiver to `handler` until cancelled.
    pub fn spawn<T, F>(
        label: impl Into<String>,
        mut receiver: broadcast::Receiver<T>,
        handler: F,
    ) -> Self
    where
        T: Clone + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let label = label.into();
        let live = Arc::new(AtomicBool::new(true));
        let flag = live.clone();
        let task_label = label.clone();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(item) => {
                        if !flag.load(Ordering::Acquire) {
                            break;
                        }
                        handler(item);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "subscription lagged (label={}, skipped={})",
                            task_label, skipped
                        );
                    }
                    Err(RecvError::Closed) => {
                        debug!("subscription source closed (label={})", task_label);
                        break;
                    }
                }
            }
        });
        Self {
            label,
            live,
            handle: Some(handle),
        }
    }

    /// Wrap a task that already watches `live`.
    pub fn from_task(
        label: impl Into<String>,
        live: Arc<AtomicBool>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            label: label.into(),
            live,
            handle: Some(handle),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Clear the liveness flag, then abort the task.
    pub fn cancel(&mut self) {
        self.live.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            debug!("cancelling subscription (label={})", self.label);
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
