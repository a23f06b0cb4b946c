//! Durable FIFO of mutations that could not be delivered.

use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::state::{LocalState, LocalStateStore, StateError};
use crate::subscription::Subscription;
use crate::types::{QueueReport, QueueStats};
use async_trait::async_trait;
use keepsake_config::QueueConfig;
use keepsake_protocol::{
    BackendError, EventMsg, EventPayload, EventSink, PendingOperation, QueuedOperation, UserId,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Delivers one queued operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// `Ok` removes the operation; `Err` counts a failed attempt.
    async fn handle(&self, operation: &PendingOperation) -> Result<(), BackendError>;
}

/// Offline queue for one user, mirrored to local state on every change.
pub struct OfflineQueue {
    user_id: UserId,
    operations: Mutex<VecDeque<PendingOperation>>,
    state_store: Arc<dyn LocalStateStore>,
    max_retries: u32,
    processing: AtomicBool,
    event_sink: Option<Arc<dyn EventSink>>,
}

/// Clears the processing flag when a pass ends, even if it was cancelled.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineQueue {
    /// Empty queue for `user_id`; call [`OfflineQueue::restore`] to load
    /// what a previous run persisted.
    pub fn new(
        user_id: impl Into<UserId>,
        state_store: Arc<dyn LocalStateStore>,
        config: &QueueConfig,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            operations: Mutex::new(VecDeque::new()),
            state_store,
            max_retries: config.max_retries,
            processing: AtomicBool::new(false),
            event_sink,
        }
    }

    /// Reload the persisted queue, replacing what is held in memory.
    pub fn restore(&self) -> Result<usize, SyncError> {
        let state = self.state_store.load(&self.user_id)?;
        let count = state.pending_operations.len();
        *self.operations.lock() = state.pending_operations.into_iter().collect();
        info!(
            "offline queue restored (user_id={}, pending={})",
            self.user_id, count
        );
        Ok(count)
    }

    /// Append an operation and persist the queue before returning.
    pub fn enqueue(&self, operation: QueuedOperation) -> Result<PendingOperation, SyncError> {
        let pending = PendingOperation::new(operation);
        let mut operations = self.operations.lock();
        operations.push_back(pending.clone());
        if let Err(err) = self.persist_locked(&operations) {
            operations.pop_back();
            return Err(err.into());
        }
        info!(
            "operation queued (operation_id={}, kind={}, depth={})",
            pending.id,
            pending.kind(),
            operations.len()
        );
        Ok(pending)
    }

    /// Replay queued operations in order.
    ///
    /// The pass stops at the first failure. An operation whose retry count
    /// reaches the cap is dropped and reported. A call made while another
    /// pass is running returns an empty report.
    pub async fn process_queue(&self, handler: &dyn OperationHandler) -> QueueReport {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("queue pass already running (user_id={})", self.user_id);
            return QueueReport::default();
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut report = QueueReport::default();
        loop {
            let Some(next) = self.operations.lock().front().cloned() else {
                break;
            };
            match handler.handle(&next).await {
                Ok(()) => {
                    report.processed += 1;
                    let mut operations = self.operations.lock();
                    operations.retain(|op| op.id != next.id);
                    if let Err(err) = self.persist_locked(&operations) {
                        warn!("failed to persist queue after delivery: {}", err);
                    }
                    debug!(
                        "queued operation delivered (operation_id={}, kind={})",
                        next.id,
                        next.kind()
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    if let Some(exhausted) = self.record_failure(&next, &err) {
                        report.exhausted.push(exhausted);
                    }
                    break;
                }
            }
        }
        report.remaining = self.operations.lock().len();
        info!(
            "queue pass finished (processed={}, failed={}, remaining={})",
            report.processed, report.failed, report.remaining
        );
        report
    }

    /// Bump the retry count of a failed operation; drop it at the cap.
    fn record_failure(
        &self,
        failed: &PendingOperation,
        err: &BackendError,
    ) -> Option<PendingOperation> {
        let mut operations = self.operations.lock();
        let idx = operations.iter().position(|op| op.id == failed.id)?;
        let retry_count = {
            let op = &mut operations[idx];
            op.retry_count += 1;
            op.last_error = Some(err.to_string());
            op.retry_count
        };
        let exhausted = if retry_count >= self.max_retries {
            operations.remove(idx)
        } else {
            None
        };
        if let Err(persist_err) = self.persist_locked(&operations) {
            warn!("failed to persist queue after failure: {}", persist_err);
        }
        drop(operations);

        match &exhausted {
            Some(op) => {
                warn!(
                    "queued operation dropped after retries (operation_id={}, kind={}, retries={}): {}",
                    op.id,
                    op.kind(),
                    op.retry_count,
                    err
                );
                self.emit(EventPayload::QueueOperationFailed {
                    operation_id: op.id,
                    kind: op.kind(),
                    retry_count: op.retry_count,
                    error: op.last_error.clone(),
                });
            }
            None => warn!(
                "queued operation failed (operation_id={}, kind={}, retries={}): {}",
                failed.id,
                failed.kind(),
                retry_count,
                err
            ),
        }
        exhausted
    }

    /// Replay the queue on every transition to online.
    ///
    /// Emits `QueueSynced` after each pass that attempted anything.
    pub fn setup_auto_sync(
        self: &Arc<Self>,
        handler: Arc<dyn OperationHandler>,
        connectivity: &Connectivity,
    ) -> Subscription {
        let mut receiver = connectivity.subscribe();
        let queue = Arc::clone(self);
        let live = Arc::new(AtomicBool::new(true));
        let flag = live.clone();
        let handle = tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                // The watch only fires on flips, so "online now" means it came back.
                let online = *receiver.borrow_and_update();
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                if !online || queue.is_empty() {
                    continue;
                }
                debug!(
                    "connectivity restored, replaying queue (user_id={})",
                    queue.user_id
                );
                let report = queue.process_queue(handler.as_ref()).await;
                if report.attempted() > 0 {
                    queue.emit(EventPayload::QueueSynced {
                        processed: report.processed,
                        failed: report.failed,
                        remaining: report.remaining,
                    });
                }
            }
        });
        Subscription::from_task("auto-sync", live, handle)
    }

    /// Depth, oldest entry, highest retry count and whether a pass is running.
    pub fn stats(&self) -> QueueStats {
        let operations = self.operations.lock();
        QueueStats {
            depth: operations.len(),
            oldest_enqueued_at: operations.iter().map(|op| op.enqueued_at).min(),
            max_retry_count: operations
                .iter()
                .map(|op| op.retry_count)
                .max()
                .unwrap_or(0),
            processing: self.processing.load(Ordering::Acquire),
        }
    }

    /// Queued operations in replay order.
    pub fn list(&self) -> Vec<PendingOperation> {
        self.operations.lock().iter().cloned().collect()
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.lock().is_empty()
    }

    /// Drop every queued operation; returns how many were removed.
    pub fn clear(&self) -> Result<usize, SyncError> {
        let mut operations = self.operations.lock();
        let removed = operations.len();
        operations.clear();
        self.persist_locked(&operations)?;
        info!(
            "offline queue cleared (user_id={}, removed={})",
            self.user_id, removed
        );
        Ok(removed)
    }

    /// Write the queue while the caller holds the queue lock, so snapshots
    /// reach disk in the order they were taken.
    fn persist_locked(&self, operations: &VecDeque<PendingOperation>) -> Result<(), StateError> {
        let snapshot: Vec<PendingOperation> = operations.iter().cloned().collect();
        self.state_store
            .update(&self.user_id, &mut |state: &mut LocalState| {
                state.pending_operations = snapshot.clone();
            })
            .map(|_| ())
    }

    fn emit(&self, payload: EventPayload) {
        if let Some(sink) = &self.event_sink {
            sink.emit(EventMsg::new(payload));
        }
    }
}
