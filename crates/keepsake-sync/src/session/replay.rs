use crate::queue::OperationHandler;
use crate::registry::ActiveSelection;
use crate::store::MemoryStore;
use async_trait::async_trait;
use keepsake_protocol::{
    BackendError, EventMsg, EventPayload, EventSink, PendingOperation, PersistenceBackend,
    QueuedOperation, RealtimeChannel, RealtimeEvent, UserId,
};
use log::{debug, warn};
use std::sync::Arc;

/// Sends queued operations to the backend and folds the results into the store.
pub(crate) struct ReplayHandler {
    pub(crate) backend: Arc<dyn PersistenceBackend>,
    pub(crate) channel: Arc<dyn RealtimeChannel>,
    pub(crate) store: MemoryStore,
    pub(crate) selection: ActiveSelection,
    pub(crate) user_id: UserId,
    pub(crate) event_sink: Option<Arc<dyn EventSink>>,
}

impl ReplayHandler {
    async fn broadcast(&self, event: RealtimeEvent) {
        if let Err(err) = self.channel.broadcast_memory_update(&event).await {
            warn!(
                "broadcast after replay failed (memory_id={}): {}",
                event.memory_id, err
            );
        }
    }

    fn view_changed(&self, connection_id: &str) {
        if let Some(sink) = &self.event_sink {
            sink.emit(EventMsg::new(EventPayload::ActiveViewChanged {
                connection_id: connection_id.to_string(),
                count: self.store.active_view().len(),
            }));
        }
    }
}

#[async_trait]
impl OperationHandler for ReplayHandler {
    async fn handle(&self, pending: &PendingOperation) -> Result<(), BackendError> {
        debug!(
            "replaying operation (operation_id={}, kind={}, retries={})",
            pending.id,
            pending.kind(),
            pending.retry_count
        );
        match &pending.operation {
            QueuedOperation::CreateMemory { memory } => {
                let created = self.backend.create_memory(memory).await?;
                let into_active = self.selection.is(&created.connection_id);
                if self
                    .store
                    .insert_remote(created.clone(), into_active)
                    .touched_view()
                {
                    self.view_changed(&created.connection_id);
                }
                self.broadcast(RealtimeEvent::create(created, self.user_id.clone()))
                    .await;
            }
            QueuedOperation::UpdateMemory {
                memory_id, patch, ..
            } => match self.backend.update_memory(memory_id, patch).await {
                Ok(updated) => {
                    if self.store.replace_memory(&updated).touched_view() {
                        self.view_changed(&updated.connection_id);
                    }
                    self.broadcast(RealtimeEvent::update(updated, self.user_id.clone()))
                        .await;
                }
                Err(BackendError::NotFound(_)) => {
                    warn!(
                        "queued update target is gone, dropping (memory_id={})",
                        memory_id
                    );
                }
                Err(err) => return Err(err),
            },
            QueuedOperation::DeleteMemory {
                connection_id,
                memory_id,
            } => {
                match self.backend.delete_memory(memory_id).await {
                    Ok(()) => {}
                    Err(BackendError::NotFound(_)) => {
                        debug!("queued delete already applied (memory_id={})", memory_id);
                    }
                    Err(err) => return Err(err),
                }
                if self.store.remove_memory(connection_id, memory_id) == Some(true) {
                    self.view_changed(connection_id);
                }
                self.broadcast(RealtimeEvent::delete(
                    connection_id.clone(),
                    memory_id.clone(),
                    self.user_id.clone(),
                ))
                .await;
            }
            QueuedOperation::UpdateProfile { profile } => {
                self.backend.update_profile(profile).await?;
            }
        }
        Ok(())
    }
}
