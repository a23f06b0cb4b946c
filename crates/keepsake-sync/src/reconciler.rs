//! Applies inbound realtime events to the memory store.

use crate::registry::ActiveSelection;
use crate::store::MemoryStore;
use crate::types::ApplyOutcome;
use keepsake_protocol::{RealtimeAction, RealtimeEvent, UserId};
use log::{debug, warn};

#[derive(Clone)]
pub struct SyncReconciler {
    store: MemoryStore,
    selection: ActiveSelection,
    local_user_id: UserId,
}

impl SyncReconciler {
    pub fn new(store: MemoryStore, selection: ActiveSelection, local_user_id: UserId) -> Self {
        Self {
            store,
            selection,
            local_user_id,
        }
    }

    /// Apply one realtime event.
    ///
    /// Events originating from the local user are ignored. Creates are
    /// idempotent and reach the active view only when their connection is
    /// selected at apply time; updates and deletes of unknown ids are no-ops.
    pub fn apply_realtime_event(&self, event: &RealtimeEvent) -> ApplyOutcome {
        if event.origin_user_id == self.local_user_id {
            debug!(
                "ignoring own realtime event (connection_id={}, memory_id={})",
                event.connection_id, event.memory_id
            );
            return ApplyOutcome::Ignored;
        }

        let outcome = match event.action {
            RealtimeAction::Create | RealtimeAction::Update => {
                let Some(mut memory) = event.memory.clone() else {
                    warn!(
                        "realtime event without record (action={:?}, memory_id={})",
                        event.action, event.memory_id
                    );
                    return ApplyOutcome::Missing;
                };
                memory.connection_id = event.connection_id.clone();
                if event.action == RealtimeAction::Create {
                    let into_active = self.selection.is(&event.connection_id);
                    self.store.insert_remote(memory, into_active)
                } else {
                    self.store.replace_memory(&memory)
                }
            }
            RealtimeAction::Delete => {
                match self
                    .store
                    .remove_memory(&event.connection_id, &event.memory_id)
                {
                    Some(from_view) => ApplyOutcome::Removed { from_view },
                    None => ApplyOutcome::Missing,
                }
            }
        };
        debug!(
            "realtime event applied (action={:?}, connection_id={}, memory_id={}, outcome={:?})",
            event.action, event.connection_id, event.memory_id, outcome
        );
        outcome
    }
}
