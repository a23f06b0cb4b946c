//! Shared data model, realtime event shapes, and collaborator interfaces for Keepsake.

mod backend;
mod connection;
mod memory;
mod notification;
mod operation;
mod realtime;

pub use backend::{
    BackendError, MemoryEnricher, NotificationService, PersistenceBackend, RealtimeChannel,
};
pub use connection::{
    Connection, ConnectionStatus, PartnerProfile, PresenceMap, PresenceState, ProfileUpdate, Role,
};
pub use memory::{
    Memory, MemoryKind, MemoryMedia, MemoryMetadata, MemoryPatch, NewMemory,
    PROVISIONAL_ID_PREFIX, ValidationError, normalize_tags,
};
pub use notification::{
    NotificationAction, NotificationKind, NotificationPreferences, NotificationRequest,
    NotificationSurface,
};
pub use operation::{OperationKind, PendingOperation, QueuedOperation};
pub use realtime::{ChannelParams, RealtimeAction, RealtimeEvent};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a connection between a keeper and a teller.
pub type ConnectionId = String;
/// Identifier of a memory record.
pub type MemoryId = String;
/// Identifier of a user account.
pub type UserId = String;

/// Wrapper for events emitted to UI consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMsg {
    /// Unique id for the event.
    pub id: Uuid,
    /// Timestamp when the event was created.
    pub created_at: DateTime<Utc>,
    /// Event payload content.
    pub payload: EventPayload,
}

impl EventMsg {
    /// Wrap a payload with a fresh id and timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            payload,
        }
    }
}

/// All events emitted by the synchronization engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum EventPayload {
    /// The active view now shows a different list.
    ActiveViewChanged {
        connection_id: ConnectionId,
        count: usize,
    },
    /// Connectivity flipped.
    ConnectivityChanged { online: bool },
    /// A mutation could not be sent and was queued.
    OperationQueued {
        operation_id: Uuid,
        kind: OperationKind,
    },
    /// An auto-sync pass over the offline queue completed.
    QueueSynced {
        processed: usize,
        failed: usize,
        remaining: usize,
    },
    /// A queued operation hit the retry cap and was dropped.
    QueueOperationFailed {
        operation_id: Uuid,
        kind: OperationKind,
        retry_count: u32,
        error: Option<String>,
    },
    /// In-app toast for a newly arrived memory.
    Notification { request: NotificationRequest },
    /// Plain informational or error toast.
    Toast { level: ToastLevel, message: String },
    /// Credentials were rejected; the user must sign in again.
    AuthRequired { message: String },
    /// Presence snapshot changed for the active connection.
    PresenceChanged {
        connection_id: ConnectionId,
        online: Vec<UserId>,
    },
}

/// Severity of a toast message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

/// Sink interface for engine events.
pub trait EventSink: Send + Sync {
    /// Emit an event to downstream listeners.
    fn emit(&self, event: EventMsg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn event_payload_uses_tagged_layout() {
        let payload = EventPayload::QueueSynced {
            processed: 3,
            failed: 0,
            remaining: 0,
        };
        let encoded = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(
            encoded,
            json!({
                "type": "queue_synced",
                "payload": { "processed": 3, "failed": 0, "remaining": 0 }
            })
        );
    }
}
