//! Mutations held in the offline queue.

use crate::connection::ProfileUpdate;
use crate::memory::{MemoryPatch, NewMemory};
use crate::{ConnectionId, MemoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Discriminant of a queued mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateMemory,
    UpdateMemory,
    DeleteMemory,
    UpdateProfile,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateMemory => "create_memory",
            OperationKind::UpdateMemory => "update_memory",
            OperationKind::DeleteMemory => "delete_memory",
            OperationKind::UpdateProfile => "update_profile",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation payload waiting to be sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum QueuedOperation {
    CreateMemory {
        memory: NewMemory,
    },
    UpdateMemory {
        connection_id: ConnectionId,
        memory_id: MemoryId,
        patch: MemoryPatch,
    },
    DeleteMemory {
        connection_id: ConnectionId,
        memory_id: MemoryId,
    },
    UpdateProfile {
        profile: ProfileUpdate,
    },
}

impl QueuedOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            QueuedOperation::CreateMemory { .. } => OperationKind::CreateMemory,
            QueuedOperation::UpdateMemory { .. } => OperationKind::UpdateMemory,
            QueuedOperation::DeleteMemory { .. } => OperationKind::DeleteMemory,
            QueuedOperation::UpdateProfile { .. } => OperationKind::UpdateProfile,
        }
    }

    /// Connection the mutation targets, if it targets one.
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            QueuedOperation::CreateMemory { memory } => Some(&memory.connection_id),
            QueuedOperation::UpdateMemory { connection_id, .. }
            | QueuedOperation::DeleteMemory { connection_id, .. } => Some(connection_id),
            QueuedOperation::UpdateProfile { .. } => None,
        }
    }
}

/// A queued mutation with its retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingOperation {
    pub id: Uuid,
    pub operation: QueuedOperation,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(operation: QueuedOperation) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use pretty_assertions::assert_eq;

    #[test]
    fn pending_operation_survives_json() {
        let op = PendingOperation::new(QueuedOperation::CreateMemory {
            memory: NewMemory::text("c1", Role::Teller, "offline note"),
        });
        let encoded = serde_json::to_string(&op).expect("serialize");
        let decoded: PendingOperation = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, op);
        assert_eq!(decoded.kind(), OperationKind::CreateMemory);
        assert_eq!(decoded.operation.connection_id(), Some("c1"));
    }

    #[test]
    fn profile_updates_have_no_connection() {
        let op = QueuedOperation::UpdateProfile {
            profile: ProfileUpdate::default(),
        };
        assert_eq!(op.connection_id(), None);
        assert_eq!(op.kind().to_string(), "update_profile");
    }
}
