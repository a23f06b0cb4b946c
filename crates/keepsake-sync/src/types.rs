//! Shared value types for the sync engine.

use chrono::{DateTime, Utc};
use keepsake_protocol::{
    ChannelParams, Connection, ConnectionId, MemoryId, MemoryKind, PendingOperation, Role, UserId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The signed-in user a session runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
}

impl LocalUser {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            role,
        }
    }

    /// Keep only connections where this user holds its own role.
    pub fn own_connections(&self, connections: Vec<Connection>) -> Vec<Connection> {
        connections
            .into_iter()
            .filter(|connection| self.role.owns(connection, &self.user_id))
            .collect()
    }

    /// Partner user id in one of this user's connections.
    pub fn partner_id<'a>(&self, connection: &'a Connection) -> &'a str {
        self.role.partner_user_id(connection)
    }

    /// Join parameters for the channel of `connection_id`.
    pub fn channel_params(&self, connection_id: &str) -> ChannelParams {
        ChannelParams {
            connection_id: connection_id.to_string(),
            user_id: self.user_id.clone(),
            user_name: self.display_name.clone(),
        }
    }
}

/// Result of a mutation that may have been deferred to the offline queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// The backend accepted the mutation.
    Confirmed(T),
    /// The mutation was queued under this operation id.
    Queued(Uuid),
}

impl<T> Delivery<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::Queued(_))
    }

    /// The backend result, or `None` when the operation was queued.
    pub fn confirmed(self) -> Option<T> {
        match self {
            Delivery::Confirmed(value) => Some(value),
            Delivery::Queued(_) => None,
        }
    }
}

/// What a completed `load_connection` changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub connection_id: ConnectionId,
    /// Records now cached for the connection.
    pub count: usize,
    /// Whether the active view was replaced.
    pub view_updated: bool,
}

/// Effect of applying one realtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event originated from the local user.
    Ignored,
    /// The record was already present.
    Duplicate,
    Inserted {
        into_view: bool,
    },
    Updated {
        in_view: bool,
    },
    Removed {
        from_view: bool,
    },
    /// Update or delete for a record this client does not hold.
    Missing,
}

impl ApplyOutcome {
    /// Whether the active view changed.
    pub fn touched_view(self) -> bool {
        matches!(
            self,
            ApplyOutcome::Inserted { into_view: true }
                | ApplyOutcome::Updated { in_view: true }
                | ApplyOutcome::Removed { from_view: true }
        )
    }
}

/// Most recent conversational record of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub memory_id: MemoryId,
    pub kind: MemoryKind,
    pub sender: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of the offline queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub depth: usize,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    pub max_retry_count: u32,
    pub processing: bool,
}

/// Outcome of one pass over the offline queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// Operations delivered and removed.
    pub processed: usize,
    /// Failed attempts, including ones that exhausted their retries.
    pub failed: usize,
    /// Operations dropped after reaching the retry cap.
    pub exhausted: Vec<PendingOperation>,
    /// Operations still queued after the pass.
    pub remaining: usize,
}

impl QueueReport {
    pub fn attempted(&self) -> usize {
        self.processed + self.failed
    }
}
