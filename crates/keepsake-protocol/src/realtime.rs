//! Realtime push channel event shapes.

use crate::memory::Memory;
use crate::{ConnectionId, MemoryId, UserId};
use serde::{Deserialize, Serialize};

/// Mutation carried by a realtime event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeAction {
    Create,
    Update,
    Delete,
}

/// Memory mutation broadcast between clients of one connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RealtimeEvent {
    pub action: RealtimeAction,
    pub connection_id: ConnectionId,
    pub memory_id: MemoryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
    /// User whose client originated the mutation.
    #[serde(rename = "user_id")]
    pub origin_user_id: UserId,
}

impl RealtimeEvent {
    pub fn create(memory: Memory, origin_user_id: impl Into<UserId>) -> Self {
        Self::with_memory(RealtimeAction::Create, memory, origin_user_id.into())
    }

    pub fn update(memory: Memory, origin_user_id: impl Into<UserId>) -> Self {
        Self::with_memory(RealtimeAction::Update, memory, origin_user_id.into())
    }

    pub fn delete(
        connection_id: impl Into<ConnectionId>,
        memory_id: impl Into<MemoryId>,
        origin_user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            action: RealtimeAction::Delete,
            connection_id: connection_id.into(),
            memory_id: memory_id.into(),
            memory: None,
            origin_user_id: origin_user_id.into(),
        }
    }

    fn with_memory(action: RealtimeAction, memory: Memory, origin_user_id: UserId) -> Self {
        Self {
            action,
            connection_id: memory.connection_id.clone(),
            memory_id: memory.id.clone(),
            memory: Some(memory),
            origin_user_id,
        }
    }
}

/// Parameters for joining the realtime channel of a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelParams {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub user_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewMemory, Role};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[test]
    fn origin_user_travels_as_user_id() {
        let memory = NewMemory::text("c1", Role::Keeper, "hi").into_memory("m1".into(), Utc::now());
        let event = RealtimeEvent::create(memory, "kate");
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["user_id"], "kate");
        assert_eq!(value["action"], "create");
        assert_eq!(value["memory_id"], "m1");

        let decoded: RealtimeEvent = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, event);
    }
}
