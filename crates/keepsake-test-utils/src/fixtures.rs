use chrono::{DateTime, Utc};
use keepsake_protocol::{
    Connection, ConnectionStatus, Memory, MemoryKind, MemoryMedia, MemoryMetadata, PartnerProfile,
    Role,
};
use std::collections::BTreeSet;

/// Active connection between `keeper_id` and `teller_id`, as seen by the teller.
pub fn active_connection(id: &str, keeper_id: &str, teller_id: &str) -> Connection {
    Connection {
        id: id.to_string(),
        keeper_id: keeper_id.to_string(),
        teller_id: teller_id.to_string(),
        partner: PartnerProfile {
            user_id: keeper_id.to_string(),
            display_name: format!("{keeper_id} (partner)"),
            avatar_url: None,
        },
        status: ConnectionStatus::Active,
        created_at: Utc::now(),
    }
}

pub fn pending_connection(id: &str, keeper_id: &str, teller_id: &str) -> Connection {
    Connection {
        status: ConnectionStatus::Pending,
        ..active_connection(id, keeper_id, teller_id)
    }
}

/// Text memory stamped with the current time.
pub fn memory(id: &str, connection_id: &str, sender: Role, content: &str) -> Memory {
    memory_at(id, connection_id, sender, content, Utc::now())
}

pub fn memory_at(
    id: &str,
    connection_id: &str,
    sender: Role,
    content: &str,
    timestamp: DateTime<Utc>,
) -> Memory {
    Memory {
        id: id.to_string(),
        connection_id: connection_id.to_string(),
        kind: MemoryKind::Text,
        sender,
        content: content.to_string(),
        timestamp,
        tags: Vec::new(),
        read_by: BTreeSet::new(),
        media: MemoryMedia::default(),
        metadata: MemoryMetadata::default(),
    }
}
