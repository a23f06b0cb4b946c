//! Connections, roles, and presence.

use crate::{ConnectionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The two paired roles. A connection always joins one of each.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Keeper,
    Teller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Keeper => "keeper",
            Role::Teller => "teller",
        }
    }

    /// The role on the other side of a connection.
    pub fn partner(self) -> Role {
        match self {
            Role::Keeper => Role::Teller,
            Role::Teller => Role::Keeper,
        }
    }

    /// User id holding this role in the connection.
    pub fn own_user_id(self, connection: &Connection) -> &str {
        match self {
            Role::Keeper => &connection.keeper_id,
            Role::Teller => &connection.teller_id,
        }
    }

    /// User id holding the opposite role in the connection.
    pub fn partner_user_id(self, connection: &Connection) -> &str {
        self.partner().own_user_id(connection)
    }

    /// True when `user_id` participates in the connection under this role.
    pub fn owns(self, connection: &Connection, user_id: &str) -> bool {
        self.own_user_id(connection) == user_id
    }
}

/// Whether the invitation behind a connection has been accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Pending,
    Active,
}

/// Snapshot of the partner's public profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PartnerProfile {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A pairing between a keeper and a teller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub keeper_id: UserId,
    pub teller_id: UserId,
    #[serde(default)]
    pub partner: PartnerProfile,
    #[serde(default)]
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }
}

/// Ephemeral presence of one participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceState {
    pub user_id: UserId,
    pub last_seen_at: DateTime<Utc>,
    pub online: bool,
}

/// Full presence snapshot keyed by user id.
pub type PresenceMap = HashMap<UserId, PresenceState>;

/// Profile fields the local user may change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn connection() -> Connection {
        Connection {
            id: "c1".to_string(),
            keeper_id: "kate".to_string(),
            teller_id: "tom".to_string(),
            partner: PartnerProfile::default(),
            status: ConnectionStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn role_accessors_resolve_both_sides() {
        let connection = connection();
        assert_eq!(Role::Keeper.own_user_id(&connection), "kate");
        assert_eq!(Role::Keeper.partner_user_id(&connection), "tom");
        assert_eq!(Role::Teller.own_user_id(&connection), "tom");
        assert!(Role::Teller.owns(&connection, "tom"));
        assert!(!Role::Keeper.owns(&connection, "tom"));
        assert_eq!(Role::Teller.partner(), Role::Keeper);
    }
}
