//! Notification requests produced for newly arrived memories.

use crate::{ConnectionId, MemoryId};
use serde::{Deserialize, Serialize};

/// Where a notification is surfaced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSurface {
    /// System banner, used when the user is not looking at the view.
    Native,
    /// Toast inside the app.
    InApp,
}

/// Classification of the record behind a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Prompt,
    Message,
}

/// What happens when the user clicks the notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NotificationAction {
    /// Return focus to the connection and mark it read.
    FocusConnection { connection_id: ConnectionId },
}

/// A notification ready to be displayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub surface: NotificationSurface,
    pub kind: NotificationKind,
    pub connection_id: ConnectionId,
    pub memory_id: MemoryId,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub action: NotificationAction,
}

/// User-level notification preferences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub sound: bool,
    pub vibrate: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: true,
            vibrate: true,
        }
    }
}
