//! Configuration schema for Keepsake.

use keepsake_protocol::MemoryKind;
use serde::{Deserialize, Serialize};

/// Root config for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeepsakeConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl KeepsakeConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> KeepsakeConfigBuilder {
        KeepsakeConfigBuilder::new()
    }
}

/// Builder for assembling a `KeepsakeConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct KeepsakeConfigBuilder {
    config: KeepsakeConfig,
}

impl KeepsakeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: KeepsakeConfig::default(),
        }
    }

    /// Replace the refresh and realtime settings.
    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    /// Replace the offline queue settings.
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.config.queue = queue;
        self
    }

    /// Replace the notification settings.
    pub fn notifications(mut self, notifications: NotificationsConfig) -> Self {
        self.config.notifications = notifications;
        self
    }

    /// Replace the local state settings.
    pub fn state(mut self, state: StateConfig) -> Self {
        self.config.state = state;
        self
    }

    pub fn build(self) -> KeepsakeConfig {
        self.config
    }
}

/// Refresh cadence and realtime buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between full refreshes of the active connection.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Seconds between unread badge refreshes.
    #[serde(default = "default_unread_refresh_interval_secs")]
    pub unread_refresh_interval_secs: u64,
    /// Buffer size of the engine event bus.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            unread_refresh_interval_secs: default_unread_refresh_interval_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    120
}

fn default_unread_refresh_interval_secs() -> u64 {
    300
}

fn default_event_buffer() -> usize {
    256
}

/// Offline queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Failed attempts after which an operation is dropped and reported.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

/// Upper bound for `recency_window_ms` and `throttle_ms` (one week).
pub const MAX_NOTIFICATION_WINDOW_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Notification derivation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Records older than this are treated as reload artifacts, not arrivals.
    #[serde(default = "default_recency_window_ms")]
    pub recency_window_ms: u64,
    /// Minimum gap between two dispatched notifications.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default = "default_notifiable_kinds")]
    pub notifiable_kinds: Vec<MemoryKind>,
    /// Maximum characters of content shown in the body.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_voice_placeholder")]
    pub voice_placeholder: String,
    #[serde(default = "default_true")]
    pub sound: bool,
    #[serde(default = "default_true")]
    pub vibrate: bool,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recency_window_ms: default_recency_window_ms(),
            throttle_ms: default_throttle_ms(),
            notifiable_kinds: default_notifiable_kinds(),
            preview_chars: default_preview_chars(),
            voice_placeholder: default_voice_placeholder(),
            sound: true,
            vibrate: true,
            icon: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_recency_window_ms() -> u64 {
    10_000
}

fn default_throttle_ms() -> u64 {
    1_000
}

fn default_notifiable_kinds() -> Vec<MemoryKind> {
    vec![MemoryKind::Text, MemoryKind::Voice]
}

fn default_preview_chars() -> usize {
    100
}

fn default_voice_placeholder() -> String {
    "Voice memory".to_string()
}

/// Location of the per-user local state documents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateConfig {
    /// Directory override; defaults to `~/.keepsake/state`.
    #[serde(default)]
    pub path: Option<String>,
}
