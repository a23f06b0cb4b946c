//! Interfaces of the external collaborators the engine consumes.

use crate::connection::{Connection, PresenceMap, ProfileUpdate};
use crate::memory::{Memory, MemoryPatch, NewMemory};
use crate::notification::{NotificationPreferences, NotificationRequest};
use crate::realtime::{ChannelParams, RealtimeEvent};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The request never reached the service.
    #[error("network unavailable: {0}")]
    Network(String),
    /// Credentials expired or were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Target record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The service refused the payload.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The service failed while handling the request.
    #[error("backend error: {0}")]
    Server(String),
}

impl BackendError {
    /// Failures worth retrying later from the offline queue.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Network(_) | BackendError::Server(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Unauthorized(_))
    }
}

/// Request/response API holding the authoritative records.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// List connections visible to the signed-in user.
    async fn get_connections(&self) -> Result<Vec<Connection>, BackendError>;

    /// Fetch every memory of a connection in display order.
    async fn get_memories(&self, connection_id: &str) -> Result<Vec<Memory>, BackendError>;

    /// Create a memory; the backend assigns id and timestamp.
    async fn create_memory(&self, memory: &NewMemory) -> Result<Memory, BackendError>;

    /// Apply a partial update and return the stored record.
    async fn update_memory(
        &self,
        memory_id: &str,
        patch: &MemoryPatch,
    ) -> Result<Memory, BackendError>;

    async fn delete_memory(&self, memory_id: &str) -> Result<(), BackendError>;

    /// Mark every unread record of the connection read; returns the count updated.
    async fn mark_messages_as_read(&self, connection_id: &str) -> Result<usize, BackendError>;

    async fn update_profile(&self, profile: &ProfileUpdate) -> Result<(), BackendError>;
}

/// Pub/sub transport joining the clients of one connection.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn connect(&self, params: &ChannelParams) -> Result<(), BackendError>;

    /// Receive full presence snapshots.
    fn subscribe_presence(&self) -> broadcast::Receiver<PresenceMap>;

    /// Receive memory mutations broadcast by other clients.
    fn subscribe_memory_updates(&self) -> broadcast::Receiver<RealtimeEvent>;

    async fn broadcast_memory_update(&self, event: &RealtimeEvent) -> Result<(), BackendError>;

    async fn disconnect(&self) -> Result<(), BackendError>;
}

/// Native notification plumbing.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn is_subscribed(&self) -> Result<bool, BackendError>;

    async fn set_subscribed(&self, subscribed: bool) -> Result<(), BackendError>;

    async fn preferences(&self) -> Result<NotificationPreferences, BackendError>;

    async fn set_preferences(&self, preferences: &NotificationPreferences)
    -> Result<(), BackendError>;

    /// Display a system banner.
    async fn show_banner(&self, request: &NotificationRequest) -> Result<(), BackendError>;

    /// Play the arrival cue.
    async fn play_cue(&self, sound: bool, vibrate: bool) -> Result<(), BackendError>;
}

/// Auxiliary enrichment (auto-tagging, transcription) run after a create.
#[async_trait]
pub trait MemoryEnricher: Send + Sync {
    /// Return fields to merge into the memory, or `None` when nothing applies.
    async fn enrich(&self, memory: &Memory) -> Result<Option<MemoryPatch>, BackendError>;
}
