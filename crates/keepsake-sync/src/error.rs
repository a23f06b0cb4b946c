//! Error types for the sync crate.

use crate::state::StateError;
use keepsake_protocol::{BackendError, ConnectionId, ValidationError};
use thiserror::Error;

/// Errors returned by sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection id is not among the user's connections.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
    /// An operation needed an active connection and none is selected.
    #[error("no active connection")]
    NoActiveConnection,
    /// A collaborator call failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    /// The payload was rejected before reaching the backend.
    #[error("invalid memory: {0}")]
    Validation(#[from] ValidationError),
    /// Local persisted state could not be read or written.
    #[error("state error: {0}")]
    State(#[from] StateError),
    /// A background task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(String),
}

impl SyncError {
    /// The backend error behind this failure, if any.
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            SyncError::Backend(err) => Some(err),
            _ => None,
        }
    }

    /// Backend failure worth retrying later.
    pub fn is_transient(&self) -> bool {
        self.backend().is_some_and(BackendError::is_transient)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.backend().is_some_and(BackendError::is_unauthorized)
    }
}
