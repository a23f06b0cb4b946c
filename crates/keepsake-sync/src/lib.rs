//! Client-side synchronization core for Keepsake.
//!
//! This crate owns the per-connection memory caches and the active view, the
//! realtime reconciler, the durable offline queue, notification derivation,
//! the connection registry, and the `SyncSession` that wires them together
//! for one signed-in user.

pub mod connectivity;
pub mod error;
pub mod notify;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod state;
pub mod store;
pub mod subscription;
pub mod types;

pub use connectivity::Connectivity;
pub use error::SyncError;
pub use notify::NotificationDispatcher;
pub use queue::{OfflineQueue, OperationHandler};
pub use reconciler::SyncReconciler;
pub use registry::{ActiveSelection, ConnectionRegistry, select_initial_connection};
pub use session::{SyncSession, SyncSessionBuilder};
pub use state::{JsonStateStore, LocalState, LocalStateStore, MemoryStateStore, StateError};
pub use store::MemoryStore;
pub use subscription::Subscription;
pub use types::{
    ApplyOutcome, Delivery, LoadReport, LocalUser, MessagePreview, QueueReport, QueueStats,
};
