//! Known connections, the active selection, and read state.

use crate::error::SyncError;
use crate::state::{LocalState, LocalStateStore};
use crate::store::MemoryStore;
use crate::types::{LoadReport, LocalUser, MessagePreview};
use chrono::{DateTime, Utc};
use keepsake_protocol::{Connection, ConnectionId, PersistenceBackend};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Shared handle to the id of the selected connection.
#[derive(Clone, Debug, Default)]
pub struct ActiveSelection {
    inner: Arc<RwLock<Option<ConnectionId>>>,
}

impl ActiveSelection {
    pub fn get(&self) -> Option<ConnectionId> {
        self.inner.read().clone()
    }

    /// Whether `connection_id` is the selected connection right now.
    pub fn is(&self, connection_id: &str) -> bool {
        self.inner.read().as_deref() == Some(connection_id)
    }

    pub(crate) fn set(&self, connection_id: Option<ConnectionId>) {
        *self.inner.write() = connection_id;
    }
}

/// Tracks the user's connections and which one is active.
pub struct ConnectionRegistry {
    user: LocalUser,
    backend: Arc<dyn PersistenceBackend>,
    store: MemoryStore,
    state_store: Arc<dyn LocalStateStore>,
    selection: ActiveSelection,
    connections: RwLock<Vec<Connection>>,
}

impl ConnectionRegistry {
    pub fn new(
        user: LocalUser,
        backend: Arc<dyn PersistenceBackend>,
        store: MemoryStore,
        state_store: Arc<dyn LocalStateStore>,
        selection: ActiveSelection,
    ) -> Self {
        Self {
            user,
            backend,
            store,
            state_store,
            selection,
            connections: RwLock::new(Vec::new()),
        }
    }

    /// Fetch connections and keep the ones the user holds in its own role.
    pub async fn refresh_connections(&self) -> Result<Vec<Connection>, SyncError> {
        let fetched = self.backend.get_connections().await?;
        let total = fetched.len();
        let own = self.user.own_connections(fetched);
        info!(
            "connections refreshed (user_id={}, own={}, fetched={})",
            self.user.user_id,
            own.len(),
            total
        );
        *self.connections.write() = own.clone();
        Ok(own)
    }

    /// Connections from the last refresh, in backend order.
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.read().clone()
    }

    /// Look up a known connection by id.
    pub fn connection(&self, connection_id: &str) -> Option<Connection> {
        self.connections
            .read()
            .iter()
            .find(|connection| connection.id == connection_id)
            .cloned()
    }

    /// Selection handle shared with realtime and notification handlers.
    pub fn selection(&self) -> &ActiveSelection {
        &self.selection
    }

    /// Id of the selected connection, known or not.
    pub fn active_connection_id(&self) -> Option<ConnectionId> {
        self.selection.get()
    }

    /// The selected connection, if it is still known.
    pub fn active_connection(&self) -> Option<Connection> {
        self.selection
            .get()
            .and_then(|connection_id| self.connection(&connection_id))
    }

    /// Make a connection active.
    ///
    /// Cached records are served as the active view immediately and the
    /// last-active id is persisted; the authoritative load runs in the
    /// background and its handle is returned.
    pub fn switch_active(
        &self,
        connection_id: &str,
    ) -> Result<JoinHandle<Result<LoadReport, SyncError>>, SyncError> {
        if self.connection(connection_id).is_none() {
            return Err(SyncError::UnknownConnection(connection_id.to_string()));
        }
        self.selection.set(Some(connection_id.to_string()));
        let served = self.store.serve_cached_as_active(connection_id);
        info!(
            "switched active connection (connection_id={}, cached={})",
            connection_id, served
        );

        let persisted = connection_id.to_string();
        if let Err(err) = self.state_store.update(
            &self.user.user_id,
            &mut |state: &mut LocalState| {
                state.last_active_connection = Some(persisted.clone())
            },
        ) {
            warn!(
                "failed to persist last active connection (connection_id={}): {}",
                connection_id, err
            );
        }

        let store = self.store.clone();
        let connection_id = connection_id.to_string();
        Ok(tokio::spawn(async move {
            store.load_connection(&connection_id, Some(true)).await
        }))
    }

    /// Pick the initial active connection and select it.
    pub fn restore_last_active(&self) -> Option<ConnectionId> {
        let last = match self.state_store.load(&self.user.user_id) {
            Ok(state) => state.last_active_connection,
            Err(err) => {
                warn!(
                    "failed to read last active connection (user_id={}): {}",
                    self.user.user_id, err
                );
                None
            }
        };
        let chosen = select_initial_connection(last.as_deref(), &self.connections.read());
        debug!(
            "restored active connection (persisted={:?}, chosen={:?})",
            last, chosen
        );
        self.selection.set(chosen.clone());
        chosen
    }

    /// Mark every record of a connection read, remotely then locally.
    pub async fn mark_read(&self, connection_id: &str) -> Result<usize, SyncError> {
        if self.connection(connection_id).is_none() {
            return Err(SyncError::UnknownConnection(connection_id.to_string()));
        }
        let remote = self.backend.mark_messages_as_read(connection_id).await?;
        let local = self.store.mark_read(connection_id, &self.user.user_id);
        let now = Utc::now();
        let key = connection_id.to_string();
        if let Err(err) = self.state_store.update(
            &self.user.user_id,
            &mut |state: &mut LocalState| {
                state.last_read.insert(key.clone(), now);
            },
        ) {
            warn!(
                "failed to persist read marker (connection_id={}): {}",
                connection_id, err
            );
        }
        info!(
            "connection marked read (connection_id={}, remote={}, local={})",
            connection_id, remote, local
        );
        Ok(local)
    }

    /// Records of the connection the user has not read yet.
    pub fn unread_count(&self, connection_id: &str) -> usize {
        self.store.unread_count(connection_id, &self.user)
    }

    /// Unread badge for every known connection.
    pub fn unread_counts(&self) -> BTreeMap<ConnectionId, usize> {
        self.connections
            .read()
            .iter()
            .map(|connection| {
                (
                    connection.id.clone(),
                    self.store.unread_count(&connection.id, &self.user),
                )
            })
            .collect()
    }

    /// Summary of the newest cached record of a connection.
    pub fn last_message_preview(&self, connection_id: &str) -> Option<MessagePreview> {
        self.store.last_message_preview(connection_id)
    }

    /// When the user last marked a connection read on this device.
    pub fn last_read_at(&self, connection_id: &str) -> Option<DateTime<Utc>> {
        self.state_store
            .load(&self.user.user_id)
            .ok()
            .and_then(|state| state.last_read.get(connection_id).copied())
    }

    /// Forget connections and the selection.
    pub fn clear(&self) {
        self.connections.write().clear();
        self.selection.set(None);
    }
}

/// Choose the connection to open first.
///
/// The persisted id wins while it is still an active connection; otherwise
/// the first active connection, then the first pending one.
pub fn select_initial_connection(
    last_active: Option<&str>,
    available: &[Connection],
) -> Option<ConnectionId> {
    if let Some(last) = last_active
        && available
            .iter()
            .any(|connection| connection.id == last && connection.is_active())
    {
        return Some(last.to_string());
    }
    available
        .iter()
        .find(|connection| connection.is_active())
        .or_else(|| available.first())
        .map(|connection| connection.id.clone())
}
