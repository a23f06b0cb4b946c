//! Per-connection memory caches and the single active view.

use crate::error::SyncError;
use crate::registry::ActiveSelection;
use crate::types::{ApplyOutcome, LoadReport, LocalUser, MessagePreview};
use chrono::Utc;
use keepsake_protocol::{
    ConnectionId, Memory, MemoryKind, MemoryPatch, NewMemory, PROVISIONAL_ID_PREFIX,
    PersistenceBackend,
};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    caches: HashMap<ConnectionId, Vec<Memory>>,
    view: ActiveView,
}

/// The list currently shown to the user and the connection it belongs to.
#[derive(Default)]
struct ActiveView {
    connection_id: Option<ConnectionId>,
    memories: Vec<Memory>,
}

impl ActiveView {
    fn belongs_to(&self, connection_id: &str) -> bool {
        self.connection_id.as_deref() == Some(connection_id)
    }
}

/// Owner of all cached memory records.
///
/// Locks are never held across an await; backend calls happen between short
/// critical sections.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    backend: Arc<dyn PersistenceBackend>,
    selection: ActiveSelection,
}

impl MemoryStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>, selection: ActiveSelection) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            backend,
            selection,
        }
    }

    /// Fetch the authoritative records of a connection and replace its cache.
    ///
    /// `as_active` decides whether the active view is replaced too; `None`
    /// resolves to "this is the selected connection" at call time. The view is
    /// never replaced once it belongs to another connection.
    pub async fn load_connection(
        &self,
        connection_id: &str,
        as_active: Option<bool>,
    ) -> Result<LoadReport, SyncError> {
        let as_active = as_active.unwrap_or_else(|| self.selection.is(connection_id));
        debug!(
            "loading connection (connection_id={}, as_active={})",
            connection_id, as_active
        );
        let fetched = self
            .backend
            .get_memories(connection_id)
            .await
            .inspect_err(|err| {
                warn!("load failed (connection_id={}): {}", connection_id, err);
            })?;

        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut records = dedupe_by_id(fetched);
        let fetched_ids: HashSet<&str> = records.iter().map(|m| m.id.as_str()).collect();
        let provisional: Vec<Memory> = state
            .caches
            .get(connection_id)
            .map(|cache| {
                cache
                    .iter()
                    .filter(|m| m.is_provisional() && !fetched_ids.contains(m.id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.extend(provisional);

        let view_owned = state
            .view
            .connection_id
            .as_deref()
            .is_none_or(|owner| owner == connection_id);
        let selection_matches = self
            .selection
            .get()
            .is_none_or(|selected| selected == connection_id);
        let view_updated = as_active && view_owned && selection_matches;
        if view_updated {
            state.view.connection_id = Some(connection_id.to_string());
            state.view.memories = records.clone();
        } else if as_active {
            debug!(
                "stale load left active view alone (connection_id={})",
                connection_id
            );
        }

        let count = records.len();
        state.caches.insert(connection_id.to_string(), records);
        info!(
            "connection loaded (connection_id={}, count={}, view_updated={})",
            connection_id, count, view_updated
        );
        Ok(LoadReport {
            connection_id: connection_id.to_string(),
            count,
            view_updated,
        })
    }

    /// Records to display for the active connection.
    ///
    /// The view wins while it holds at least as many records as the cache;
    /// otherwise the cache is returned.
    pub fn active_view(&self) -> Vec<Memory> {
        let state = self.state.read();
        let Some(connection_id) = &state.view.connection_id else {
            return Vec::new();
        };
        match state.caches.get(connection_id) {
            Some(cache) if state.view.memories.len() < cache.len() => cache.clone(),
            _ => state.view.memories.clone(),
        }
    }

    /// Connection the active view currently belongs to.
    pub fn view_connection(&self) -> Option<ConnectionId> {
        self.state.read().view.connection_id.clone()
    }

    /// Show whatever is cached for a connection right away.
    pub fn serve_cached_as_active(&self, connection_id: &str) -> usize {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let cached = state
            .caches
            .get(connection_id)
            .cloned()
            .unwrap_or_default();
        let count = cached.len();
        state.view.connection_id = Some(connection_id.to_string());
        state.view.memories = cached;
        debug!(
            "serving cached view (connection_id={}, count={})",
            connection_id, count
        );
        count
    }

    /// Create a record optimistically.
    ///
    /// A provisional record is shown at once and replaced in place by the
    /// server record on success, or removed on failure.
    pub async fn create_optimistic(&self, new_memory: NewMemory) -> Result<Memory, SyncError> {
        new_memory.validate()?;
        let connection_id = new_memory.connection_id.clone();
        let provisional_id = format!("{PROVISIONAL_ID_PREFIX}{}", Uuid::new_v4());
        let provisional = new_memory
            .clone()
            .into_memory(provisional_id.clone(), Utc::now());
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            state
                .caches
                .entry(connection_id.clone())
                .or_default()
                .push(provisional.clone());
            if state.view.belongs_to(&connection_id) {
                state.view.memories.push(provisional);
            }
        }
        debug!(
            "provisional record inserted (connection_id={}, memory_id={})",
            connection_id, provisional_id
        );

        match self.backend.create_memory(&new_memory).await {
            Ok(confirmed) => {
                let mut guard = self.state.write();
                let state = &mut *guard;
                if let Some(cache) = state.caches.get_mut(&connection_id) {
                    confirm_provisional(cache, &provisional_id, &confirmed);
                }
                if state.view.belongs_to(&connection_id) {
                    confirm_provisional(&mut state.view.memories, &provisional_id, &confirmed);
                }
                info!(
                    "memory created (connection_id={}, memory_id={})",
                    connection_id, confirmed.id
                );
                Ok(confirmed)
            }
            Err(err) => {
                warn!(
                    "create failed, rolling back (connection_id={}, memory_id={}): {}",
                    connection_id, provisional_id, err
                );
                self.remove_memory(&connection_id, &provisional_id);
                Err(err.into())
            }
        }
    }

    /// Update a record through the backend and apply the stored result.
    pub async fn update_memory(
        &self,
        memory_id: &str,
        patch: &MemoryPatch,
    ) -> Result<Memory, SyncError> {
        let updated = self.backend.update_memory(memory_id, patch).await?;
        self.replace_memory(&updated);
        Ok(updated)
    }

    /// Delete a record through the backend, then drop it locally.
    pub async fn delete_memory(
        &self,
        connection_id: &str,
        memory_id: &str,
    ) -> Result<(), SyncError> {
        self.backend.delete_memory(memory_id).await?;
        self.remove_memory(connection_id, memory_id);
        Ok(())
    }

    /// Merge a patch locally without contacting the backend.
    pub fn apply_local_patch(
        &self,
        connection_id: &str,
        memory_id: &str,
        patch: &MemoryPatch,
    ) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut found = false;
        if let Some(memory) = state
            .caches
            .get_mut(connection_id)
            .and_then(|cache| cache.iter_mut().find(|m| m.id == memory_id))
        {
            memory.apply_patch(patch);
            found = true;
        }
        if state.view.belongs_to(connection_id)
            && let Some(memory) = state.view.memories.iter_mut().find(|m| m.id == memory_id)
        {
            memory.apply_patch(patch);
            found = true;
        }
        found
    }

    /// Drop a record locally without contacting the backend.
    pub fn remove_local(&self, connection_id: &str, memory_id: &str) -> bool {
        self.remove_memory(connection_id, memory_id).is_some()
    }

    /// Add a record pushed by another client, deduplicating by id.
    pub(crate) fn insert_remote(&self, memory: Memory, into_active: bool) -> ApplyOutcome {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let cache = state.caches.entry(memory.connection_id.clone()).or_default();
        let in_cache = cache.iter().any(|m| m.id == memory.id);
        if !in_cache {
            cache.push(memory.clone());
        }
        let mut into_view = false;
        if into_active
            && state.view.belongs_to(&memory.connection_id)
            && !state.view.memories.iter().any(|m| m.id == memory.id)
        {
            state.view.memories.push(memory);
            into_view = true;
        }
        if in_cache && !into_view {
            ApplyOutcome::Duplicate
        } else {
            ApplyOutcome::Inserted { into_view }
        }
    }

    /// Replace a record by id in its cache and, when present, the view.
    pub(crate) fn replace_memory(&self, memory: &Memory) -> ApplyOutcome {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let in_cache = state
            .caches
            .get_mut(&memory.connection_id)
            .and_then(|cache| cache.iter_mut().find(|m| m.id == memory.id))
            .map(|slot| *slot = memory.clone())
            .is_some();
        let in_view = state.view.belongs_to(&memory.connection_id)
            && state
                .view
                .memories
                .iter_mut()
                .find(|m| m.id == memory.id)
                .map(|slot| *slot = memory.clone())
                .is_some();
        if in_cache || in_view {
            ApplyOutcome::Updated { in_view }
        } else {
            ApplyOutcome::Missing
        }
    }

    /// Remove a record by id; returns whether it was in the view, if found at all.
    pub(crate) fn remove_memory(&self, connection_id: &str, memory_id: &str) -> Option<bool> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let in_cache = state
            .caches
            .get_mut(connection_id)
            .map(|cache| remove_by_id(cache, memory_id))
            .unwrap_or(false);
        let in_view = state.view.belongs_to(connection_id)
            && remove_by_id(&mut state.view.memories, memory_id);
        (in_cache || in_view).then_some(in_view)
    }

    /// Add `user_id` to `read_by` of every record; returns how many changed.
    pub fn mark_read(&self, connection_id: &str, user_id: &str) -> usize {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut marked = 0;
        if let Some(cache) = state.caches.get_mut(connection_id) {
            for memory in cache.iter_mut() {
                if memory.read_by.insert(user_id.to_string()) {
                    marked += 1;
                }
            }
        }
        if state.view.belongs_to(connection_id) {
            for memory in state.view.memories.iter_mut() {
                memory.read_by.insert(user_id.to_string());
            }
        }
        marked
    }

    /// Records sent by the partner that the user has not read.
    pub fn unread_count(&self, connection_id: &str, user: &LocalUser) -> usize {
        self.state
            .read()
            .caches
            .get(connection_id)
            .map(|cache| {
                cache
                    .iter()
                    .filter(|m| m.sender != user.role && !m.is_read_by(&user.user_id))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Most recent text or voice record of a connection.
    pub fn last_message_preview(&self, connection_id: &str) -> Option<MessagePreview> {
        let state = self.state.read();
        let memory = state
            .caches
            .get(connection_id)?
            .iter()
            .filter(|m| m.kind.is_conversational())
            .max_by_key(|m| m.timestamp)?;
        let text = match memory.kind {
            MemoryKind::Voice => memory
                .metadata
                .transcript
                .clone()
                .unwrap_or_else(|| memory.content.clone()),
            _ => memory.content.clone(),
        };
        Some(MessagePreview {
            memory_id: memory.id.clone(),
            kind: memory.kind,
            sender: memory.sender,
            text,
            timestamp: memory.timestamp,
        })
    }

    /// Snapshot of a connection's cache.
    pub fn cached(&self, connection_id: &str) -> Vec<Memory> {
        self.state
            .read()
            .caches
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every cache and the active view.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.caches.clear();
        state.view = ActiveView::default();
        info!("memory store cleared");
    }
}

/// Swap a provisional record for its confirmed version at the same position.
///
/// When the confirmed id is already present the provisional entry is dropped.
fn confirm_provisional(list: &mut Vec<Memory>, provisional_id: &str, confirmed: &Memory) {
    let already_present = list.iter().any(|m| m.id == confirmed.id);
    match list.iter().position(|m| m.id == provisional_id) {
        Some(idx) if already_present => {
            list.remove(idx);
        }
        Some(idx) => list[idx] = confirmed.clone(),
        None if !already_present => list.push(confirmed.clone()),
        None => {}
    }
}

fn remove_by_id(list: &mut Vec<Memory>, memory_id: &str) -> bool {
    let before = list.len();
    list.retain(|m| m.id != memory_id);
    list.len() != before
}

fn dedupe_by_id(records: Vec<Memory>) -> Vec<Memory> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_protocol::{BackendError, Role};
    use keepsake_test_utils::{InMemoryBackend, memory};
    use pretty_assertions::assert_eq;

    fn ids(records: &[Memory]) -> Vec<String> {
        records.iter().map(|m| m.id.clone()).collect()
    }

    fn store_with(backend: Arc<InMemoryBackend>) -> (MemoryStore, ActiveSelection) {
        let selection = ActiveSelection::default();
        (MemoryStore::new(backend, selection.clone()), selection)
    }

    #[tokio::test]
    async fn load_replaces_cache_and_view_for_selected_connection() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed(vec![
            memory("m1", "c1", Role::Keeper, "one"),
            memory("m2", "c1", Role::Teller, "two"),
        ]);
        let (store, selection) = store_with(backend);
        selection.set(Some("c1".to_string()));

        let report = store.load_connection("c1", None).await.expect("load");
        assert_eq!(report.count, 2);
        assert!(report.view_updated);
        assert_eq!(ids(&store.active_view()), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn background_load_leaves_view_alone() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed(vec![memory("m9", "c2", Role::Keeper, "other")]);
        let (store, selection) = store_with(backend);
        selection.set(Some("c1".to_string()));
        store.serve_cached_as_active("c1");

        let report = store.load_connection("c2", None).await.expect("load");
        assert!(!report.view_updated);
        assert_eq!(store.cached("c2").len(), 1);
        assert!(store.active_view().is_empty());
        assert_eq!(store.view_connection().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn failed_load_keeps_cache() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed(vec![memory("m1", "c1", Role::Keeper, "one")]);
        let (store, _selection) = store_with(backend.clone());
        store.load_connection("c1", Some(false)).await.expect("load");

        backend.set_offline(true);
        let err = store.load_connection("c1", Some(false)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ids(&store.cached("c1")), vec!["m1"]);
    }

    #[tokio::test]
    async fn create_replaces_provisional_in_place() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed(vec![memory("m1", "c1", Role::Keeper, "first")]);
        let (store, selection) = store_with(backend);
        selection.set(Some("c1".to_string()));
        store.load_connection("c1", None).await.expect("load");

        let created = store
            .create_optimistic(NewMemory::text("c1", Role::Teller, "second"))
            .await
            .expect("create");
        assert_eq!(created.id, "srv-1");
        assert_eq!(ids(&store.active_view()), vec!["m1", "srv-1"]);
        assert_eq!(ids(&store.cached("c1")), vec!["m1", "srv-1"]);
    }

    #[tokio::test]
    async fn failed_create_rolls_back() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.reject_creates(true);
        let (store, _selection) = store_with(backend);
        store.serve_cached_as_active("c1");

        let err = store
            .create_optimistic(NewMemory::text("c1", Role::Teller, "nope"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Backend(BackendError::Rejected(_))
        ));
        assert!(store.active_view().is_empty());
        assert!(store.cached("c1").is_empty());
    }

    #[tokio::test]
    async fn invalid_create_never_reaches_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let (store, _selection) = store_with(backend.clone());
        let err = store
            .create_optimistic(NewMemory::text("c1", Role::Teller, " "))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn confirm_drops_provisional_when_server_id_exists() {
        let confirmed = memory("srv-1", "c1", Role::Teller, "hi");
        let mut list = vec![
            memory("tmp-1", "c1", Role::Teller, "hi"),
            confirmed.clone(),
        ];
        confirm_provisional(&mut list, "tmp-1", &confirmed);
        assert_eq!(ids(&list), vec!["srv-1"]);
    }

    #[tokio::test]
    async fn load_keeps_unconfirmed_provisional_records_at_tail() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed(vec![memory("m1", "c1", Role::Keeper, "server")]);
        let (store, _selection) = store_with(backend);
        store.insert_remote(memory("tmp-x", "c1", Role::Teller, "pending"), false);

        store.load_connection("c1", Some(false)).await.expect("load");
        assert_eq!(ids(&store.cached("c1")), vec!["m1", "tmp-x"]);
    }

    #[test]
    fn precedence_prefers_longer_cache() {
        let backend = Arc::new(InMemoryBackend::new());
        let (store, selection) = store_with(backend);
        selection.set(Some("c1".to_string()));
        store.serve_cached_as_active("c1");
        store.insert_remote(memory("m1", "c1", Role::Keeper, "a"), false);
        assert_eq!(ids(&store.active_view()), vec!["m1"]);

        store.insert_remote(memory("m2", "c1", Role::Keeper, "b"), true);
        assert_eq!(ids(&store.active_view()), vec!["m1", "m2"]);
    }

    #[test]
    fn unread_and_mark_read_are_per_connection() {
        let backend = Arc::new(InMemoryBackend::new());
        let (store, _selection) = store_with(backend);
        let teller = LocalUser::new("tom", "Tom", Role::Teller);
        store.insert_remote(memory("a1", "a", Role::Keeper, "hi"), false);
        store.insert_remote(memory("a2", "a", Role::Teller, "mine"), false);
        store.insert_remote(memory("b1", "b", Role::Keeper, "hey"), false);

        assert_eq!(store.unread_count("a", &teller), 1);
        assert_eq!(store.mark_read("a", "tom"), 2);
        assert_eq!(store.unread_count("a", &teller), 0);
        assert_eq!(store.unread_count("b", &teller), 1);
    }

    #[test]
    fn preview_picks_latest_conversational_record() {
        let backend = Arc::new(InMemoryBackend::new());
        let (store, _selection) = store_with(backend);
        let earlier = Utc::now() - chrono::Duration::seconds(60);
        let mut old = memory("m1", "c1", Role::Keeper, "old news");
        old.timestamp = earlier;
        let mut voice = memory("m2", "c1", Role::Teller, "");
        voice.kind = MemoryKind::Voice;
        voice.metadata.transcript = Some("hello there".to_string());
        let mut photo = memory("m3", "c1", Role::Teller, "");
        photo.kind = MemoryKind::Photo;
        photo.timestamp = Utc::now() + chrono::Duration::seconds(5);
        for record in [old, voice, photo] {
            store.insert_remote(record, false);
        }

        let preview = store.last_message_preview("c1").expect("preview");
        assert_eq!(preview.memory_id, "m2");
        assert_eq!(preview.text, "hello there");
        assert_eq!(store.last_message_preview("missing"), None);
    }
}
