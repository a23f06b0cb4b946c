//! One signed-in user's sync engine.
//!
//! `SyncSession` owns the store, reconciler, registry, queue, dispatcher,
//! connectivity monitor, realtime subscriptions and timers. Lifecycle:
//! build, `start`, operations, `shutdown`, and optionally `sign_out`.

mod replay;

use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::notify::NotificationDispatcher;
use crate::queue::OfflineQueue;
use crate::reconciler::SyncReconciler;
use crate::registry::{ActiveSelection, ConnectionRegistry};
use crate::state::{JsonStateStore, LocalState, LocalStateStore};
use crate::store::MemoryStore;
use crate::subscription::Subscription;
use crate::types::{ApplyOutcome, Delivery, LoadReport, LocalUser, QueueReport, QueueStats};
use keepsake_config::KeepsakeConfig;
use keepsake_protocol::{
    ConnectionId, EventMsg, EventPayload, EventSink, Memory, MemoryEnricher, MemoryPatch,
    NewMemory, NotificationAction, NotificationService, PersistenceBackend, PresenceMap,
    ProfileUpdate, QueuedOperation, RealtimeChannel, RealtimeEvent, UserId,
};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use replay::ReplayHandler;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Collects collaborators and builds a `SyncSession`.
pub struct SyncSessionBuilder {
    config: KeepsakeConfig,
    user: LocalUser,
    backend: Arc<dyn PersistenceBackend>,
    channel: Arc<dyn RealtimeChannel>,
    notifier: Option<Arc<dyn NotificationService>>,
    enricher: Option<Arc<dyn MemoryEnricher>>,
    state_store: Option<Arc<dyn LocalStateStore>>,
    event_sink: Option<Arc<dyn EventSink>>,
    online: bool,
}

impl SyncSessionBuilder {
    /// Builder with the required collaborators; the session starts online.
    pub fn new(
        config: KeepsakeConfig,
        user: LocalUser,
        backend: Arc<dyn PersistenceBackend>,
        channel: Arc<dyn RealtimeChannel>,
    ) -> Self {
        Self {
            config,
            user,
            backend,
            channel,
            notifier: None,
            enricher: None,
            state_store: None,
            event_sink: None,
            online: true,
        }
    }

    /// Platform notification service for banners and cues.
    pub fn notifier(mut self, notifier: Arc<dyn NotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Post-create enrichment such as tag suggestions.
    pub fn enricher(mut self, enricher: Arc<dyn MemoryEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Override the local state store; defaults to JSON files under `state.path`.
    pub fn state_store(mut self, state_store: Arc<dyn LocalStateStore>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    /// Receiver for session events.
    pub fn event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(event_sink);
        self
    }

    /// Initial connectivity.
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Assemble the session. Opens the default state store when none was
    /// given, which can fail on an unwritable state directory.
    pub fn build(self) -> Result<SyncSession, SyncError> {
        let state_store: Arc<dyn LocalStateStore> = match self.state_store {
            Some(store) => store,
            None => Arc::new(JsonStateStore::from_config(&self.config.state)?),
        };
        let selection = ActiveSelection::default();
        let store = MemoryStore::new(self.backend.clone(), selection.clone());
        let reconciler =
            SyncReconciler::new(store.clone(), selection.clone(), self.user.user_id.clone());
        let registry = ConnectionRegistry::new(
            self.user.clone(),
            self.backend.clone(),
            store.clone(),
            state_store.clone(),
            selection.clone(),
        );
        let queue = Arc::new(OfflineQueue::new(
            self.user.user_id.clone(),
            state_store.clone(),
            &self.config.queue,
            self.event_sink.clone(),
        ));
        let dispatcher = NotificationDispatcher::new(
            self.config.notifications.clone(),
            self.user.role,
            self.notifier.clone(),
            self.event_sink.clone(),
        );
        let replay = Arc::new(ReplayHandler {
            backend: self.backend.clone(),
            channel: self.channel.clone(),
            store: store.clone(),
            selection: selection.clone(),
            user_id: self.user.user_id.clone(),
            event_sink: self.event_sink.clone(),
        });
        debug!(
            "sync session built (user_id={}, role={}, online={})",
            self.user.user_id,
            self.user.role.as_str(),
            self.online
        );
        Ok(SyncSession {
            inner: Arc::new(SessionInner {
                config: self.config,
                user: self.user,
                backend: self.backend,
                channel: self.channel,
                notifier: self.notifier,
                enricher: self.enricher,
                state_store,
                event_sink: self.event_sink,
                selection,
                store,
                reconciler,
                registry,
                queue,
                dispatcher,
                connectivity: Connectivity::new(self.online),
                replay,
                realtime: Mutex::new(RealtimeLink::default()),
                background: Mutex::new(Vec::new()),
                presence: RwLock::new(PresenceMap::new()),
                switches: Mutex::new(Vec::new()),
                epoch: AtomicU64::new(0),
                auth_failed: AtomicBool::new(false),
                started: AtomicBool::new(false),
            }),
        })
    }
}

#[derive(Default)]
struct RealtimeLink {
    connection_id: Option<ConnectionId>,
    subscriptions: Vec<Subscription>,
}

struct SessionInner {
    config: KeepsakeConfig,
    user: LocalUser,
    backend: Arc<dyn PersistenceBackend>,
    channel: Arc<dyn RealtimeChannel>,
    notifier: Option<Arc<dyn NotificationService>>,
    enricher: Option<Arc<dyn MemoryEnricher>>,
    state_store: Arc<dyn LocalStateStore>,
    event_sink: Option<Arc<dyn EventSink>>,
    selection: ActiveSelection,
    store: MemoryStore,
    reconciler: SyncReconciler,
    registry: ConnectionRegistry,
    queue: Arc<OfflineQueue>,
    dispatcher: NotificationDispatcher,
    connectivity: Connectivity,
    replay: Arc<ReplayHandler>,
    realtime: Mutex<RealtimeLink>,
    /// Auto-sync and periodic timers.
    background: Mutex<Vec<Subscription>>,
    presence: RwLock<PresenceMap>,
    /// Loads and follow-up tasks spawned by `switch_active`.
    switches: Mutex<Vec<AbortHandle>>,
    /// Bumped by `shutdown`; tasks spawned under an older epoch stand down.
    epoch: AtomicU64,
    auth_failed: AtomicBool,
    started: AtomicBool,
}

/// Sync engine for one signed-in user.
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    pub fn builder(
        config: KeepsakeConfig,
        user: LocalUser,
        backend: Arc<dyn PersistenceBackend>,
        channel: Arc<dyn RealtimeChannel>,
    ) -> SyncSessionBuilder {
        SyncSessionBuilder::new(config, user, backend, channel)
    }

    /// Bring the session up.
    ///
    /// Restores the offline queue, lists connections, restores and loads the
    /// active connection, joins its realtime channel, starts auto-sync and
    /// the periodic refresh timers, then replays the queue when online.
    /// Returns the connection made active, if any.
    pub async fn start(&self) -> Result<Option<ConnectionId>, SyncError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::AcqRel) {
            debug!("session already started (user_id={})", inner.user.user_id);
            return Ok(inner.selection.get());
        }
        info!("starting sync session (user_id={})", inner.user.user_id);
        let restored = inner.queue.restore().inspect_err(|_| {
            inner.started.store(false, Ordering::Release);
        })?;

        if let Err(err) = inner.registry.refresh_connections().await {
            if !err.is_transient() {
                self.note_failure(&err);
                inner.started.store(false, Ordering::Release);
                return Err(err);
            }
            warn!(
                "connections unavailable at start, continuing offline (user_id={}): {}",
                inner.user.user_id, err
            );
        }

        let active = inner.registry.restore_last_active();
        if let Some(connection_id) = &active {
            match inner.store.load_connection(connection_id, Some(true)).await {
                Ok(report) if report.view_updated => self.after_view_change(connection_id, false),
                Ok(_) => {}
                Err(err) => {
                    self.note_failure(&err);
                    warn!(
                        "initial load failed (connection_id={}): {}",
                        connection_id, err
                    );
                }
            }
            if let Err(err) = self.connect_realtime(connection_id).await {
                warn!(
                    "realtime connect failed (connection_id={}): {}",
                    connection_id, err
                );
            }
        }

        self.start_background();
        if inner.connectivity.is_online() && !inner.queue.is_empty() {
            self.process_queue_now().await;
        }
        info!(
            "sync session started (user_id={}, active={:?}, restored_operations={})",
            inner.user.user_id, active, restored
        );
        Ok(active)
    }

    /// Cancel subscriptions, timers and pending switches, then leave the
    /// realtime channel.
    pub async fn shutdown(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        let switches = std::mem::take(&mut *self.inner.switches.lock());
        for switch in &switches {
            switch.abort();
        }
        if !switches.is_empty() {
            debug!("pending switches aborted (count={})", switches.len());
        }
        let background = std::mem::take(&mut *self.inner.background.lock());
        for mut subscription in background {
            subscription.cancel();
        }
        self.disconnect_realtime().await;
        self.inner.started.store(false, Ordering::Release);
        info!("sync session stopped (user_id={})", self.inner.user.user_id);
    }

    /// Shut down and forget cached data. The durable queue is kept.
    pub async fn sign_out(&self) {
        self.shutdown().await;
        self.inner.store.clear();
        self.inner.registry.clear();
        self.inner.dispatcher.reset();
        self.inner.auth_failed.store(false, Ordering::Release);
        info!(
            "signed out (user_id={}, queued_operations={})",
            self.inner.user.user_id,
            self.inner.queue.len()
        );
    }

    /// Create a memory, or queue it when the backend cannot be reached.
    ///
    /// Validation failures are returned without queueing. Online creates are
    /// applied optimistically, broadcast, then handed to the enricher.
    pub async fn create_memory(
        &self,
        new_memory: NewMemory,
    ) -> Result<Delivery<Memory>, SyncError> {
        new_memory.validate()?;
        if !self.is_online() {
            return self
                .enqueue(QueuedOperation::CreateMemory { memory: new_memory })
                .map(Delivery::Queued);
        }
        match self.inner.store.create_optimistic(new_memory.clone()).await {
            Ok(created) => {
                self.after_view_change(&created.connection_id, false);
                self.broadcast(RealtimeEvent::create(
                    created.clone(),
                    self.inner.user.user_id.clone(),
                ))
                .await;
                self.spawn_enrichment(created.clone());
                Ok(Delivery::Confirmed(created))
            }
            Err(err) if err.is_transient() => {
                debug!("create deferred to queue: {}", err);
                self.enqueue(QueuedOperation::CreateMemory { memory: new_memory })
                    .map(Delivery::Queued)
            }
            Err(err) => {
                self.note_failure(&err);
                Err(err)
            }
        }
    }

    /// Update a memory; offline or on transient failure the patch is applied
    /// locally and queued.
    pub async fn update_memory(
        &self,
        connection_id: &str,
        memory_id: &str,
        patch: MemoryPatch,
    ) -> Result<Delivery<Memory>, SyncError> {
        if self.is_online() {
            match self.inner.store.update_memory(memory_id, &patch).await {
                Ok(updated) => {
                    self.after_view_change(&updated.connection_id, false);
                    self.broadcast(RealtimeEvent::update(
                        updated.clone(),
                        self.inner.user.user_id.clone(),
                    ))
                    .await;
                    return Ok(Delivery::Confirmed(updated));
                }
                Err(err) if err.is_transient() => {
                    debug!("update deferred to queue (memory_id={}): {}", memory_id, err);
                }
                Err(err) => {
                    self.note_failure(&err);
                    return Err(err);
                }
            }
        }
        if self
            .inner
            .store
            .apply_local_patch(connection_id, memory_id, &patch)
        {
            self.after_view_change(connection_id, false);
        }
        self.enqueue(QueuedOperation::UpdateMemory {
            connection_id: connection_id.to_string(),
            memory_id: memory_id.to_string(),
            patch,
        })
        .map(Delivery::Queued)
    }

    /// Delete a memory; offline or on transient failure it is removed
    /// locally and queued.
    pub async fn delete_memory(
        &self,
        connection_id: &str,
        memory_id: &str,
    ) -> Result<Delivery<()>, SyncError> {
        if self.is_online() {
            match self.inner.store.delete_memory(connection_id, memory_id).await {
                Ok(()) => {
                    self.after_view_change(connection_id, false);
                    self.broadcast(RealtimeEvent::delete(
                        connection_id,
                        memory_id,
                        self.inner.user.user_id.clone(),
                    ))
                    .await;
                    return Ok(Delivery::Confirmed(()));
                }
                Err(err) if err.is_transient() => {
                    debug!("delete deferred to queue (memory_id={}): {}", memory_id, err);
                }
                Err(err) => {
                    self.note_failure(&err);
                    return Err(err);
                }
            }
        }
        if self.inner.store.remove_local(connection_id, memory_id) {
            self.after_view_change(connection_id, false);
        }
        self.enqueue(QueuedOperation::DeleteMemory {
            connection_id: connection_id.to_string(),
            memory_id: memory_id.to_string(),
        })
        .map(Delivery::Queued)
    }

    /// Update the user's profile; queued when offline or on a transient failure.
    pub async fn update_profile(&self, profile: ProfileUpdate) -> Result<Delivery<()>, SyncError> {
        if self.is_online() {
            match self.inner.backend.update_profile(&profile).await {
                Ok(()) => {
                    info!("profile updated (user_id={})", self.inner.user.user_id);
                    return Ok(Delivery::Confirmed(()));
                }
                Err(err) if err.is_transient() => {
                    debug!("profile update deferred to queue: {}", err);
                }
                Err(err) => {
                    let err = SyncError::from(err);
                    self.note_failure(&err);
                    return Err(err);
                }
            }
        }
        self.enqueue(QueuedOperation::UpdateProfile { profile })
            .map(Delivery::Queued)
    }

    /// Apply an inbound realtime event and react to view changes.
    pub fn apply_realtime_event(&self, event: &RealtimeEvent) -> ApplyOutcome {
        let outcome = self.inner.reconciler.apply_realtime_event(event);
        if outcome.touched_view() {
            self.after_view_change(&event.connection_id, true);
        }
        outcome
    }

    /// Make a connection active.
    ///
    /// Cached records are shown at once. The returned handle resolves once
    /// the authoritative load has finished and, if the connection is still
    /// selected, the realtime channel has been moved to it.
    pub fn switch_active(
        &self,
        connection_id: &str,
    ) -> Result<JoinHandle<Result<LoadReport, SyncError>>, SyncError> {
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let load = self.inner.registry.switch_active(connection_id)?;
        self.after_view_change(connection_id, false);
        let load_abort = load.abort_handle();

        let session = self.clone();
        let connection_id = connection_id.to_string();
        let handle = tokio::spawn(async move {
            let report = load
                .await
                .unwrap_or_else(|err| Err(SyncError::Task(err.to_string())));
            if session.inner.epoch.load(Ordering::Acquire) != epoch {
                debug!(
                    "switch finished after shutdown, ignored (connection_id={})",
                    connection_id
                );
                return report;
            }
            match &report {
                Ok(loaded) if loaded.view_updated => {
                    session.after_view_change(&connection_id, false);
                }
                Ok(_) => {}
                Err(err) => session.note_failure(err),
            }
            if session.inner.selection.is(&connection_id)
                && let Err(err) = session.connect_realtime(&connection_id).await
            {
                warn!(
                    "realtime connect failed (connection_id={}): {}",
                    connection_id, err
                );
            }
            report
        });
        let mut switches = self.inner.switches.lock();
        switches.retain(|switch| !switch.is_finished());
        switches.push(load_abort);
        switches.push(handle.abort_handle());
        Ok(handle)
    }

    /// Mark every record of a connection read; returns the local count.
    pub async fn mark_read(&self, connection_id: &str) -> Result<usize, SyncError> {
        self.inner
            .registry
            .mark_read(connection_id)
            .await
            .inspect_err(|err| self.note_failure(err))
    }

    /// Mark the active connection read.
    pub async fn mark_active_read(&self) -> Result<usize, SyncError> {
        let connection_id = self
            .inner
            .selection
            .get()
            .ok_or(SyncError::NoActiveConnection)?;
        self.mark_read(&connection_id).await
    }

    /// Run the click action of a notification: focus its connection and
    /// mark it read.
    pub async fn handle_notification_action(
        &self,
        action: &NotificationAction,
    ) -> Result<usize, SyncError> {
        match action {
            NotificationAction::FocusConnection { connection_id } => {
                self.set_app_focused(true);
                if !self.inner.selection.is(connection_id) {
                    let load = self.switch_active(connection_id)?;
                    match load.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => warn!(
                            "load after notification click failed (connection_id={}): {}",
                            connection_id, err
                        ),
                        Err(err) => return Err(SyncError::Task(err.to_string())),
                    }
                }
                self.mark_read(connection_id).await
            }
        }
    }

    /// Report connectivity; going online triggers a queue replay.
    pub fn set_online(&self, online: bool) {
        if self.inner.connectivity.set_online(online) {
            self.emit(EventPayload::ConnectivityChanged { online });
        }
    }

    /// Last reported connectivity.
    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Whether the user is looking at the active view; decides banner vs toast.
    pub fn set_app_focused(&self, focused: bool) {
        self.inner.dispatcher.set_focused(focused);
    }

    /// Replay the offline queue now.
    pub async fn process_queue_now(&self) -> QueueReport {
        let report = self
            .inner
            .queue
            .process_queue(self.inner.replay.as_ref())
            .await;
        if report.attempted() > 0 {
            self.emit(EventPayload::QueueSynced {
                processed: report.processed,
                failed: report.failed,
                remaining: report.remaining,
            });
        }
        report
    }

    /// Re-list connections and reload the active one.
    pub async fn refresh(&self) -> Result<Option<LoadReport>, SyncError> {
        self.inner
            .registry
            .refresh_connections()
            .await
            .inspect_err(|err| self.note_failure(err))?;
        let Some(connection_id) = self.inner.selection.get() else {
            return Ok(None);
        };
        let report = self
            .inner
            .store
            .load_connection(&connection_id, None)
            .await
            .inspect_err(|err| self.note_failure(err))?;
        if report.view_updated {
            self.after_view_change(&connection_id, true);
        }
        Ok(Some(report))
    }

    /// Reload every inactive connection in the background and return the
    /// unread badge of each connection.
    pub async fn refresh_unread(&self) -> Result<BTreeMap<ConnectionId, usize>, SyncError> {
        for connection in self.inner.registry.connections() {
            if self.inner.selection.is(&connection.id) {
                continue;
            }
            if let Err(err) = self
                .inner
                .store
                .load_connection(&connection.id, Some(false))
                .await
            {
                self.note_failure(&err);
                if err.is_unauthorized() {
                    return Err(err);
                }
                warn!(
                    "unread refresh skipped connection (connection_id={}): {}",
                    connection.id, err
                );
            }
        }
        Ok(self.inner.registry.unread_counts())
    }

    /// Clear the authorization failure and refresh.
    pub async fn reauthenticated(&self) -> Result<Option<LoadReport>, SyncError> {
        self.inner.auth_failed.store(false, Ordering::Release);
        info!("reauthenticated (user_id={})", self.inner.user.user_id);
        self.refresh().await
    }

    /// Set when the backend rejected the credentials; cleared by
    /// [`SyncSession::reauthenticated`].
    pub fn auth_failed(&self) -> bool {
        self.inner.auth_failed.load(Ordering::Acquire)
    }

    /// Latest presence snapshot of the joined channel.
    pub fn presence(&self) -> PresenceMap {
        self.inner.presence.read().clone()
    }

    /// Whether the partner of a connection is present in its channel.
    pub fn is_partner_online(&self, connection_id: &str) -> bool {
        if self.inner.realtime.lock().connection_id.as_deref() != Some(connection_id) {
            return false;
        }
        let Some(connection) = self.inner.registry.connection(connection_id) else {
            return false;
        };
        let partner_id = self.inner.user.partner_id(&connection);
        self.inner
            .presence
            .read()
            .get(partner_id)
            .is_some_and(|state| state.online)
    }

    /// Whether to ask the user to turn on notifications.
    pub async fn should_prompt_for_notifications(&self) -> bool {
        let Some(notifier) = &self.inner.notifier else {
            return false;
        };
        match notifier.is_subscribed().await {
            Ok(true) => return false,
            Ok(false) => {}
            Err(err) => {
                warn!("failed to read notification subscription: {}", err);
                return false;
            }
        }
        match self.inner.state_store.load(&self.inner.user.user_id) {
            Ok(state) => !state.notification_prompt_shown,
            Err(err) => {
                warn!("failed to read notification prompt flag: {}", err);
                false
            }
        }
    }

    /// Persist that the opt-in prompt was shown.
    pub fn mark_notification_prompt_shown(&self) -> Result<(), SyncError> {
        self.inner.state_store.update(
            &self.inner.user.user_id,
            &mut |state: &mut LocalState| state.notification_prompt_shown = true,
        )?;
        Ok(())
    }

    /// Effective config the session was built with.
    pub fn config(&self) -> &KeepsakeConfig {
        &self.inner.config
    }

    pub fn user(&self) -> &LocalUser {
        &self.inner.user
    }

    /// Caches and the active view.
    pub fn store(&self) -> &MemoryStore {
        &self.inner.store
    }

    /// Known connections and the selection.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Durable offline queue of the signed-in user.
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.inner.queue
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.inner.dispatcher
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Id of the selected connection.
    pub fn active_connection_id(&self) -> Option<ConnectionId> {
        self.inner.selection.get()
    }

    /// Records to display for the active connection.
    pub fn active_view(&self) -> Vec<Memory> {
        self.inner.store.active_view()
    }

    /// Unread badge per connection from the local caches.
    pub fn unread_counts(&self) -> BTreeMap<ConnectionId, usize> {
        self.inner.registry.unread_counts()
    }

    /// Shortcut for `queue().stats()`.
    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    /// Move the realtime subscriptions to `connection_id`.
    ///
    /// Listeners are attached before joining so nothing sent right after the
    /// join is missed.
    async fn connect_realtime(&self, connection_id: &str) -> Result<(), SyncError> {
        self.disconnect_realtime().await;

        let weak = Arc::downgrade(&self.inner);
        let memory_updates = Subscription::spawn(
            format!("memory-updates:{connection_id}"),
            self.inner.channel.subscribe_memory_updates(),
            move |event: RealtimeEvent| {
                if let Some(session) = upgrade(&weak) {
                    session.apply_realtime_event(&event);
                }
            },
        );
        let weak = Arc::downgrade(&self.inner);
        let presence_connection = connection_id.to_string();
        let presence = Subscription::spawn(
            format!("presence:{connection_id}"),
            self.inner.channel.subscribe_presence(),
            move |snapshot: PresenceMap| {
                if let Some(session) = upgrade(&weak) {
                    session.apply_presence(&presence_connection, snapshot);
                }
            },
        );
        {
            let mut link = self.inner.realtime.lock();
            link.connection_id = Some(connection_id.to_string());
            link.subscriptions = vec![memory_updates, presence];
        }

        let params = self.inner.user.channel_params(connection_id);
        self.inner.channel.connect(&params).await?;
        info!(
            "realtime connected (connection_id={}, user_id={})",
            connection_id, params.user_id
        );
        Ok(())
    }

    async fn disconnect_realtime(&self) {
        let previous = {
            let mut link = self.inner.realtime.lock();
            for subscription in link.subscriptions.iter_mut() {
                subscription.cancel();
            }
            link.subscriptions.clear();
            link.connection_id.take()
        };
        self.inner.presence.write().clear();
        if let Some(previous) = previous {
            if let Err(err) = self.inner.channel.disconnect().await {
                warn!(
                    "realtime disconnect failed (connection_id={}): {}",
                    previous, err
                );
            }
            debug!("realtime disconnected (connection_id={})", previous);
        }
    }

    fn apply_presence(&self, connection_id: &str, snapshot: PresenceMap) {
        let mut online: Vec<UserId> = snapshot
            .values()
            .filter(|state| state.online)
            .map(|state| state.user_id.clone())
            .collect();
        online.sort();
        *self.inner.presence.write() = snapshot;
        debug!(
            "presence updated (connection_id={}, online={})",
            connection_id,
            online.len()
        );
        self.emit(EventPayload::PresenceChanged {
            connection_id: connection_id.to_string(),
            online,
        });
    }

    /// Report a changed active view; with `notify`, new partner records may
    /// raise notifications, otherwise they are only marked as seen.
    fn after_view_change(&self, connection_id: &str, notify: bool) {
        if !self.inner.selection.is(connection_id) {
            return;
        }
        let view = self.inner.store.active_view();
        self.emit(EventPayload::ActiveViewChanged {
            connection_id: connection_id.to_string(),
            count: view.len(),
        });
        if !notify {
            self.inner.dispatcher.prime(connection_id, &view);
            return;
        }
        if let Some(connection) = self.inner.registry.connection(connection_id) {
            self.inner.dispatcher.dispatch(&connection, &view);
        }
    }

    fn enqueue(&self, operation: QueuedOperation) -> Result<Uuid, SyncError> {
        let pending = self.inner.queue.enqueue(operation)?;
        self.emit(EventPayload::OperationQueued {
            operation_id: pending.id,
            kind: pending.kind(),
        });
        Ok(pending.id)
    }

    async fn broadcast(&self, event: RealtimeEvent) {
        if let Err(err) = self.inner.channel.broadcast_memory_update(&event).await {
            warn!(
                "broadcast failed (connection_id={}, memory_id={}): {}",
                event.connection_id, event.memory_id, err
            );
        }
    }

    /// Run the enricher on a confirmed record. Its result is merged through
    /// the backend; failures are logged and leave the record as created.
    fn spawn_enrichment(&self, memory: Memory) {
        let Some(enricher) = self.inner.enricher.clone() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let patch = match enricher.enrich(&memory).await {
                Ok(Some(patch)) if !patch.is_empty() => patch,
                Ok(_) => return,
                Err(err) => {
                    warn!("enrichment failed (memory_id={}): {}", memory.id, err);
                    return;
                }
            };
            let Some(session) = upgrade(&weak) else {
                return;
            };
            match session.inner.store.update_memory(&memory.id, &patch).await {
                Ok(updated) => {
                    debug!("enrichment merged (memory_id={})", updated.id);
                    session.after_view_change(&updated.connection_id, false);
                    session
                        .broadcast(RealtimeEvent::update(
                            updated,
                            session.inner.user.user_id.clone(),
                        ))
                        .await;
                }
                Err(err) => warn!(
                    "enrichment not saved (memory_id={}): {}",
                    memory.id, err
                ),
            }
        });
    }

    fn start_background(&self) {
        let sync = &self.inner.config.sync;
        let mut tasks = vec![
            self.inner
                .queue
                .setup_auto_sync(self.inner.replay.clone(), &self.inner.connectivity),
        ];
        tasks.extend(self.spawn_periodic(
            "refresh",
            Duration::from_secs(sync.refresh_interval_secs),
            |session| async move {
                if let Err(err) = session.refresh().await {
                    warn!("periodic refresh failed: {}", err);
                }
                if !session.inner.queue.is_empty() {
                    session.process_queue_now().await;
                }
            },
        ));
        tasks.extend(self.spawn_periodic(
            "unread-refresh",
            Duration::from_secs(sync.unread_refresh_interval_secs),
            |session| async move {
                if let Err(err) = session.refresh_unread().await {
                    warn!("periodic unread refresh failed: {}", err);
                }
            },
        ));
        self.inner.background.lock().extend(tasks);
    }

    /// Run `tick` every `period`, skipping the immediate first tick and any
    /// tick while offline or after an authorization failure. A zero period
    /// disables the timer.
    fn spawn_periodic<F, Fut>(
        &self,
        label: &'static str,
        period: Duration,
        tick: F,
    ) -> Option<Subscription>
    where
        F: Fn(SyncSession) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            debug!("timer disabled (label={})", label);
            return None;
        }
        let weak = Arc::downgrade(&self.inner);
        let live = Arc::new(AtomicBool::new(true));
        let flag = live.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                let Some(session) = upgrade(&weak) else {
                    break;
                };
                if !session.is_online() || session.auth_failed() {
                    debug!("timer tick skipped (label={})", label);
                    continue;
                }
                tick(session).await;
            }
        });
        Some(Subscription::from_task(label, live, handle))
    }

    /// Raise `AuthRequired` the first time credentials are rejected.
    fn note_failure(&self, err: &SyncError) {
        if err.is_unauthorized() && !self.inner.auth_failed.swap(true, Ordering::AcqRel) {
            warn!(
                "authorization rejected (user_id={}): {}",
                self.inner.user.user_id, err
            );
            self.emit(EventPayload::AuthRequired {
                message: err.to_string(),
            });
        }
    }

    fn emit(&self, payload: EventPayload) {
        if let Some(sink) = &self.inner.event_sink {
            sink.emit(EventMsg::new(payload));
        }
    }
}

fn upgrade(weak: &Weak<SessionInner>) -> Option<SyncSession> {
    weak.upgrade().map(|inner| SyncSession { inner })
}

#[cfg(test)]
mod tests;
