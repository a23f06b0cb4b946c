//! Derives notifications from active-view updates.

use chrono::{DateTime, Duration, Utc};
use keepsake_config::{MAX_NOTIFICATION_WINDOW_MS, NotificationsConfig};
use keepsake_protocol::{
    Connection, ConnectionId, EventMsg, EventPayload, EventSink, Memory, MemoryId, MemoryKind,
    NotificationAction, NotificationKind, NotificationPreferences, NotificationRequest,
    NotificationService, NotificationSurface, Role,
};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Decides whether and how newly visible records are surfaced.
pub struct NotificationDispatcher {
    config: NotificationsConfig,
    local_role: Role,
    /// Ids of the previous evaluation per connection.
    observed: Mutex<HashMap<ConnectionId, HashSet<MemoryId>>>,
    last_dispatched_at: Mutex<Option<DateTime<Utc>>>,
    focused: AtomicBool,
    service: Option<Arc<dyn NotificationService>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl NotificationDispatcher {
    /// Without a service only in-app toasts are delivered.
    pub fn new(
        config: NotificationsConfig,
        local_role: Role,
        service: Option<Arc<dyn NotificationService>>,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        Self {
            config,
            local_role,
            observed: Mutex::new(HashMap::new()),
            last_dispatched_at: Mutex::new(None),
            focused: AtomicBool::new(true),
            service,
            event_sink,
        }
    }

    /// Whether the user is looking at the active view.
    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::Release);
    }

    /// See [`NotificationDispatcher::set_focused`].
    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::Acquire)
    }

    /// Record the view as seen without producing notifications.
    pub fn prime(&self, connection_id: &str, view: &[Memory]) {
        self.observed
            .lock()
            .insert(connection_id.to_string(), view_ids(view));
    }

    /// Evaluate a view update at the current time.
    pub fn evaluate(&self, connection: &Connection, view: &[Memory]) -> Vec<NotificationRequest> {
        self.evaluate_at(connection, view, Utc::now())
    }

    /// Evaluate a view update as of `now`.
    ///
    /// Only ids absent from the previous view of the connection are
    /// candidates; the current view then replaces it. Stale,
    /// self-sent and non-notifiable records are skipped, as is anything
    /// arriving within the throttle of the previous notification.
    pub fn evaluate_at(
        &self,
        connection: &Connection,
        view: &[Memory],
        now: DateTime<Utc>,
    ) -> Vec<NotificationRequest> {
        let fresh: Vec<&Memory> = {
            let mut observed = self.observed.lock();
            let seen = observed.entry(connection.id.clone()).or_default();
            let fresh: Vec<&Memory> = view
                .iter()
                .filter(|memory| !seen.contains(&memory.id))
                .collect();
            *seen = view_ids(view);
            fresh
        };
        if !self.config.enabled || fresh.is_empty() {
            return Vec::new();
        }

        let window = bounded_millis(self.config.recency_window_ms);
        let throttle = bounded_millis(self.config.throttle_ms);
        let mut last_dispatched = self.last_dispatched_at.lock();
        let mut requests = Vec::new();
        for memory in fresh {
            if now - memory.timestamp > window {
                continue;
            }
            if memory.sender == self.local_role {
                continue;
            }
            if !self.config.notifiable_kinds.contains(&memory.kind) {
                continue;
            }
            if let Some(previous) = *last_dispatched
                && now - previous < throttle
            {
                debug!(
                    "notification throttled (connection_id={}, memory_id={})",
                    connection.id, memory.id
                );
                continue;
            }
            *last_dispatched = Some(now);
            requests.push(self.build_request(connection, memory));
        }
        requests
    }

    fn build_request(&self, connection: &Connection, memory: &Memory) -> NotificationRequest {
        let kind = classify(memory);
        let partner = match connection.partner.display_name.trim() {
            "" => self.local_role.partner().as_str(),
            name => name,
        };
        let title = match kind {
            NotificationKind::Prompt => format!("{partner} answered a prompt"),
            NotificationKind::Message => format!("New memory from {partner}"),
        };
        let body = match memory.kind {
            MemoryKind::Voice => match memory.metadata.transcript.as_deref().map(str::trim) {
                Some(transcript) if !transcript.is_empty() => format!(
                    "{}: {}",
                    self.config.voice_placeholder,
                    truncate(transcript, self.config.preview_chars)
                ),
                _ => self.config.voice_placeholder.clone(),
            },
            _ => truncate(&memory.content, self.config.preview_chars),
        };
        let surface = if self.is_focused() {
            NotificationSurface::InApp
        } else {
            NotificationSurface::Native
        };
        NotificationRequest {
            surface,
            kind,
            connection_id: connection.id.clone(),
            memory_id: memory.id.clone(),
            title,
            body,
            icon: self.config.icon.clone(),
            action: NotificationAction::FocusConnection {
                connection_id: connection.id.clone(),
            },
        }
    }

    /// Evaluate a view update and deliver whatever it produces.
    pub fn dispatch(&self, connection: &Connection, view: &[Memory]) -> Vec<NotificationRequest> {
        let requests = self.evaluate(connection, view);
        for request in &requests {
            self.deliver(request.clone());
        }
        requests
    }

    /// Surface one request.
    ///
    /// In-app toasts go to the event sink right away. Banners and the cue run
    /// on a spawned task; their failures are logged and dropped.
    pub fn deliver(&self, request: NotificationRequest) {
        debug!(
            "delivering notification (connection_id={}, memory_id={}, surface={:?})",
            request.connection_id, request.memory_id, request.surface
        );
        if request.surface == NotificationSurface::InApp
            && let Some(sink) = &self.event_sink
        {
            sink.emit(EventMsg::new(EventPayload::Notification {
                request: request.clone(),
            }));
        }
        let Some(service) = self.service.clone() else {
            return;
        };
        let (sound, vibrate) = (self.config.sound, self.config.vibrate);
        tokio::spawn(async move {
            let preferences = service.preferences().await.unwrap_or_else(|err| {
                warn!("failed to read notification preferences: {}", err);
                NotificationPreferences::default()
            });
            if request.surface == NotificationSurface::Native {
                if preferences.enabled {
                    if let Err(err) = service.show_banner(&request).await {
                        warn!(
                            "banner failed (memory_id={}): {}",
                            request.memory_id, err
                        );
                    }
                } else {
                    debug!("native banner suppressed by preferences");
                }
            }
            let sound = sound && preferences.sound;
            let vibrate = vibrate && preferences.vibrate;
            if (sound || vibrate)
                && let Err(err) = service.play_cue(sound, vibrate).await
            {
                warn!("notification cue failed: {}", err);
            }
        });
    }

    /// Forget observed ids and the throttle clock.
    pub fn reset(&self) {
        self.observed.lock().clear();
        *self.last_dispatched_at.lock() = None;
    }
}

/// A record answering a prompt question, with tags, is a prompt response.
fn classify(memory: &Memory) -> NotificationKind {
    let answers_prompt = memory
        .metadata
        .prompt_question
        .as_deref()
        .is_some_and(|question| !question.trim().is_empty());
    if answers_prompt && !memory.tags.is_empty() {
        NotificationKind::Prompt
    } else {
        NotificationKind::Message
    }
}

fn view_ids(view: &[Memory]) -> HashSet<MemoryId> {
    view.iter().map(|memory| memory.id.clone()).collect()
}

/// Config values above the bound are clamped so the delta cannot overflow.
fn bounded_millis(millis: u64) -> Duration {
    Duration::milliseconds(millis.min(MAX_NOTIFICATION_WINDOW_MS) as i64)
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
