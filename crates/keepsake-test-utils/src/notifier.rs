use async_trait::async_trait;
use keepsake_protocol::{
    BackendError, NotificationPreferences, NotificationRequest, NotificationService,
};
use parking_lot::Mutex;

/// Notification service that records banners and cues.
#[derive(Default)]
pub struct RecordingNotifier {
    state: Mutex<NotifierState>,
}

#[derive(Default)]
struct NotifierState {
    subscribed: bool,
    preferences: NotificationPreferences,
    banners: Vec<NotificationRequest>,
    cues: Vec<(bool, bool)>,
    fail_cues: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferences(preferences: NotificationPreferences) -> Self {
        let notifier = Self::default();
        notifier.state.lock().preferences = preferences;
        notifier
    }

    /// Make every `play_cue` call fail.
    pub fn fail_cues(&self, fail: bool) {
        self.state.lock().fail_cues = fail;
    }

    pub fn banners(&self) -> Vec<NotificationRequest> {
        self.state.lock().banners.clone()
    }

    pub fn cues(&self) -> Vec<(bool, bool)> {
        self.state.lock().cues.clone()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn is_subscribed(&self) -> Result<bool, BackendError> {
        Ok(self.state.lock().subscribed)
    }

    async fn set_subscribed(&self, subscribed: bool) -> Result<(), BackendError> {
        self.state.lock().subscribed = subscribed;
        Ok(())
    }

    async fn preferences(&self) -> Result<NotificationPreferences, BackendError> {
        Ok(self.state.lock().preferences)
    }

    async fn set_preferences(
        &self,
        preferences: &NotificationPreferences,
    ) -> Result<(), BackendError> {
        self.state.lock().preferences = *preferences;
        Ok(())
    }

    async fn show_banner(&self, request: &NotificationRequest) -> Result<(), BackendError> {
        self.state.lock().banners.push(request.clone());
        Ok(())
    }

    async fn play_cue(&self, sound: bool, vibrate: bool) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.cues.push((sound, vibrate));
        if state.fail_cues {
            return Err(BackendError::Server("audio device busy".to_string()));
        }
        Ok(())
    }
}
