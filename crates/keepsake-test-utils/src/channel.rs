use async_trait::async_trait;
use keepsake_protocol::{BackendError, ChannelParams, PresenceMap, RealtimeChannel, RealtimeEvent};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Realtime channel where tests play the role of the other clients.
///
/// Outbound broadcasts are recorded, never echoed back to subscribers.
pub struct LoopbackChannel {
    memory_tx: broadcast::Sender<RealtimeEvent>,
    presence_tx: broadcast::Sender<PresenceMap>,
    state: Mutex<LoopbackState>,
}

#[derive(Default)]
struct LoopbackState {
    joined: Vec<ChannelParams>,
    broadcasts: Vec<RealtimeEvent>,
    disconnects: usize,
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackChannel {
    pub fn new() -> Self {
        let (memory_tx, _) = broadcast::channel(64);
        let (presence_tx, _) = broadcast::channel(16);
        Self {
            memory_tx,
            presence_tx,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    /// Deliver an event as if another client had broadcast it.
    pub fn inject(&self, event: RealtimeEvent) -> usize {
        self.memory_tx.send(event).unwrap_or(0)
    }

    pub fn inject_presence(&self, presence: PresenceMap) -> usize {
        self.presence_tx.send(presence).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.memory_tx.receiver_count()
    }

    pub fn joined(&self) -> Vec<ChannelParams> {
        self.state.lock().joined.clone()
    }

    pub fn broadcasts(&self) -> Vec<RealtimeEvent> {
        self.state.lock().broadcasts.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }
}

#[async_trait]
impl RealtimeChannel for LoopbackChannel {
    async fn connect(&self, params: &ChannelParams) -> Result<(), BackendError> {
        self.state.lock().joined.push(params.clone());
        Ok(())
    }

    fn subscribe_presence(&self) -> broadcast::Receiver<PresenceMap> {
        self.presence_tx.subscribe()
    }

    fn subscribe_memory_updates(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.memory_tx.subscribe()
    }

    async fn broadcast_memory_update(&self, event: &RealtimeEvent) -> Result<(), BackendError> {
        self.state.lock().broadcasts.push(event.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.state.lock().disconnects += 1;
        Ok(())
    }
}
