//! Broadcast event bus for UI consumers of a sync session.

use keepsake_config::SyncConfig;
use keepsake_protocol::{EventMsg, EventSink};
use log::{debug, trace};
use tokio::sync::broadcast;

/// Broadcast-backed event sink; every subscriber sees every engine event.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EventMsg>,
}

impl EventBus {
    /// Create a new event bus with the given channel buffer size.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        debug!("event bus initialized (buffer={})", buffer);
        Self { sender }
    }

    /// Size the bus from `sync.event_buffer`.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.event_buffer)
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventMsg> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: EventMsg) {
        if self.sender.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }
}
