use keepsake_protocol::{EventMsg, EventPayload, EventSink};
use parking_lot::Mutex;

/// Event sink that keeps every emitted event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EventMsg>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventMsg> {
        self.events.lock().clone()
    }

    pub fn payloads(&self) -> Vec<EventPayload> {
        self.events
            .lock()
            .iter()
            .map(|event| event.payload.clone())
            .collect()
    }

    /// Number of recorded payloads matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&EventPayload) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| predicate(&event.payload))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EventMsg) {
        self.events.lock().push(event);
    }
}
