#![allow(dead_code)]

use keepsake_config::KeepsakeConfig;
use keepsake_protocol::{EventPayload, Memory, Role};
use keepsake_sync::{LocalStateStore, LocalUser, MemoryStateStore, SyncSession};
use keepsake_test_utils::{InMemoryBackend, LoopbackChannel, RecordingNotifier, RecordingSink};
use std::sync::Arc;

pub struct TestSession {
    pub session: SyncSession,
    pub backend: Arc<InMemoryBackend>,
    pub channel: Arc<LoopbackChannel>,
    pub notifier: Arc<RecordingNotifier>,
    pub sink: Arc<RecordingSink>,
}

/// The local user in every scenario: Tom, a teller.
pub fn teller() -> LocalUser {
    LocalUser::new("tom", "Tom", Role::Teller)
}

pub fn build(backend: Arc<InMemoryBackend>) -> TestSession {
    build_with(
        backend,
        KeepsakeConfig::default(),
        Arc::new(MemoryStateStore::new()),
    )
}

pub fn build_with(
    backend: Arc<InMemoryBackend>,
    config: KeepsakeConfig,
    state_store: Arc<dyn LocalStateStore>,
) -> TestSession {
    let channel = Arc::new(LoopbackChannel::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let sink = Arc::new(RecordingSink::new());
    let session = SyncSession::builder(config, teller(), backend.clone(), channel.clone())
        .notifier(notifier.clone())
        .state_store(state_store)
        .event_sink(sink.clone())
        .build()
        .expect("build session");
    TestSession {
        session,
        backend,
        channel,
        notifier,
        sink,
    }
}

pub fn contents(memories: &[Memory]) -> Vec<String> {
    memories.iter().map(|m| m.content.clone()).collect()
}

pub fn ids(memories: &[Memory]) -> Vec<String> {
    memories.iter().map(|m| m.id.clone()).collect()
}

/// `count` values of every `ActiveViewChanged` emitted for `connection_id`.
pub fn view_counts(sink: &RecordingSink, connection_id: &str) -> Vec<usize> {
    sink.payloads()
        .into_iter()
        .filter_map(|payload| match payload {
            EventPayload::ActiveViewChanged {
                connection_id: id,
                count,
            } if id == connection_id => Some(count),
            _ => None,
        })
        .collect()
}
