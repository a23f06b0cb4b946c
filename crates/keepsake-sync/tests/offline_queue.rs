//! Offline queueing, replay, and persistence across restarts.

mod common;

use common::{build, build_with, contents};
use keepsake_config::{KeepsakeConfig, QueueConfig};
use keepsake_protocol::{EventPayload, NewMemory, Role};
use keepsake_sync::{JsonStateStore, LocalStateStore, MemoryStateStore};
use keepsake_test_utils::{InMemoryBackend, active_connection, eventually};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::tempdir;

fn backend() -> Arc<InMemoryBackend> {
    Arc::new(InMemoryBackend::with_connections(vec![
        active_connection("c1", "kate", "tom"),
        active_connection("c2", "lena", "tom"),
    ]))
}

/// Three creates made offline reach the backend in order once online.
#[tokio::test]
async fn offline_creates_replay_in_order() {
    let t = build(backend());
    t.session.start().await.expect("start");
    t.session.set_online(false);

    for text in ["one", "two", "three"] {
        let delivery = t
            .session
            .create_memory(NewMemory::text("c1", Role::Teller, text))
            .await
            .expect("create");
        assert!(delivery.is_queued());
    }
    assert_eq!(t.session.queue().len(), 3);
    assert!(t.session.active_view().is_empty());

    t.session.set_online(true);
    assert!(eventually(|| t.session.queue().is_empty()).await);
    assert_eq!(contents(&t.backend.memories("c1")), vec!["one", "two", "three"]);
    assert_eq!(contents(&t.session.active_view()), vec!["one", "two", "three"]);
    assert!(
        eventually(|| t.sink.count(|payload| matches!(
            payload,
            EventPayload::QueueSynced {
                processed: 3,
                failed: 0,
                remaining: 0
            }
        )) == 1)
        .await
    );
    assert_eq!(t.channel.broadcasts().len(), 3);
}

/// A failed replay keeps the order and bumps the retry count of the head.
#[tokio::test]
async fn failed_replay_keeps_order() {
    let t = build(backend());
    t.session.start().await.expect("start");
    t.session.set_online(false);
    for text in ["first", "second"] {
        t.session
            .create_memory(NewMemory::text("c1", Role::Teller, text))
            .await
            .expect("create");
    }

    t.backend.reject_creates(true);
    t.session.set_online(true);
    assert!(
        eventually(|| {
            let stats = t.session.queue_stats();
            stats.max_retry_count == 1 && !stats.processing
        })
        .await
    );
    let queued = t.session.queue().list();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].retry_count, 1);
    assert!(queued[0].last_error.is_some());
    assert_eq!(queued[1].retry_count, 0);

    t.backend.reject_creates(false);
    let report = t.session.process_queue_now().await;
    assert_eq!(report.processed, 2);
    assert_eq!(contents(&t.backend.memories("c1")), vec!["first", "second"]);
}

/// An operation that keeps failing is dropped and reported.
#[tokio::test]
async fn exhausted_operation_is_reported() {
    let config = KeepsakeConfig::builder()
        .queue(QueueConfig { max_retries: 1 })
        .build();
    let t = build_with(backend(), config, Arc::new(MemoryStateStore::new()));
    t.session.start().await.expect("start");
    t.session.set_online(false);
    for text in ["doomed", "next"] {
        t.session
            .create_memory(NewMemory::text("c1", Role::Teller, text))
            .await
            .expect("create");
    }
    t.backend.reject_creates(true);

    let report = t.session.process_queue_now().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.exhausted.len(), 1);
    assert_eq!(report.remaining, 1);
    assert_eq!(
        t.sink
            .count(|payload| matches!(payload, EventPayload::QueueOperationFailed { .. })),
        1
    );
}

/// The queue and the last active connection survive a restart.
#[tokio::test]
async fn queue_survives_restart() {
    let temp = tempdir().expect("tempdir");
    let backend = backend();
    let store: Arc<dyn LocalStateStore> =
        Arc::new(JsonStateStore::new(temp.path()).expect("state store"));

    let first = build_with(backend.clone(), KeepsakeConfig::default(), store);
    first.session.start().await.expect("start");
    first
        .session
        .switch_active("c2")
        .expect("switch")
        .await
        .expect("join")
        .expect("load");
    first.session.set_online(false);
    first
        .session
        .create_memory(NewMemory::text("c2", Role::Teller, "written offline"))
        .await
        .expect("create");
    first.session.shutdown().await;
    drop(first);
    assert!(backend.memories("c2").is_empty());

    let store: Arc<dyn LocalStateStore> =
        Arc::new(JsonStateStore::new(temp.path()).expect("state store"));
    let second = build_with(backend.clone(), KeepsakeConfig::default(), store.clone());
    assert_eq!(
        second.session.start().await.expect("start"),
        Some("c2".to_string())
    );
    assert!(second.session.queue().is_empty());
    assert_eq!(contents(&backend.memories("c2")), vec!["written offline"]);
    assert_eq!(contents(&second.session.active_view()), vec!["written offline"]);
    assert!(
        store
            .load("tom")
            .expect("state")
            .pending_operations
            .is_empty()
    );
}
