use super::*;
use crate::state::MemoryStateStore;
use chrono::Utc;
use keepsake_protocol::{MemoryPatch, PresenceState, Role};
use keepsake_test_utils::{
    InMemoryBackend, LoopbackChannel, RecordingNotifier, RecordingSink, StaticEnricher,
    active_connection, eventually, memory,
};
use pretty_assertions::assert_eq;

struct Harness {
    session: SyncSession,
    backend: Arc<InMemoryBackend>,
    channel: Arc<LoopbackChannel>,
    sink: Arc<RecordingSink>,
}

fn harness_with(
    backend: InMemoryBackend,
    customize: impl FnOnce(SyncSessionBuilder) -> SyncSessionBuilder,
) -> Harness {
    let backend = Arc::new(backend);
    let channel = Arc::new(LoopbackChannel::new());
    let sink = Arc::new(RecordingSink::new());
    let builder = SyncSession::builder(
        KeepsakeConfig::default(),
        LocalUser::new("tom", "Tom", Role::Teller),
        backend.clone(),
        channel.clone(),
    )
    .state_store(Arc::new(MemoryStateStore::new()))
    .event_sink(sink.clone());
    let session = customize(builder).build().expect("build session");
    Harness {
        session,
        backend,
        channel,
        sink,
    }
}

fn harness(backend: InMemoryBackend) -> Harness {
    harness_with(backend, |builder| builder)
}

fn one_connection() -> InMemoryBackend {
    InMemoryBackend::with_connections(vec![active_connection("c1", "kate", "tom")])
        .signed_in_as("tom")
}

#[tokio::test]
async fn start_loads_last_active_and_joins_channel() {
    let backend = one_connection();
    backend.seed(vec![memory("m1", "c1", Role::Keeper, "hello")]);
    let h = harness(backend);

    assert_eq!(h.session.start().await.expect("start"), Some("c1".to_string()));
    assert_eq!(h.session.active_view().len(), 1);
    assert_eq!(h.channel.joined().len(), 1);
    assert_eq!(h.channel.joined()[0].user_name, "Tom");
    assert_eq!(h.channel.subscriber_count(), 1);
    assert_eq!(
        h.sink.count(|payload| matches!(
            payload,
            EventPayload::ActiveViewChanged { count: 1, .. }
        )),
        1
    );
}

#[tokio::test]
async fn offline_create_is_queued_without_touching_the_view() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");
    h.session.set_online(false);

    let delivery = h
        .session
        .create_memory(NewMemory::text("c1", Role::Teller, "hello"))
        .await
        .expect("create");
    assert!(delivery.is_queued());
    assert_eq!(h.session.queue().len(), 1);
    assert!(h.session.active_view().is_empty());
    assert_eq!(
        h.sink
            .count(|payload| matches!(payload, EventPayload::OperationQueued { .. })),
        1
    );
    assert_eq!(
        h.sink.count(|payload| matches!(
            payload,
            EventPayload::ConnectivityChanged { online: false }
        )),
        1
    );
}

#[tokio::test]
async fn invalid_create_is_rejected_not_queued() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");
    h.session.set_online(false);

    let result = h
        .session
        .create_memory(NewMemory::text("c1", Role::Teller, "   "))
        .await;
    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert!(h.session.queue().is_empty());
}

#[tokio::test]
async fn transient_create_failure_rolls_back_and_queues() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");
    h.backend.set_offline(true);

    let delivery = h
        .session
        .create_memory(NewMemory::text("c1", Role::Teller, "hello"))
        .await
        .expect("create");
    assert!(delivery.is_queued());
    assert!(h.session.active_view().is_empty());
    assert!(h.backend.calls().contains(&"create_memory:c1".to_string()));
}

#[tokio::test]
async fn rejected_create_is_returned_to_the_caller() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");
    h.backend.reject_creates(true);

    let result = h
        .session
        .create_memory(NewMemory::text("c1", Role::Teller, "hello"))
        .await;
    assert!(matches!(result, Err(SyncError::Backend(_))));
    assert!(h.session.queue().is_empty());
    assert!(h.session.active_view().is_empty());
}

#[tokio::test]
async fn online_create_is_broadcast_with_local_origin() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");

    let created = h
        .session
        .create_memory(NewMemory::text("c1", Role::Teller, "hello"))
        .await
        .expect("create")
        .confirmed()
        .expect("confirmed");
    assert_eq!(created.id, "srv-1");
    assert_eq!(h.session.active_view()[0].id, "srv-1");

    let broadcasts = h.channel.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].origin_user_id, "tom");
    assert_eq!(broadcasts[0].memory_id, "srv-1");
}

#[tokio::test]
async fn offline_update_applies_locally_then_replays() {
    let backend = one_connection();
    backend.seed(vec![memory("m1", "c1", Role::Teller, "draft")]);
    let h = harness(backend);
    h.session.start().await.expect("start");
    h.session.set_online(false);

    let patch = MemoryPatch {
        content: Some("edited".to_string()),
        ..MemoryPatch::default()
    };
    let delivery = h
        .session
        .update_memory("c1", "m1", patch)
        .await
        .expect("update");
    assert!(delivery.is_queued());
    assert_eq!(h.session.active_view()[0].content, "edited");
    assert_eq!(h.backend.memories("c1")[0].content, "draft");

    h.session.set_online(true);
    assert!(eventually(|| h.session.queue().is_empty()).await);
    assert_eq!(h.backend.memories("c1")[0].content, "edited");
}

#[tokio::test]
async fn offline_delete_removes_locally_and_profile_waits_in_queue() {
    let backend = one_connection();
    backend.seed(vec![memory("m1", "c1", Role::Teller, "gone soon")]);
    let h = harness(backend);
    h.session.start().await.expect("start");
    h.session.set_online(false);

    h.session.delete_memory("c1", "m1").await.expect("delete");
    h.session
        .update_profile(ProfileUpdate {
            display_name: Some("Tommy".to_string()),
            avatar_url: None,
        })
        .await
        .expect("profile");
    assert!(h.session.active_view().is_empty());
    assert_eq!(h.session.queue_stats().depth, 2);

    let report = h.session.process_queue_now().await;
    assert_eq!(report.processed, 2);
    assert!(h.backend.memories("c1").is_empty());
    assert_eq!(h.backend.profile_updates().len(), 1);
}

#[tokio::test]
async fn auth_failure_is_reported_once_until_reauthenticated() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");
    h.backend.set_unauthorized(true);

    assert!(h.session.refresh().await.is_err());
    assert!(h.session.refresh_unread().await.is_ok());
    assert!(h.session.refresh().await.is_err());
    assert!(h.session.auth_failed());
    assert_eq!(
        h.sink
            .count(|payload| matches!(payload, EventPayload::AuthRequired { .. })),
        1
    );

    h.backend.set_unauthorized(false);
    h.session.reauthenticated().await.expect("refresh");
    assert!(!h.session.auth_failed());
}

#[tokio::test]
async fn start_fails_on_rejected_credentials() {
    let backend = one_connection();
    backend.set_unauthorized(true);
    let h = harness(backend);
    let err = h.session.start().await.expect_err("unauthorized");
    assert!(err.is_unauthorized());
    assert_eq!(
        h.sink
            .count(|payload| matches!(payload, EventPayload::AuthRequired { .. })),
        1
    );
}

#[tokio::test]
async fn start_survives_an_unreachable_backend() {
    let backend = one_connection();
    backend.set_offline(true);
    let h = harness(backend);
    assert_eq!(h.session.start().await.expect("start"), None);
}

#[tokio::test]
async fn presence_tracks_the_partner() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");
    assert!(!h.session.is_partner_online("c1"));

    let mut snapshot = PresenceMap::new();
    snapshot.insert(
        "kate".to_string(),
        PresenceState {
            user_id: "kate".to_string(),
            last_seen_at: Utc::now(),
            online: true,
        },
    );
    h.channel.inject_presence(snapshot);

    assert!(eventually(|| h.session.is_partner_online("c1")).await);
    assert_eq!(
        h.sink.count(|payload| matches!(
            payload,
            EventPayload::PresenceChanged { online, .. } if online == &vec!["kate".to_string()]
        )),
        1
    );
}

#[tokio::test]
async fn shutdown_releases_the_channel() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");
    h.session.shutdown().await;

    assert_eq!(h.channel.disconnects(), 1);
    assert!(eventually(|| h.channel.subscriber_count() == 0).await);
    assert!(h.session.presence().is_empty());
}

#[tokio::test]
async fn shutdown_cancels_a_pending_switch() {
    let backend = InMemoryBackend::with_connections(vec![
        active_connection("x", "kate", "tom"),
        active_connection("y", "lena", "tom"),
    ])
    .signed_in_as("tom");
    let h = harness(backend);
    h.session.start().await.expect("start");
    assert_eq!(h.channel.joined().len(), 1);

    h.backend.hold_loads("y");
    let switch = h.session.switch_active("y").expect("switch");
    h.session.shutdown().await;
    h.backend.release_loads("y");

    assert!(switch.await.is_err_and(|err| err.is_cancelled()));
    tokio::task::yield_now().await;
    assert_eq!(h.channel.joined().len(), 1);
    assert_eq!(h.channel.subscriber_count(), 0);

    h.channel.inject(RealtimeEvent::create(
        memory("late", "y", Role::Keeper, "late"),
        "lena".to_string(),
    ));
    tokio::task::yield_now().await;
    assert!(h.session.store().cached("y").is_empty());
}

#[tokio::test]
async fn sign_out_keeps_the_durable_queue() {
    let h = harness(one_connection());
    h.session.start().await.expect("start");
    h.session.set_online(false);
    h.session
        .create_memory(NewMemory::text("c1", Role::Teller, "later"))
        .await
        .expect("create");

    h.session.sign_out().await;
    assert!(h.session.registry().connections().is_empty());
    assert_eq!(h.session.active_connection_id(), None);
    assert_eq!(h.session.queue().len(), 1);
}

#[tokio::test]
async fn notification_prompt_is_offered_once() {
    let notifier = Arc::new(RecordingNotifier::new());
    let h = harness_with(one_connection(), |builder| builder.notifier(notifier.clone()));
    assert!(h.session.should_prompt_for_notifications().await);

    h.session
        .mark_notification_prompt_shown()
        .expect("persist flag");
    assert!(!h.session.should_prompt_for_notifications().await);
}

#[tokio::test]
async fn enrichment_merges_tags_after_create() {
    let enricher = Arc::new(StaticEnricher::with_patch(MemoryPatch {
        tags: Some(vec!["family".to_string()]),
        ..MemoryPatch::default()
    }));
    let h = harness_with(one_connection(), |builder| builder.enricher(enricher.clone()));
    h.session.start().await.expect("start");

    h.session
        .create_memory(NewMemory::text("c1", Role::Teller, "picnic"))
        .await
        .expect("create");
    assert!(eventually(|| h.backend.memories("c1")[0].tags == vec!["family".to_string()]).await);
    assert!(
        eventually(|| h
            .session
            .active_view()
            .first()
            .is_some_and(|m| m.tags == vec!["family".to_string()]))
        .await
    );
    assert_eq!(enricher.seen(), vec!["srv-1".to_string()]);
}

#[tokio::test]
async fn failed_enrichment_leaves_the_record() {
    let enricher = Arc::new(StaticEnricher::failing());
    let h = harness_with(one_connection(), |builder| builder.enricher(enricher.clone()));
    h.session.start().await.expect("start");

    h.session
        .create_memory(NewMemory::text("c1", Role::Teller, "picnic"))
        .await
        .expect("create");
    assert!(eventually(|| enricher.seen().len() == 1).await);
    assert_eq!(h.session.active_view().len(), 1);
    assert!(h.session.active_view()[0].tags.is_empty());
}

#[tokio::test]
async fn notification_click_focuses_and_marks_read() {
    let backend = InMemoryBackend::with_connections(vec![
        active_connection("c1", "kate", "tom"),
        active_connection("c2", "lena", "tom"),
    ])
    .signed_in_as("tom");
    backend.seed(vec![memory("m1", "c2", Role::Keeper, "hi from lena")]);
    let h = harness(backend);
    h.session.start().await.expect("start");
    h.session.set_app_focused(false);
    assert_eq!(h.session.active_connection_id(), Some("c1".to_string()));

    let marked = h
        .session
        .handle_notification_action(&NotificationAction::FocusConnection {
            connection_id: "c2".to_string(),
        })
        .await
        .expect("action");
    assert_eq!(marked, 1);
    assert_eq!(h.session.active_connection_id(), Some("c2".to_string()));
    assert_eq!(h.session.unread_counts().get("c2"), Some(&0));
    assert!(h.session.dispatcher().is_focused());
}

#[tokio::test]
async fn mark_active_read_needs_a_selection() {
    let h = harness(InMemoryBackend::new());
    h.session.start().await.expect("start");
    assert!(matches!(
        h.session.mark_active_read().await,
        Err(SyncError::NoActiveConnection)
    ));
}
