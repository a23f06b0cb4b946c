//! Active connection switching and read state.

mod common;

use common::{build, view_counts};
use keepsake_protocol::Role;
use keepsake_test_utils::{InMemoryBackend, active_connection, memory};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn two_connections() -> Arc<InMemoryBackend> {
    Arc::new(
        InMemoryBackend::with_connections(vec![
            active_connection("x", "kate", "tom"),
            active_connection("y", "lena", "tom"),
        ])
        .signed_in_as("tom"),
    )
}

fn seed(backend: &InMemoryBackend, connection_id: &str, count: usize) {
    backend.seed(
        (0..count)
            .map(|n| {
                memory(
                    &format!("{connection_id}-{n}"),
                    connection_id,
                    Role::Keeper,
                    &format!("record {n}"),
                )
            })
            .collect(),
    );
}

/// A load that finishes after the user moved on leaves the view alone.
#[tokio::test]
async fn late_load_does_not_overwrite_the_view() {
    let backend = two_connections();
    seed(&backend, "x", 2);
    seed(&backend, "y", 3);
    let t = build(backend.clone());
    t.session.start().await.expect("start");

    backend.hold_loads("y");
    let to_y = t.session.switch_active("y").expect("switch to y");
    let to_x = t.session.switch_active("x").expect("switch to x");
    to_x.await.expect("join").expect("load x");
    assert_eq!(t.session.active_view().len(), 2);

    backend.release_loads("y");
    let late = to_y.await.expect("join").expect("load y");
    assert!(!late.view_updated);
    assert_eq!(late.count, 3);
    assert_eq!(t.session.active_connection_id(), Some("x".to_string()));
    assert_eq!(t.session.store().view_connection(), Some("x".to_string()));
    assert_eq!(t.session.active_view().len(), 2);
    assert_eq!(
        t.channel.joined().last().map(|params| params.connection_id.clone()),
        Some("x".to_string())
    );
}

/// Bouncing between X and a slow Y always shows X's cache at once.
#[tokio::test]
async fn rapid_switch_serves_cache_without_flash() {
    let backend = two_connections();
    seed(&backend, "x", 12);
    let t = build(backend.clone());
    t.session.start().await.expect("start");
    assert_eq!(t.session.active_view().len(), 12);

    backend.hold_loads("y");
    let mut slow = Vec::new();
    let mut fast = Vec::new();
    for _ in 0..3 {
        slow.push(t.session.switch_active("y").expect("switch to y"));
        fast.push(t.session.switch_active("x").expect("switch to x"));
        assert_eq!(t.session.active_view().len(), 12);
    }
    for handle in fast {
        handle.await.expect("join").expect("load x");
    }
    backend.release_loads("y");
    for handle in slow {
        let report = handle.await.expect("join").expect("load y");
        assert!(!report.view_updated);
    }

    assert_eq!(t.session.active_view().len(), 12);
    let counts = view_counts(&t.sink, "x");
    assert!(!counts.is_empty());
    assert!(counts.iter().all(|count| *count == 12));
}

/// Marking one connection read leaves the others' badges alone.
#[tokio::test]
async fn read_state_is_per_connection() {
    let backend = two_connections();
    seed(&backend, "x", 2);
    seed(&backend, "y", 3);
    let t = build(backend.clone());
    t.session.start().await.expect("start");

    let badges = t.session.refresh_unread().await.expect("unread");
    assert_eq!(badges.get("x"), Some(&2));
    assert_eq!(badges.get("y"), Some(&3));

    assert_eq!(t.session.mark_read("x").await.expect("mark"), 2);
    let badges = t.session.unread_counts();
    assert_eq!(badges.get("x"), Some(&0));
    assert_eq!(badges.get("y"), Some(&3));
    assert!(t.session.registry().last_read_at("x").is_some());
    assert!(t.session.registry().last_read_at("y").is_none());
    assert!(
        backend
            .memories("y")
            .iter()
            .all(|record| record.read_by.is_empty())
    );
}
