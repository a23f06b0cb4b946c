//! Tests for layered configuration loading.

use super::*;
use crate::{QueueConfig, StateConfig};
use keepsake_protocol::MemoryKind;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write JSON5 contents to a path, creating parent directories if needed.
fn write_json5(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("dir");
    }
    fs::write(path, contents).expect("write");
}

fn isolated_options(root: &Path, cwd: &Path) -> LayeredConfigOptions {
    LayeredConfigOptions {
        cwd: cwd.to_path_buf(),
        system_config_path: Some(root.join("system.json5")),
        user_config_path: Some(root.join("user.json5")),
        runtime_paths: Vec::new(),
    }
}

#[test]
fn parse_minimal_config() {
    let config = KeepsakeConfig::load_from_str("{}").expect("config");
    assert_eq!(config.queue.max_retries, 5);
    assert_eq!(config.sync.refresh_interval_secs, 120);
    assert_eq!(config.sync.unread_refresh_interval_secs, 300);
    assert_eq!(config.notifications.recency_window_ms, 10_000);
    assert_eq!(config.notifications.throttle_ms, 1_000);
    assert_eq!(
        config.notifications.notifiable_kinds,
        vec![MemoryKind::Text, MemoryKind::Voice]
    );
}

#[test]
fn rejects_unknown_top_level_key() {
    let err = KeepsakeConfig::load_from_str("{ unexpected: true }").unwrap_err();
    assert!(format!("{err}").contains("unknown key"));
}

#[test]
fn rejects_unknown_memory_kind() {
    let json5 = r#"{ notifications: { notifiable_kinds: ["text", "sticker"] } }"#;
    let err = KeepsakeConfig::load_from_str(json5).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("notifications.notifiable_kinds[1]"), "{msg}");
}

#[test]
fn rejects_zero_retry_cap() {
    let err = KeepsakeConfig::load_from_str("{ queue: { max_retries: 0 } }").unwrap_err();
    assert!(format!("{err}").contains("max_retries"));
}

#[test]
fn rejects_negative_interval() {
    let err =
        KeepsakeConfig::load_from_str("{ sync: { refresh_interval_secs: -5 } }").unwrap_err();
    assert!(format!("{err}").contains("sync.refresh_interval_secs"));
}

#[test]
fn layered_config_applies_precedence() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    let cwd = root.join("work");
    fs::create_dir_all(&cwd).expect("cwd");

    write_json5(
        &root.join("system.json5"),
        "{ queue: { max_retries: 2 }, sync: { event_buffer: 16 } }",
    );
    write_json5(&root.join("user.json5"), "{ queue: { max_retries: 3 } }");
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        "{ notifications: { throttle_ms: 250 } }",
    );
    let runtime = root.join("runtime.json5");
    write_json5(&runtime, "{ queue: { max_retries: 7 } }");

    let options = isolated_options(root, &cwd).with_runtime_path(&runtime);
    let layered = KeepsakeConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.config.queue.max_retries, 7);
    assert_eq!(layered.config.sync.event_buffer, 16);
    assert_eq!(layered.config.notifications.throttle_ms, 250);
    let sources: Vec<ConfigLayerSource> = layered.layers.iter().map(|l| l.source).collect();
    assert_eq!(
        sources,
        vec![
            ConfigLayerSource::System,
            ConfigLayerSource::User,
            ConfigLayerSource::Cwd,
            ConfigLayerSource::Runtime
        ]
    );
}

#[test]
fn layered_config_skips_missing_layers() {
    let temp = TempDir::new().expect("tmp");
    let layered = KeepsakeConfig::load_layered_with_options(isolated_options(
        temp.path(),
        temp.path(),
    ))
    .expect("layered");
    assert!(layered.layers.is_empty());
    assert_eq!(layered.config.queue.max_retries, 5);
}

#[test]
fn invalid_layer_reports_its_origin() {
    let temp = TempDir::new().expect("tmp");
    write_json5(
        &temp.path().join("user.json5"),
        "{ state: { path: 42 } }",
    );
    let err = KeepsakeConfig::load_layered_with_options(isolated_options(
        temp.path(),
        temp.path(),
    ))
    .unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("user("), "{msg}");
    assert!(msg.contains("state.path"), "{msg}");
}

#[test]
fn builder_replaces_sections() {
    let config = KeepsakeConfig::builder()
        .queue(QueueConfig { max_retries: 2 })
        .state(StateConfig {
            path: Some("/tmp/keepsake".to_string()),
        })
        .build();
    assert_eq!(config.queue.max_retries, 2);
    assert_eq!(config.state.path.as_deref(), Some("/tmp/keepsake"));
    assert!(config.validate().is_ok());
}

#[test]
fn missing_runtime_layer_is_an_error() {
    let temp = TempDir::new().expect("tmp");
    let options = isolated_options(temp.path(), temp.path())
        .with_runtime_path(temp.path().join("absent.json5"));
    let err = KeepsakeConfig::load_layered_with_options(options).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }), "{err}");
}

#[test]
fn syntax_errors_name_the_source() {
    let err = KeepsakeConfig::load_from_str("{ queue: ").unwrap_err();
    assert!(format!("{err}").starts_with("inline is not valid JSON5"));
}

#[test]
fn rejects_unbounded_notification_windows() {
    let json5 = format!(
        "{{ notifications: {{ throttle_ms: {} }} }}",
        MAX_NOTIFICATION_WINDOW_MS + 1
    );
    let err = KeepsakeConfig::load_from_str(&json5).unwrap_err();
    assert!(format!("{err}").contains("notifications.throttle_ms"), "{err}");
    let week =
        format!("{{ notifications: {{ recency_window_ms: {MAX_NOTIFICATION_WINDOW_MS} }} }}");
    assert!(KeepsakeConfig::load_from_str(&week).is_ok());
}
