//! Schema validation helpers for Keepsake JSON5 configuration.

use crate::ConfigError;
use serde_json::{Map, Value};

const MEMORY_KINDS: &[&str] = &["text", "photo", "voice", "video", "document"];

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    ensure_allowed_keys(
        map,
        &["$schema", "sync", "queue", "notifications", "state"],
        layer,
        "",
    )?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("sync") {
        validate_sync(value, layer, "sync")?;
    }
    if let Some(value) = map.get("queue") {
        validate_queue(value, layer, "queue")?;
    }
    if let Some(value) = map.get("notifications") {
        validate_notifications(value, layer, "notifications")?;
    }
    if let Some(value) = map.get("state") {
        validate_state(value, layer, "state")?;
    }

    Ok(())
}

/// Validate the "sync" block.
fn validate_sync(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let keys = [
        "refresh_interval_secs",
        "unread_refresh_interval_secs",
        "event_buffer",
    ];
    ensure_allowed_keys(map, &keys, layer, path)?;
    for key in keys {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

/// Validate the "queue" block.
fn validate_queue(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["max_retries"], layer, path)?;
    if let Some(value) = map.get("max_retries") {
        expect_u64(value, layer, &join_path(path, "max_retries"))?;
    }
    Ok(())
}

/// Validate the "notifications" block.
fn validate_notifications(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "enabled",
            "recency_window_ms",
            "throttle_ms",
            "notifiable_kinds",
            "preview_chars",
            "voice_placeholder",
            "sound",
            "vibrate",
            "icon",
        ],
        layer,
        path,
    )?;
    for key in ["enabled", "sound", "vibrate"] {
        if let Some(value) = map.get(key) {
            expect_bool(value, layer, &join_path(path, key))?;
        }
    }
    for key in ["recency_window_ms", "throttle_ms", "preview_chars"] {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    for key in ["voice_placeholder", "icon"] {
        if let Some(value) = map.get(key) {
            expect_string(value, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("notifiable_kinds") {
        validate_memory_kinds(value, layer, &join_path(path, "notifiable_kinds"))?;
    }
    Ok(())
}

/// Validate the "state" block.
fn validate_state(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["path"], layer, path)?;
    if let Some(value) = map.get("path") {
        expect_string(value, layer, &join_path(path, "path"))?;
    }
    Ok(())
}

/// Validate a list of memory kind names.
fn validate_memory_kinds(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let Value::Array(arr) = value else {
        return Err(invalid_field(layer, path, "expected array"));
    };
    for (idx, entry) in arr.iter().enumerate() {
        match entry.as_str() {
            Some(kind) if MEMORY_KINDS.contains(&kind) => {}
            _ => {
                return Err(invalid_field(
                    layer,
                    &format!("{path}[{idx}]"),
                    "expected one of text, photo, voice, video, document",
                ));
            }
        }
    }
    Ok(())
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

/// Expect a JSON string or return a typed error.
fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.as_str().is_some() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected string"))
    }
}

/// Expect a JSON boolean or return a typed error.
fn expect_bool(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if matches!(value, Value::Bool(_)) {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected bool"))
    }
}

/// Expect a non-negative JSON integer or return a typed error.
fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_u64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected non-negative integer"))
    }
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
