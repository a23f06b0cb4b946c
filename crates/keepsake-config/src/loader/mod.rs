//! Layered configuration loader.
//!
//! Discovers configuration layers (system/user/cwd/runtime), validates schema,
//! merges them, and produces a final `KeepsakeConfig`.

mod layer_io;
mod merge;
mod schema;

#[cfg(test)]
mod tests;

use crate::{ConfigError, KeepsakeConfig, MAX_NOTIFICATION_WINDOW_MS};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// File name looked up in every layer location.
const DEFAULT_CONFIG_FILE: &str = "keepsake.json5";
/// Default config directory under the user home.
const DEFAULT_CONFIG_DIR: &str = ".keepsake";

/// System-wide layer location for this platform, if any.
#[cfg(unix)]
const SYSTEM_CONFIG_PATH: Option<&str> = Some("/etc/keepsake/keepsake.json5");
#[cfg(windows)]
const SYSTEM_CONFIG_PATH: Option<&str> = Some("C:\\ProgramData\\keepsake\\keepsake.json5");
#[cfg(not(any(unix, windows)))]
const SYSTEM_CONFIG_PATH: Option<&str> = None;

/// Merged config together with the files that produced it.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// Validated result of merging every layer.
    pub config: KeepsakeConfig,
    /// Contributing layers, lowest precedence first.
    pub layers: Vec<ConfigLayer>,
}

/// Where a layer was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// Machine-wide file under `/etc/keepsake`.
    System,
    /// `~/.keepsake/keepsake.json5`
    User,
    /// `keepsake.json5` in the working directory.
    Cwd,
    /// Paths passed explicitly; these win over everything else.
    Runtime,
}

impl ConfigLayerSource {
    /// Label used in log lines and validation errors, e.g. `user(/home/a/.keepsake/keepsake.json5)`.
    pub fn label(self, path: &Path) -> String {
        let name = match self {
            ConfigLayerSource::System => "system",
            ConfigLayerSource::User => "user",
            ConfigLayerSource::Cwd => "cwd",
            ConfigLayerSource::Runtime => "runtime",
        };
        format!("{name}({})", path.display())
    }
}

/// Metadata about a loaded config layer.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub source: ConfigLayerSource,
    pub path: Option<PathBuf>,
}

/// Layer locations; tests point these at temp files.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory holding an optional `keepsake.json5`.
    pub cwd: PathBuf,
    /// Optional system config path (defaults to `/etc/keepsake/keepsake.json5` on Unix).
    pub system_config_path: Option<PathBuf>,
    /// Optional user config path (defaults to `~/.keepsake/keepsake.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Explicit files merged last, in order.
    pub runtime_paths: Vec<PathBuf>,
}

impl LayeredConfigOptions {
    /// Default locations with `cwd` as the working directory.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: layer_io::default_system_config_path(),
            user_config_path: layer_io::default_user_config_path(),
            runtime_paths: Vec::new(),
        }
    }

    /// Append an explicit file; it must exist when loading.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl KeepsakeConfig {
    /// Read exactly one file, ignoring the layer stack.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("loading config (path={})", path.display());
        let label = path.display().to_string();
        let value = layer_io::read_required_document(path, &label)?;
        config_from_value(value, &label)
    }

    /// Parse JSON5 text directly.
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading inline config (len={})", contents.len());
        let value = layer_io::parse_document(contents, "inline")?;
        config_from_value(value, "inline")
    }

    /// Merge system, user and cwd layers found from `cwd`.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        info!(
            "resolving config layers (cwd={})",
            cwd.as_ref().display()
        );
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load a layered config stack using explicit layer locations.
    ///
    /// Layer precedence (low -> high): system, user, cwd, runtime overrides.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let mut layers = Vec::new();
        let mut values = Vec::new();
        let mut seen = HashSet::new();

        let cwd_path = options.cwd.join(DEFAULT_CONFIG_FILE);
        let candidates = [
            (
                ConfigLayerSource::System,
                options.system_config_path.clone(),
            ),
            (ConfigLayerSource::User, options.user_config_path.clone()),
            (ConfigLayerSource::Cwd, Some(cwd_path)),
        ];
        for (source, path) in candidates {
            let Some(layer) = layer_io::load_optional_layer(source, path.as_deref())? else {
                continue;
            };
            if !seen.insert(layer_io::dedup_key(&layer.path)) {
                debug!(
                    "skipping duplicate layer (source={:?}, path={})",
                    source,
                    layer.path.display()
                );
                continue;
            }
            debug!("loaded {:?} layer", source);
            layers.push(layer.meta());
            values.push(layer.value);
        }

        for runtime_path in &options.runtime_paths {
            let loaded = layer_io::load_required_layer(ConfigLayerSource::Runtime, runtime_path)?;
            layers.push(loaded.meta());
            values.push(loaded.value);
        }

        let mut merged = Value::Object(serde_json::Map::new());
        for value in &values {
            merge::merge_json_values(&mut merged, value);
        }

        let config = config_from_value(merged, "effective")?;
        info!("config resolved (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Cross-field rules the schema check cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_retries must be at least 1".to_string(),
            ));
        }
        if self.sync.refresh_interval_secs == 0 || self.sync.unread_refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync refresh intervals must be positive".to_string(),
            ));
        }
        if self.sync.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "sync.event_buffer must be positive".to_string(),
            ));
        }
        for (key, value) in [
            ("recency_window_ms", self.notifications.recency_window_ms),
            ("throttle_ms", self.notifications.throttle_ms),
        ] {
            if value > MAX_NOTIFICATION_WINDOW_MS {
                return Err(ConfigError::Invalid(format!(
                    "notifications.{key} must not exceed {MAX_NOTIFICATION_WINDOW_MS}"
                )));
            }
        }
        if self.notifications.preview_chars == 0 {
            return Err(ConfigError::Invalid(
                "notifications.preview_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A parsed, schema-checked layer waiting to be merged.
#[derive(Debug, Clone)]
struct LoadedLayer {
    source: ConfigLayerSource,
    path: PathBuf,
    value: Value,
}

impl LoadedLayer {
    fn new(source: ConfigLayerSource, path: &Path, value: Value) -> Self {
        Self {
            source,
            path: path.to_path_buf(),
            value,
        }
    }

    fn meta(&self) -> ConfigLayer {
        ConfigLayer {
            source: self.source,
            path: Some(self.path.clone()),
        }
    }
}

fn config_from_value(value: Value, label: &str) -> Result<KeepsakeConfig, ConfigError> {
    schema::validate_layer_schema(&value, label)?;
    let config: KeepsakeConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
