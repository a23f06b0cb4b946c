//! Reading config layers from disk and locating the default ones.

use super::{
    ConfigLayerSource, DEFAULT_CONFIG_DIR, DEFAULT_CONFIG_FILE, LoadedLayer, SYSTEM_CONFIG_PATH,
    schema,
};
use crate::ConfigError;
use directories::UserDirs;
use log::debug;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Parse JSON5 text, labelling syntax errors with where the text came from.
pub(super) fn parse_document(contents: &str, label: &str) -> Result<Value, ConfigError> {
    json5::from_str(contents).map_err(|source| ConfigError::Syntax {
        label: label.to_string(),
        source,
    })
}

/// Read and parse one file; a missing file yields `None`.
fn read_document(path: &Path, label: &str) -> Result<Option<Value>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    parse_document(&contents, label).map(Some)
}

/// Read a file that must exist.
pub(super) fn read_required_document(path: &Path, label: &str) -> Result<Value, ConfigError> {
    read_document(path, label)?.ok_or_else(|| ConfigError::Read {
        path: path.to_path_buf(),
        source: std::io::Error::from(ErrorKind::NotFound),
    })
}

/// Load a discovered layer; absent files are skipped.
pub(super) fn load_optional_layer(
    source: ConfigLayerSource,
    path: Option<&Path>,
) -> Result<Option<LoadedLayer>, ConfigError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let label = source.label(path);
    let Some(value) = read_document(path, &label)? else {
        debug!("config layer absent (layer={})", label);
        return Ok(None);
    };
    schema::validate_layer_schema(&value, &label)?;
    Ok(Some(LoadedLayer::new(source, path, value)))
}

/// Load an explicitly requested layer; a missing file is an error.
pub(super) fn load_required_layer(
    source: ConfigLayerSource,
    path: &Path,
) -> Result<LoadedLayer, ConfigError> {
    let label = source.label(path);
    let value = read_required_document(path, &label)?;
    schema::validate_layer_schema(&value, &label)?;
    Ok(LoadedLayer::new(source, path, value))
}

/// Key used to skip a file reached through two layer locations.
pub(super) fn dedup_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub(super) fn default_system_config_path() -> Option<PathBuf> {
    SYSTEM_CONFIG_PATH.map(PathBuf::from)
}

/// `~/.keepsake/keepsake.json5`
pub(super) fn default_user_config_path() -> Option<PathBuf> {
    let dirs = UserDirs::new()?;
    Some(
        dirs.home_dir()
            .join(DEFAULT_CONFIG_DIR)
            .join(DEFAULT_CONFIG_FILE),
    )
}
