//! Errors raised while loading a Keepsake config.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer file exists but could not be read.
    #[error("cannot read config layer {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A layer is not valid JSON5.
    #[error("{label} is not valid JSON5: {source}")]
    Syntax { label: String, source: json5::Error },
    /// The merged document does not decode into `KeepsakeConfig`.
    #[error("failed to decode config: {0}")]
    Decode(#[from] serde_json::Error),
    /// A key is unknown or carries the wrong type.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
    /// Values that parse but break a cross-field rule.
    #[error("invalid config: {0}")]
    Invalid(String),
}
