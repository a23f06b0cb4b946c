//! Per-user local state persisted as one JSON document per user.

use chrono::{DateTime, Utc};
use directories::BaseDirs;
use keepsake_config::StateConfig;
use keepsake_protocol::{ConnectionId, PendingOperation, UserId};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current layout version of the state document.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Everything the client keeps on disk for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_connection: Option<ConnectionId>,
    /// Offline queue in enqueue order.
    #[serde(default)]
    pub pending_operations: Vec<PendingOperation>,
    #[serde(default)]
    pub last_read: BTreeMap<ConnectionId, DateTime<Utc>>,
    #[serde(default)]
    pub notification_prompt_shown: bool,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            last_active_connection: None,
            pending_operations: Vec::new(),
            last_read: BTreeMap::new(),
            notification_prompt_shown: false,
        }
    }
}

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

/// Errors returned by local state stores.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported schema version: {0}")]
    UnsupportedSchema(u32),
}

/// Storage for per-user local state.
pub trait LocalStateStore: Send + Sync {
    /// Load the state for a user, or defaults when nothing was stored.
    fn load(&self, user_id: &str) -> Result<LocalState, StateError>;
    /// Replace the stored state for a user.
    fn save(&self, user_id: &str, state: &LocalState) -> Result<(), StateError>;
    /// Remove the stored state; returns whether anything was removed.
    fn clear(&self, user_id: &str) -> Result<bool, StateError>;

    /// Read-modify-write the state of a user.
    ///
    /// Implementations should make this atomic with respect to other updates.
    fn update(
        &self,
        user_id: &str,
        apply: &mut dyn FnMut(&mut LocalState),
    ) -> Result<LocalState, StateError> {
        let mut state = self.load(user_id)?;
        apply(&mut state);
        self.save(user_id, &state)?;
        Ok(state)
    }
}

/// JSON-file backed state store, one `<user>.json` per user.
pub struct JsonStateStore {
    root: PathBuf,
    /// Serialize writers so read-modify-write cycles do not interleave.
    write_lock: Mutex<()>,
}

impl JsonStateStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StateError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!("initialized JSON state store (root={})", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Open the store at the configured path, or `~/.keepsake/state`.
    pub fn from_config(config: &StateConfig) -> Result<Self, StateError> {
        let root = config
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_state_root);
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the state of `user_id`.
    pub fn state_path(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(user_id)))
    }

    fn read_state(&self, path: &Path) -> Result<LocalState, StateError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LocalState::default());
            }
            Err(err) => return Err(StateError::Io(err)),
        };
        let state: LocalState = match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(err) => {
                let aside = path.with_extension("json.corrupt");
                fs::rename(path, &aside)?;
                warn!(
                    "corrupt local state moved aside (path={}, moved_to={}): {err}",
                    path.display(),
                    aside.display()
                );
                return Ok(LocalState::default());
            }
        };
        if state.schema_version > STATE_SCHEMA_VERSION {
            return Err(StateError::UnsupportedSchema(state.schema_version));
        }
        Ok(state)
    }

    /// Write through a temp file and rename so readers never see a partial document.
    fn write_state(&self, path: &Path, state: &LocalState) -> Result<(), StateError> {
        let tmp = path.with_extension("json.tmp");
        let encoded = serde_json::to_vec_pretty(state)?;
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, path)?;
        debug!(
            "local state written (path={}, pending={})",
            path.display(),
            state.pending_operations.len()
        );
        Ok(())
    }
}

impl LocalStateStore for JsonStateStore {
    fn load(&self, user_id: &str) -> Result<LocalState, StateError> {
        self.read_state(&self.state_path(user_id))
    }

    fn save(&self, user_id: &str, state: &LocalState) -> Result<(), StateError> {
        let _guard = self.write_lock.lock();
        self.write_state(&self.state_path(user_id), state)
    }

    fn clear(&self, user_id: &str) -> Result<bool, StateError> {
        let _guard = self.write_lock.lock();
        let path = self.state_path(user_id);
        if path.exists() {
            info!("removing local state (user_id={})", user_id);
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn update(
        &self,
        user_id: &str,
        apply: &mut dyn FnMut(&mut LocalState),
    ) -> Result<LocalState, StateError> {
        let _guard = self.write_lock.lock();
        let path = self.state_path(user_id);
        let mut state = self.read_state(&path)?;
        apply(&mut state);
        self.write_state(&path, &state)?;
        Ok(state)
    }
}

/// Non-durable store for sessions that should not touch disk.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<UserId, LocalState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStateStore for MemoryStateStore {
    fn load(&self, user_id: &str) -> Result<LocalState, StateError> {
        Ok(self.states.lock().get(user_id).cloned().unwrap_or_default())
    }

    fn save(&self, user_id: &str, state: &LocalState) -> Result<(), StateError> {
        self.states
            .lock()
            .insert(user_id.to_string(), state.clone());
        Ok(())
    }

    fn clear(&self, user_id: &str) -> Result<bool, StateError> {
        Ok(self.states.lock().remove(user_id).is_some())
    }

    fn update(
        &self,
        user_id: &str,
        apply: &mut dyn FnMut(&mut LocalState),
    ) -> Result<LocalState, StateError> {
        let mut states = self.states.lock();
        let state = states.entry(user_id.to_string()).or_default();
        apply(state);
        Ok(state.clone())
    }
}

/// Default state directory under the user's home.
pub fn default_state_root() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".keepsake").join("state"))
        .unwrap_or_else(|| PathBuf::from(".keepsake").join("state"))
}

/// Map a user id onto a file stem.
///
/// ASCII letters, digits and `-` are kept; every other byte, `_` included,
/// becomes `_XX` in hex, so distinct ids never share a file.
fn file_stem(user_id: &str) -> String {
    let mut stem = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02X}"));
        }
    }
    stem
}
