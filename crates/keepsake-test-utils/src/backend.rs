use async_trait::async_trait;
use chrono::Utc;
use keepsake_protocol::{
    BackendError, Connection, ConnectionId, Memory, MemoryPatch, NewMemory, PersistenceBackend,
    ProfileUpdate,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Persistence backend holding records in memory.
///
/// Supports failure injection (`set_offline`, `set_unauthorized`, `reject_creates`)
/// and per-connection gates that hold `get_memories` until released.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    gates: Mutex<HashMap<ConnectionId, Arc<Semaphore>>>,
}

#[derive(Default)]
struct BackendState {
    connections: Vec<Connection>,
    memories: Vec<Memory>,
    next_id: u64,
    offline: bool,
    unauthorized: bool,
    reject_creates: bool,
    reader: Option<String>,
    calls: Vec<String>,
    profiles: Vec<ProfileUpdate>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connections(connections: Vec<Connection>) -> Self {
        let backend = Self::default();
        backend.state.lock().connections = connections;
        backend
    }

    /// User id written into `read_by` by `mark_messages_as_read`.
    pub fn signed_in_as(self, user_id: impl Into<String>) -> Self {
        self.state.lock().reader = Some(user_id.into());
        self
    }

    /// Store records as if they had been created earlier.
    pub fn seed(&self, memories: Vec<Memory>) {
        self.state.lock().memories.extend(memories);
    }

    pub fn memories(&self, connection_id: &str) -> Vec<Memory> {
        self.state
            .lock()
            .memories
            .iter()
            .filter(|memory| memory.connection_id == connection_id)
            .cloned()
            .collect()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.state.lock().unauthorized = unauthorized;
    }

    pub fn reject_creates(&self, reject: bool) {
        self.state.lock().reject_creates = reject;
    }

    /// Block `get_memories` for a connection until `release_loads` is called.
    pub fn hold_loads(&self, connection_id: &str) {
        self.gates
            .lock()
            .insert(connection_id.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release_loads(&self, connection_id: &str) {
        if let Some(gate) = self.gates.lock().remove(connection_id) {
            gate.close();
        }
    }

    /// Names of the calls received, in order, e.g. `get_memories:c1`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn profile_updates(&self) -> Vec<ProfileUpdate> {
        self.state.lock().profiles.clone()
    }

    fn begin(&self, call: String) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.offline {
            return Err(BackendError::Network("backend unreachable".to_string()));
        }
        if state.unauthorized {
            return Err(BackendError::Unauthorized("token expired".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn get_connections(&self) -> Result<Vec<Connection>, BackendError> {
        self.begin("get_connections".to_string())?;
        Ok(self.state.lock().connections.clone())
    }

    async fn get_memories(&self, connection_id: &str) -> Result<Vec<Memory>, BackendError> {
        let gate = self.gates.lock().get(connection_id).cloned();
        if let Some(gate) = gate {
            // A closed gate means the load was released.
            let _ = gate.acquire().await;
        }
        self.begin(format!("get_memories:{connection_id}"))?;
        Ok(self.memories(connection_id))
    }

    async fn create_memory(&self, memory: &NewMemory) -> Result<Memory, BackendError> {
        self.begin(format!("create_memory:{}", memory.connection_id))?;
        let mut state = self.state.lock();
        if state.reject_creates {
            return Err(BackendError::Rejected("create refused".to_string()));
        }
        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);
        let created = memory.clone().into_memory(id, Utc::now());
        state.memories.push(created.clone());
        Ok(created)
    }

    async fn update_memory(
        &self,
        memory_id: &str,
        patch: &MemoryPatch,
    ) -> Result<Memory, BackendError> {
        self.begin(format!("update_memory:{memory_id}"))?;
        let mut state = self.state.lock();
        let memory = state
            .memories
            .iter_mut()
            .find(|memory| memory.id == memory_id)
            .ok_or_else(|| BackendError::NotFound(memory_id.to_string()))?;
        memory.apply_patch(patch);
        Ok(memory.clone())
    }

    async fn delete_memory(&self, memory_id: &str) -> Result<(), BackendError> {
        self.begin(format!("delete_memory:{memory_id}"))?;
        let mut state = self.state.lock();
        let before = state.memories.len();
        state.memories.retain(|memory| memory.id != memory_id);
        if state.memories.len() == before {
            return Err(BackendError::NotFound(memory_id.to_string()));
        }
        Ok(())
    }

    async fn mark_messages_as_read(&self, connection_id: &str) -> Result<usize, BackendError> {
        self.begin(format!("mark_messages_as_read:{connection_id}"))?;
        let mut state = self.state.lock();
        let Some(reader) = state.reader.clone() else {
            return Ok(0);
        };
        let mut marked = 0;
        for memory in state
            .memories
            .iter_mut()
            .filter(|memory| memory.connection_id == connection_id)
        {
            if memory.read_by.insert(reader.clone()) {
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn update_profile(&self, profile: &ProfileUpdate) -> Result<(), BackendError> {
        self.begin("update_profile".to_string())?;
        self.state.lock().profiles.push(profile.clone());
        Ok(())
    }
}
