use async_trait::async_trait;
use keepsake_protocol::{BackendError, Memory, MemoryEnricher, MemoryPatch};
use parking_lot::Mutex;

/// Enricher returning a fixed patch, or failing on demand.
#[derive(Default)]
pub struct StaticEnricher {
    patch: Option<MemoryPatch>,
    fail: bool,
    seen: Mutex<Vec<String>>,
}

impl StaticEnricher {
    pub fn with_patch(patch: MemoryPatch) -> Self {
        Self {
            patch: Some(patch),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Ids of the memories passed to `enrich`.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl MemoryEnricher for StaticEnricher {
    async fn enrich(&self, memory: &Memory) -> Result<Option<MemoryPatch>, BackendError> {
        self.seen.lock().push(memory.id.clone());
        if self.fail {
            return Err(BackendError::Server("tagging model unavailable".to_string()));
        }
        Ok(self.patch.clone())
    }
}
