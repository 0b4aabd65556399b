use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::SandboxError;
use super::types::VirtualEnvironment;

/// Process-wide registry of live sandboxes, keyed by workflow execution id.
///
/// One instance is created at process start and injected into every run's
/// sandbox layer and node services. Several runs may share it concurrently.
#[derive(Default)]
pub struct SandboxManager {
    sandboxes: Mutex<HashMap<String, Arc<dyn VirtualEnvironment>>>,
}

impl SandboxManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sandbox for an execution, returning any sandbox it replaced.
    pub fn register(
        &self,
        execution_id: &str,
        sandbox: Arc<dyn VirtualEnvironment>,
    ) -> Option<Arc<dyn VirtualEnvironment>> {
        self.sandboxes
            .lock()
            .insert(execution_id.to_string(), sandbox)
    }

    pub fn get(&self, execution_id: &str) -> Result<Arc<dyn VirtualEnvironment>, SandboxError> {
        self.sandboxes
            .lock()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| SandboxError::NotRegistered(execution_id.to_string()))
    }

    /// Remove and return the sandbox for an execution. A second call returns `None`.
    pub fn unregister(&self, execution_id: &str) -> Option<Arc<dyn VirtualEnvironment>> {
        self.sandboxes.lock().remove(execution_id)
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.sandboxes.lock().contains_key(execution_id)
    }

    pub fn len(&self) -> usize {
        self.sandboxes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.lock().is_empty()
    }

    /// Drop every registration without releasing. Used at process boundaries.
    pub fn clear(&self) {
        self.sandboxes.lock().clear();
    }
}
