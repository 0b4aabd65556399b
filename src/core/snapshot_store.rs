use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::runtime_state::SnapshotError;

/// Durable home for paused runs' snapshots, keyed by execution id.
#[async_trait]
pub trait RuntimeStateStore: Send + Sync {
    async fn save(&self, execution_id: &str, snapshot: &str) -> Result<(), SnapshotError>;
    async fn load(&self, execution_id: &str) -> Result<Option<String>, SnapshotError>;
    async fn delete(&self, execution_id: &str) -> Result<(), SnapshotError>;
}

#[derive(Default)]
pub struct MemoryRuntimeStateStore {
    data: tokio::sync::RwLock<HashMap<String, String>>,
}

impl MemoryRuntimeStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeStateStore for MemoryRuntimeStateStore {
    async fn save(&self, execution_id: &str, snapshot: &str) -> Result<(), SnapshotError> {
        self.data
            .write()
            .await
            .insert(execution_id.to_string(), snapshot.to_string());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<String>, SnapshotError> {
        Ok(self.data.read().await.get(execution_id).cloned())
    }

    async fn delete(&self, execution_id: &str) -> Result<(), SnapshotError> {
        self.data.write().await.remove(execution_id);
        Ok(())
    }
}

/// One `{execution_id}.snapshot.json` file per paused run.
pub struct FileRuntimeStateStore {
    dir: PathBuf,
}

impl FileRuntimeStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| SnapshotError::Storage(e.to_string()))?;
        Ok(Self { dir })
    }

    /// The id must stay a single file name inside the store directory.
    fn path_for(&self, execution_id: &str) -> Result<PathBuf, SnapshotError> {
        let invalid = execution_id.is_empty()
            || execution_id == "."
            || execution_id == ".."
            || execution_id.contains(['/', '\\', '\0']);
        if invalid {
            return Err(SnapshotError::InvalidExecutionId(execution_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.snapshot.json", execution_id)))
    }
}

#[async_trait]
impl RuntimeStateStore for FileRuntimeStateStore {
    async fn save(&self, execution_id: &str, snapshot: &str) -> Result<(), SnapshotError> {
        tokio::fs::write(self.path_for(execution_id)?, snapshot)
            .await
            .map_err(|e| SnapshotError::Storage(e.to_string()))
    }

    async fn load(&self, execution_id: &str) -> Result<Option<String>, SnapshotError> {
        match tokio::fs::read_to_string(self.path_for(execution_id)?).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SnapshotError::Storage(e.to_string())),
        }
    }

    async fn delete(&self, execution_id: &str) -> Result<(), SnapshotError> {
        match tokio::fs::remove_file(self.path_for(execution_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapshotError::Storage(e.to_string())),
        }
    }
}
