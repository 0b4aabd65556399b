//! Everything a run needs to continue after a pause.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::variable_pool::VariablePool;
use crate::graph::state_manager::{GraphStateManager, StateSnapshot};

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("corrupted snapshot: {0}")]
    Corrupted(String),
    #[error("snapshot serialization failed: {0}")]
    Serialization(String),
    #[error("snapshot storage error: {0}")]
    Storage(String),
    #[error("no snapshot for execution '{0}'")]
    NotFound(String),
    #[error("execution id '{0}' cannot name a snapshot file")]
    InvalidExecutionId(String),
}

/// A node suspended mid-run. Resuming re-dispatches it under the same
/// execution id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PausedNode {
    pub node_id: String,
    pub node_exec_id: String,
    #[serde(default)]
    pub form_id: Option<String>,
    #[serde(default)]
    pub predecessor_node_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct RuntimeStateSnapshot {
    version: u32,
    execution_id: String,
    start_at: DateTime<Utc>,
    variable_pool: VariablePool,
    graph_state: StateSnapshot,
    #[serde(default)]
    outputs: HashMap<String, Value>,
    #[serde(default)]
    node_run_steps: usize,
    #[serde(default)]
    exceptions_count: usize,
    #[serde(default)]
    paused_nodes: Vec<PausedNode>,
}

/// Runtime state of one run: variable pool, node/edge status and counters.
///
/// Owned by the engine while it runs. `dumps` and `from_snapshot` round-trip
/// it through a versioned JSON document.
pub struct GraphRuntimeState {
    execution_id: String,
    start_at: DateTime<Utc>,
    variable_pool: VariablePool,
    state_manager: GraphStateManager,
    outputs: HashMap<String, Value>,
    node_run_steps: usize,
    exceptions_count: usize,
    paused_nodes: Vec<PausedNode>,
}

impl GraphRuntimeState {
    pub fn new(
        execution_id: impl Into<String>,
        variable_pool: VariablePool,
        start_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            start_at,
            variable_pool,
            state_manager: GraphStateManager::new(),
            outputs: HashMap::new(),
            node_run_steps: 0,
            exceptions_count: 0,
            paused_nodes: Vec::new(),
        }
    }

    pub fn dumps(&self) -> Result<String, SnapshotError> {
        let snapshot = RuntimeStateSnapshot {
            version: SNAPSHOT_VERSION,
            execution_id: self.execution_id.clone(),
            start_at: self.start_at,
            variable_pool: self.variable_pool.clone(),
            graph_state: self.state_manager.snapshot(),
            outputs: self.outputs.clone(),
            node_run_steps: self.node_run_steps,
            exceptions_count: self.exceptions_count,
            paused_nodes: self.paused_nodes.clone(),
        };
        serde_json::to_string(&snapshot).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }

    pub fn from_snapshot(data: &str) -> Result<Self, SnapshotError> {
        let raw: Value =
            serde_json::from_str(data).map_err(|e| SnapshotError::Corrupted(e.to_string()))?;
        let version = raw
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| SnapshotError::Corrupted("missing version".to_string()))?;
        if version != u64::from(SNAPSHOT_VERSION) {
            return Err(SnapshotError::VersionMismatch {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                expected: SNAPSHOT_VERSION,
            });
        }

        let snapshot: RuntimeStateSnapshot =
            serde_json::from_value(raw).map_err(|e| SnapshotError::Corrupted(e.to_string()))?;
        Ok(Self {
            execution_id: snapshot.execution_id,
            start_at: snapshot.start_at,
            variable_pool: snapshot.variable_pool,
            state_manager: GraphStateManager::from_snapshot(snapshot.graph_state),
            outputs: snapshot.outputs,
            node_run_steps: snapshot.node_run_steps,
            exceptions_count: snapshot.exceptions_count,
            paused_nodes: snapshot.paused_nodes,
        })
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.start_at
    }

    pub fn variable_pool(&self) -> &VariablePool {
        &self.variable_pool
    }

    pub fn variable_pool_mut(&mut self) -> &mut VariablePool {
        &mut self.variable_pool
    }

    pub fn state_manager(&self) -> &GraphStateManager {
        &self.state_manager
    }

    pub fn outputs(&self) -> &HashMap<String, Value> {
        &self.outputs
    }

    pub(crate) fn outputs_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.outputs
    }

    pub fn node_run_steps(&self) -> usize {
        self.node_run_steps
    }

    /// Count one more node dispatch and return the new total.
    pub(crate) fn increment_node_run_steps(&mut self) -> usize {
        self.node_run_steps += 1;
        self.node_run_steps
    }

    pub fn exceptions_count(&self) -> usize {
        self.exceptions_count
    }

    pub(crate) fn increment_exceptions_count(&mut self) {
        self.exceptions_count += 1;
    }

    pub fn paused_nodes(&self) -> &[PausedNode] {
        &self.paused_nodes
    }

    pub(crate) fn push_paused_node(&mut self, node: PausedNode) {
        self.paused_nodes.retain(|p| p.node_id != node.node_id);
        self.paused_nodes.push(node);
    }

    pub(crate) fn take_paused_nodes(&mut self) -> Vec<PausedNode> {
        std::mem::take(&mut self.paused_nodes)
    }

    pub fn is_paused(&self) -> bool {
        !self.paused_nodes.is_empty()
    }
}
