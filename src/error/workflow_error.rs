//! Workflow-level error types.

use super::NodeError;
use crate::core::runtime_state::SnapshotError;
use crate::sandbox::SandboxInitError;
use thiserror::Error;

/// Workflow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Graph config error: {0}")]
    GraphConfig(String),
    #[error("Graph build error: {0}")]
    GraphBuildError(String),
    #[error("Engine config error: {0}")]
    EngineConfig(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Edge not found: {0}")]
    EdgeNotFound(String),
    #[error("Unknown node type '{node_type}' for node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },
    #[error("Invalid config for node '{node_id}': {error}")]
    InvalidNodeConfig { node_id: String, error: String },
    #[error("No root node found")]
    NoRootNode,
    #[error("Multiple root nodes found: {0:?}")]
    MultipleRootNodes(Vec<String>),
    #[error("Cycle detected in graph")]
    CycleDetected,
    #[error("Execution timeout")]
    ExecutionTimeout,
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(usize),
    #[error("Workflow aborted: {0}")]
    Aborted(String),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecutionError { node_id: String, error: String },
    #[error("Layer '{layer}' failed: {error}")]
    LayerError { layer: String, error: String },
    #[error(transparent)]
    SandboxInit(#[from] SandboxInitError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}

impl WorkflowError {
    /// Node that triggered the failure, when there is one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            WorkflowError::NodeExecutionError { node_id, .. }
            | WorkflowError::UnknownNodeType { node_id, .. }
            | WorkflowError::InvalidNodeConfig { node_id, .. } => Some(node_id),
            WorkflowError::NodeNotFound(node_id) => Some(node_id),
            _ => None,
        }
    }
}
