//! Graph configuration schema and the node result types shared by the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::variable_pool::Segment;

/// Default edge handle for nodes that do not branch.
pub const DEFAULT_SOURCE_HANDLE: &str = "source";
/// Handle taken by a fail-branch node when it fails.
pub const FAIL_BRANCH_HANDLE: &str = "fail-branch";
/// Handle taken by a fail-branch node when it succeeds.
pub const SUCCESS_BRANCH_HANDLE: &str = "success-branch";
/// Metadata key carrying the form id of a paused node.
pub const PAUSED_FORM_ID_KEY: &str = "form_id";

// ================================
// Graph configuration
// ================================

/// Stored graph configuration: `{"nodes": [...], "edges": [...]}`.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct GraphConfig {
    pub nodes: Vec<NodeConfig>,
    pub edges: Vec<EdgeConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeConfig {
    pub id: String,
    /// `type` plus the type-specific config block.
    pub data: Value,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EdgeConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle")]
    pub source_handle: Option<String>,
}

/// Fields every node type carries next to its own config.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BaseNodeData {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
    /// Outputs written when `error_strategy` is `default-value`.
    #[serde(default)]
    pub default_value: HashMap<String, Value>,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategy {
    #[default]
    None,
    FailBranch,
    DefaultValue,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RetryConfig {
    #[serde(default)]
    pub retry_enabled: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default, alias = "retry_interval")]
    pub retry_interval_ms: u64,
}

impl RetryConfig {
    pub fn effective_max_retries(&self) -> u32 {
        if self.retry_enabled {
            self.max_retries
        } else {
            0
        }
    }
}

// ================================
// Execution status
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNodeExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Exception,
    Stopped,
    Paused,
    Retry,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowExecutionStatus {
    Running,
    Succeeded,
    Failed,
    PartialSucceeded,
    Stopped,
    Paused,
}

// ================================
// Node run result
// ================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunResult {
    pub status: WorkflowNodeExecutionStatus,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: HashMap<String, Segment>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default = "default_source_handle")]
    pub edge_source_handle: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub retry_index: u32,
}

fn default_source_handle() -> String {
    DEFAULT_SOURCE_HANDLE.to_string()
}

impl Default for NodeRunResult {
    fn default() -> Self {
        NodeRunResult {
            status: WorkflowNodeExecutionStatus::Succeeded,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            metadata: HashMap::new(),
            edge_source_handle: default_source_handle(),
            error: None,
            error_type: None,
            retry_index: 0,
        }
    }
}

impl NodeRunResult {
    pub fn succeeded(outputs: HashMap<String, Segment>) -> Self {
        NodeRunResult {
            outputs,
            ..Default::default()
        }
    }

    /// A node suspended on the human input form `form_id`.
    pub fn paused(form_id: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(PAUSED_FORM_ID_KEY.to_string(), Value::String(form_id.into()));
        NodeRunResult {
            status: WorkflowNodeExecutionStatus::Paused,
            metadata,
            ..Default::default()
        }
    }

    pub fn paused_form_id(&self) -> Option<&str> {
        if self.status != WorkflowNodeExecutionStatus::Paused {
            return None;
        }
        self.metadata.get(PAUSED_FORM_ID_KEY).and_then(Value::as_str)
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.edge_source_handle = handle.into();
        self
    }

    pub fn with_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Outputs as plain JSON, for events and persistence.
    pub fn output_values(&self) -> HashMap<String, Value> {
        self.outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect()
    }
}
