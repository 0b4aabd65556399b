use thiserror::Error;

use crate::sandbox::SandboxError;

/// Node-level errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Input validation error: {0}")]
    InputValidationError(String),
    #[error("Timeout: node execution exceeded {0}s")]
    Timeout(u64),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Sandbox error: {0}")]
    SandboxError(#[from] SandboxError),
    #[error("Human input form '{form_id}' for node '{node_id}' is missing from the repository")]
    HumanInputFormMissing { node_id: String, form_id: String },
    #[error("Repository error: {0}")]
    RepositoryError(String),
    #[error("Node execution cancelled")]
    Cancelled,
}

impl NodeError {
    /// Short machine-readable category, written to `error_type` outputs.
    pub fn error_type(&self) -> &'static str {
        match self {
            NodeError::ConfigError(_) => "ConfigError",
            NodeError::VariableNotFound(_) => "VariableNotFound",
            NodeError::ExecutionError(_) => "ExecutionError",
            NodeError::TypeError(_) => "TypeError",
            NodeError::TemplateError(_) => "TemplateError",
            NodeError::InputValidationError(_) => "InputValidationError",
            NodeError::Timeout(_) => "Timeout",
            NodeError::SerializationError(_) => "SerializationError",
            NodeError::SandboxError(_) => "SandboxError",
            NodeError::HumanInputFormMissing { .. } => "HumanInputFormMissing",
            NodeError::RepositoryError(_) => "RepositoryError",
            NodeError::Cancelled => "Cancelled",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::ExecutionError(_) | NodeError::Timeout(_) | NodeError::SandboxError(_)
        )
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
