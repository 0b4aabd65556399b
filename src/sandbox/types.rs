use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::error::{SandboxError, SandboxInitError};

// ================================
// Provider / environment traits
// ================================

/// Provisions isolated execution environments for one workflow execution.
#[async_trait::async_trait]
pub trait SandboxProviderService: Send + Sync {
    /// Create a sandbox for `tenant_id` with the given environment variables.
    async fn create_sandbox(
        &self,
        tenant_id: &str,
        environments: &HashMap<String, String>,
    ) -> Result<Arc<dyn VirtualEnvironment>, SandboxInitError>;
}

/// A provisioned sandbox. Code nodes run inside it; the sandbox layer
/// releases it when the run ends.
#[async_trait::async_trait]
pub trait VirtualEnvironment: Send + Sync {
    fn metadata(&self) -> &EnvironmentMetadata;

    async fn execute_code(
        &self,
        request: CodeExecutionRequest,
    ) -> Result<CodeExecutionResult, SandboxError>;

    async fn release_environment(&self) -> Result<(), SandboxError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentMetadata {
    pub id: String,
    #[serde(default)]
    pub arch: Option<String>,
}

// ================================
// Enums
// ================================

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Python3,
    #[serde(alias = "js")]
    Javascript,
}

// ================================
// Request / Response
// ================================

#[derive(Debug, Clone)]
pub struct CodeExecutionRequest {
    pub code: String,
    pub language: CodeLanguage,
    /// Named inputs passed to the code's `main` function.
    pub inputs: Value,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct CodeExecutionResult {
    /// Object returned by the code's `main` function.
    pub output: Value,
    pub stdout: String,
    pub stderr: String,
}
