/// Errors raised while code runs inside a sandbox, or while releasing one.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("No sandbox registered for execution '{0}'")]
    NotRegistered(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Execution timeout")]
    ExecutionTimeout,

    #[error("Release failed for sandbox '{id}': {reason}")]
    ReleaseFailed { id: String, reason: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Provisioning a sandbox failed; the run cannot start.
#[derive(Debug, thiserror::Error)]
#[error("Failed to initialize sandbox for tenant '{tenant_id}': {reason}")]
pub struct SandboxInitError {
    pub tenant_id: String,
    pub reason: String,
}
