//! Persistence seams. The engine only talks to storage through these traits;
//! in-memory implementations live in [`crate::infrastructure`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::human_input::{HumanInputForm, NewHumanInputForm};
use crate::dsl::schema::{WorkflowExecutionStatus, WorkflowNodeExecutionStatus};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub tenant_id: String,
    pub app_id: String,
    pub triggered_by: String,
    pub status: WorkflowExecutionStatus,
    pub inputs: HashMap<String, Value>,
    pub outputs: HashMap<String, Value>,
    pub error: Option<String>,
    pub exceptions_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Values used when a run opens its execution record for the first time.
#[derive(Debug, Clone)]
pub struct NewWorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub tenant_id: String,
    pub app_id: String,
    pub triggered_by: String,
    pub inputs: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
}

/// One row per node execution. `id` is the node execution id, which stays
/// the same when a paused node is resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNodeExecutionRecord {
    pub id: String,
    pub workflow_execution_id: String,
    pub node_id: String,
    pub node_type: String,
    pub title: String,
    pub index: usize,
    pub predecessor_node_id: Option<String>,
    pub status: WorkflowNodeExecutionStatus,
    pub inputs: HashMap<String, Value>,
    pub outputs: HashMap<String, Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait WorkflowExecutionRepository: Send + Sync {
    /// Return the existing record for `new.id`, or create it in `running` state.
    async fn get_or_create(
        &self,
        new: NewWorkflowExecution,
    ) -> Result<WorkflowExecutionRecord, RepositoryError>;

    async fn finalize(
        &self,
        execution_id: &str,
        status: WorkflowExecutionStatus,
        outputs: HashMap<String, Value>,
        error: Option<String>,
        exceptions_count: usize,
    ) -> Result<(), RepositoryError>;

    async fn get(&self, execution_id: &str)
        -> Result<Option<WorkflowExecutionRecord>, RepositoryError>;
}

#[async_trait]
pub trait WorkflowNodeExecutionRepository: Send + Sync {
    /// Insert or replace the row keyed by `record.id`.
    async fn upsert(&self, record: WorkflowNodeExecutionRecord) -> Result<(), RepositoryError>;

    async fn list_by_execution(
        &self,
        workflow_execution_id: &str,
    ) -> Result<Vec<WorkflowNodeExecutionRecord>, RepositoryError>;
}

#[async_trait]
pub trait HumanInputFormRepository: Send + Sync {
    async fn create_form(&self, form: NewHumanInputForm) -> Result<HumanInputForm, RepositoryError>;

    async fn get_form(&self, form_id: &str) -> Result<Option<HumanInputForm>, RepositoryError>;

    /// Persist a status transition (submit or expire).
    async fn save_form(&self, form: &HumanInputForm) -> Result<(), RepositoryError>;
}
