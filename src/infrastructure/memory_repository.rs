use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::human_input::{HumanInputForm, NewHumanInputForm};
use crate::domain::repository::{
    HumanInputFormRepository, NewWorkflowExecution, RepositoryError, WorkflowExecutionRecord,
    WorkflowExecutionRepository, WorkflowNodeExecutionRecord, WorkflowNodeExecutionRepository,
};
use crate::dsl::schema::WorkflowExecutionStatus;

#[derive(Default)]
pub struct InMemoryWorkflowExecutionRepository {
    data: tokio::sync::RwLock<HashMap<String, WorkflowExecutionRecord>>,
}

impl InMemoryWorkflowExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowExecutionRepository for InMemoryWorkflowExecutionRepository {
    async fn get_or_create(
        &self,
        new: NewWorkflowExecution,
    ) -> Result<WorkflowExecutionRecord, RepositoryError> {
        let mut data = self.data.write().await;
        let record = data
            .entry(new.id.clone())
            .or_insert_with(|| WorkflowExecutionRecord {
                id: new.id,
                workflow_id: new.workflow_id,
                tenant_id: new.tenant_id,
                app_id: new.app_id,
                triggered_by: new.triggered_by,
                status: WorkflowExecutionStatus::Running,
                inputs: new.inputs,
                outputs: HashMap::new(),
                error: None,
                exceptions_count: 0,
                started_at: new.started_at,
                finished_at: None,
            });
        // A resumed run reopens a paused record.
        if record.status == WorkflowExecutionStatus::Paused {
            record.status = WorkflowExecutionStatus::Running;
        }
        Ok(record.clone())
    }

    async fn finalize(
        &self,
        execution_id: &str,
        status: WorkflowExecutionStatus,
        outputs: HashMap<String, Value>,
        error: Option<String>,
        exceptions_count: usize,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        let record = data
            .get_mut(execution_id)
            .ok_or_else(|| RepositoryError::NotFound(execution_id.to_string()))?;
        record.status = status;
        record.outputs = outputs;
        record.error = error;
        record.exceptions_count = exceptions_count;
        record.finished_at = match status {
            WorkflowExecutionStatus::Running | WorkflowExecutionStatus::Paused => None,
            _ => Some(Utc::now()),
        };
        Ok(())
    }

    async fn get(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowExecutionRecord>, RepositoryError> {
        Ok(self.data.read().await.get(execution_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowNodeExecutionRepository {
    data: tokio::sync::RwLock<HashMap<String, WorkflowNodeExecutionRecord>>,
}

impl InMemoryWorkflowNodeExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowNodeExecutionRepository for InMemoryWorkflowNodeExecutionRepository {
    async fn upsert(&self, record: WorkflowNodeExecutionRecord) -> Result<(), RepositoryError> {
        self.data.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_by_execution(
        &self,
        workflow_execution_id: &str,
    ) -> Result<Vec<WorkflowNodeExecutionRecord>, RepositoryError> {
        let mut rows: Vec<_> = self
            .data
            .read()
            .await
            .values()
            .filter(|r| r.workflow_execution_id == workflow_execution_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.index);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryHumanInputFormRepository {
    data: tokio::sync::RwLock<HashMap<String, HumanInputForm>>,
}

impl InMemoryHumanInputFormRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }
}

#[async_trait]
impl HumanInputFormRepository for InMemoryHumanInputFormRepository {
    async fn create_form(&self, form: NewHumanInputForm) -> Result<HumanInputForm, RepositoryError> {
        let mut data = self.data.write().await;
        if let Some(existing) = data.get(&form.id) {
            return Ok(existing.clone());
        }
        let created = HumanInputForm::new(form);
        data.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_form(&self, form_id: &str) -> Result<Option<HumanInputForm>, RepositoryError> {
        Ok(self.data.read().await.get(form_id).cloned())
    }

    async fn save_form(&self, form: &HumanInputForm) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        if !data.contains_key(&form.id) {
            return Err(RepositoryError::NotFound(form.id.clone()));
        }
        data.insert(form.id.clone(), form.clone());
        Ok(())
    }
}
