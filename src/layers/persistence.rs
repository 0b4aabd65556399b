use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{GraphEngineLayer, LayerContext};
use crate::core::event_bus::GraphEngineEvent;
use crate::core::runtime_context::{RealTimeProvider, TimeProvider};
use crate::domain::repository::{
    NewWorkflowExecution, WorkflowExecutionRepository, WorkflowNodeExecutionRecord,
    WorkflowNodeExecutionRepository,
};
use crate::dsl::schema::{NodeRunResult, WorkflowExecutionStatus, WorkflowNodeExecutionStatus};
use crate::error::{WorkflowError, WorkflowResult};

const LAYER_NAME: &str = "persistence";

fn layer_error(error: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::LayerError {
        layer: LAYER_NAME.to_string(),
        error: error.to_string(),
    }
}

/// Writes the run and its node executions through the injected repositories.
///
/// Node rows are keyed by node execution id. A node resumed after a pause
/// keeps its id, so its row is updated in place rather than duplicated.
pub struct PersistenceLayer {
    executions: Arc<dyn WorkflowExecutionRepository>,
    node_executions: Arc<dyn WorkflowNodeExecutionRepository>,
    time_provider: Arc<dyn TimeProvider>,
    in_flight: Mutex<HashMap<String, WorkflowNodeExecutionRecord>>,
    finalized: AtomicBool,
}

impl PersistenceLayer {
    pub fn new(
        executions: Arc<dyn WorkflowExecutionRepository>,
        node_executions: Arc<dyn WorkflowNodeExecutionRepository>,
    ) -> Self {
        Self {
            executions,
            node_executions,
            time_provider: Arc::new(RealTimeProvider),
            in_flight: Mutex::new(HashMap::new()),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    async fn node_started(&self, ctx: &LayerContext, event: &GraphEngineEvent) -> WorkflowResult<()> {
        let GraphEngineEvent::NodeRunStarted {
            id,
            node_id,
            node_type,
            node_title,
            predecessor_node_id,
            index,
        } = event
        else {
            return Ok(());
        };
        let record = WorkflowNodeExecutionRecord {
            id: id.clone(),
            workflow_execution_id: ctx.execution_id.clone(),
            node_id: node_id.clone(),
            node_type: node_type.clone(),
            title: node_title.clone(),
            index: *index,
            predecessor_node_id: predecessor_node_id.clone(),
            status: WorkflowNodeExecutionStatus::Running,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            error: None,
            created_at: self.time_provider.now(),
            finished_at: None,
        };
        self.in_flight.lock().insert(id.clone(), record.clone());
        self.node_executions.upsert(record).await.map_err(layer_error)
    }

    async fn node_finished(
        &self,
        ctx: &LayerContext,
        exec_id: &str,
        node_id: &str,
        node_type: &str,
        result: Option<&NodeRunResult>,
        status: WorkflowNodeExecutionStatus,
        error: Option<&str>,
    ) -> WorkflowResult<()> {
        let record = self.in_flight.lock().remove(exec_id);
        let mut record = record.unwrap_or_else(|| WorkflowNodeExecutionRecord {
            id: exec_id.to_string(),
            workflow_execution_id: ctx.execution_id.clone(),
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            title: node_id.to_string(),
            index: 0,
            predecessor_node_id: None,
            status,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            error: None,
            created_at: self.time_provider.now(),
            finished_at: None,
        });
        record.status = status;
        if let Some(result) = result {
            record.inputs = result.inputs.clone();
            record.outputs = result.output_values();
        }
        record.error = error.map(str::to_string);
        record.finished_at = match status {
            WorkflowNodeExecutionStatus::Paused => None,
            _ => Some(self.time_provider.now()),
        };
        self.node_executions.upsert(record).await.map_err(layer_error)
    }

    async fn finalize(
        &self,
        ctx: &LayerContext,
        status: WorkflowExecutionStatus,
        outputs: HashMap<String, serde_json::Value>,
        error: Option<String>,
        exceptions_count: usize,
    ) -> WorkflowResult<()> {
        self.finalized.store(true, Ordering::SeqCst);
        self.executions
            .finalize(&ctx.execution_id, status, outputs, error, exceptions_count)
            .await
            .map_err(layer_error)
    }
}

#[async_trait]
impl GraphEngineLayer for PersistenceLayer {
    fn name(&self) -> &str {
        LAYER_NAME
    }

    async fn on_graph_start(&self, ctx: &LayerContext) -> WorkflowResult<()> {
        self.finalized.store(false, Ordering::SeqCst);
        self.executions
            .get_or_create(NewWorkflowExecution {
                id: ctx.execution_id.clone(),
                workflow_id: ctx.init_params.workflow_id.clone(),
                tenant_id: ctx.init_params.tenant_id.clone(),
                app_id: ctx.init_params.app_id.clone(),
                triggered_by: ctx.init_params.user_id.clone(),
                inputs: ctx.inputs.clone(),
                started_at: ctx.started_at,
            })
            .await
            .map_err(layer_error)?;
        Ok(())
    }

    async fn on_event(&self, ctx: &LayerContext, event: &GraphEngineEvent) -> WorkflowResult<()> {
        match event {
            GraphEngineEvent::NodeRunStarted { .. } => self.node_started(ctx, event).await,
            GraphEngineEvent::NodeRunSucceeded {
                id,
                node_id,
                node_type,
                node_run_result,
            } => {
                self.node_finished(
                    ctx,
                    id,
                    node_id,
                    node_type,
                    Some(node_run_result),
                    WorkflowNodeExecutionStatus::Succeeded,
                    None,
                )
                .await
            }
            GraphEngineEvent::NodeRunException {
                id,
                node_id,
                node_type,
                node_run_result,
                error,
            } => {
                self.node_finished(
                    ctx,
                    id,
                    node_id,
                    node_type,
                    Some(node_run_result),
                    WorkflowNodeExecutionStatus::Exception,
                    Some(error),
                )
                .await
            }
            GraphEngineEvent::NodeRunFailed {
                id,
                node_id,
                node_type,
                node_run_result,
                error,
            } => {
                self.node_finished(
                    ctx,
                    id,
                    node_id,
                    node_type,
                    Some(node_run_result),
                    WorkflowNodeExecutionStatus::Failed,
                    Some(error),
                )
                .await
            }
            GraphEngineEvent::NodeRunPaused {
                id,
                node_id,
                node_type,
                ..
            } => {
                self.node_finished(
                    ctx,
                    id,
                    node_id,
                    node_type,
                    None,
                    WorkflowNodeExecutionStatus::Paused,
                    None,
                )
                .await
            }
            GraphEngineEvent::GraphRunSucceeded { outputs } => {
                self.finalize(ctx, WorkflowExecutionStatus::Succeeded, outputs.clone(), None, 0)
                    .await
            }
            GraphEngineEvent::GraphRunPartialSucceeded {
                exceptions_count,
                outputs,
            } => {
                self.finalize(
                    ctx,
                    WorkflowExecutionStatus::PartialSucceeded,
                    outputs.clone(),
                    None,
                    *exceptions_count,
                )
                .await
            }
            GraphEngineEvent::GraphRunFailed {
                error,
                exceptions_count,
                ..
            } => {
                self.finalize(
                    ctx,
                    WorkflowExecutionStatus::Failed,
                    HashMap::new(),
                    Some(error.clone()),
                    *exceptions_count,
                )
                .await
            }
            GraphEngineEvent::GraphRunAborted { reason, outputs } => {
                self.finalize(
                    ctx,
                    WorkflowExecutionStatus::Stopped,
                    outputs.clone(),
                    reason.clone(),
                    0,
                )
                .await
            }
            GraphEngineEvent::GraphRunPaused { .. } => {
                self.finalize(ctx, WorkflowExecutionStatus::Paused, HashMap::new(), None, 0)
                    .await
            }
            _ => Ok(()),
        }
    }

    async fn on_graph_end(
        &self,
        ctx: &LayerContext,
        error: Option<&WorkflowError>,
    ) -> WorkflowResult<()> {
        if self.finalized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let status = match error {
            Some(_) => WorkflowExecutionStatus::Failed,
            None => WorkflowExecutionStatus::Succeeded,
        };
        self.finalize(ctx, status, HashMap::new(), error.map(|e| e.to_string()), 0)
            .await
    }
}
