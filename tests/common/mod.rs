#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use graphflow::core::variable_pool::{Segment, Selector};
use graphflow::dsl::{graph_config_from_value, GraphConfig, NodeRunResult};
use graphflow::infrastructure::{
    InMemoryHumanInputFormRepository, InMemoryWorkflowExecutionRepository,
    InMemoryWorkflowNodeExecutionRepository,
};
use graphflow::nodes::{ExternalNodeHandler, NodeRunContext, NodeServices};
use graphflow::sandbox::{
    CodeExecutionRequest, CodeExecutionResult, EnvironmentMetadata, SandboxError,
    SandboxInitError, SandboxProviderService, VirtualEnvironment,
};
use graphflow::{GraphEngineEvent, NodeError, PersistenceLayer, SandboxManager};

pub fn graph(raw: Value) -> GraphConfig {
    graph_config_from_value(raw).expect("valid graph config")
}

pub fn inputs(raw: Value) -> HashMap<String, Value> {
    serde_json::from_value(raw).expect("inputs object")
}

/// Repositories shared by every run of one test, standing in for a database
/// that outlives the process.
#[derive(Clone)]
pub struct Repos {
    pub executions: Arc<InMemoryWorkflowExecutionRepository>,
    pub node_executions: Arc<InMemoryWorkflowNodeExecutionRepository>,
    pub forms: Arc<InMemoryHumanInputFormRepository>,
}

impl Repos {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(InMemoryWorkflowExecutionRepository::new()),
            node_executions: Arc::new(InMemoryWorkflowNodeExecutionRepository::new()),
            forms: Arc::new(InMemoryHumanInputFormRepository::new()),
        }
    }

    pub fn services(&self) -> NodeServices {
        NodeServices {
            form_repository: Some(self.forms.clone()),
            ..NodeServices::default()
        }
    }

    /// A fresh layer per run, the way a new process would build one.
    pub fn persistence_layer(&self) -> Arc<PersistenceLayer> {
        Arc::new(PersistenceLayer::new(
            self.executions.clone(),
            self.node_executions.clone(),
        ))
    }
}

/// Delegated node body that records each call.
///
/// Config keys: `input` (selector read from the pool), `fail_on` (input value
/// that makes the call fail). The output `result` is the input times ten, or
/// the node id when there is no input.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, node_id: &str) -> usize {
        self.calls.lock().iter().filter(|id| *id == node_id).count()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalNodeHandler for RecordingHandler {
    fn output_names(&self, _config: &Value) -> Option<Vec<String>> {
        Some(vec!["result".to_string()])
    }

    async fn run(
        &self,
        node_id: &str,
        config: &Value,
        ctx: &NodeRunContext,
    ) -> Result<NodeRunResult, NodeError> {
        self.calls.lock().push(node_id.to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        let input = match config.get("input").and_then(Selector::parse_value) {
            Some(selector) => Some(ctx.pool.get(&selector)?.to_value()),
            None => None,
        };
        if let (Some(input), Some(fail_on)) = (&input, config.get("fail_on")) {
            if input == fail_on {
                return Err(NodeError::ExecutionError(format!("refusing {}", input)));
            }
        }
        let result = match input.as_ref().and_then(Value::as_i64) {
            Some(n) => Segment::Integer(n * 10),
            None => Segment::String(node_id.to_string()),
        };
        Ok(NodeRunResult::succeeded(HashMap::from([(
            "result".to_string(),
            result,
        )])))
    }
}

pub fn services_with_handler(repos: &Repos, handler: Arc<RecordingHandler>) -> NodeServices {
    repos.services().with_external_handler("tool", handler)
}

/// Sandbox provider whose environments echo their inputs back as outputs.
#[derive(Default)]
pub struct EchoSandboxProvider {
    pub created: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
    pub fail_create: bool,
}

struct EchoEnvironment {
    metadata: EnvironmentMetadata,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl SandboxProviderService for EchoSandboxProvider {
    async fn create_sandbox(
        &self,
        tenant_id: &str,
        _environments: &HashMap<String, String>,
    ) -> Result<Arc<dyn VirtualEnvironment>, SandboxInitError> {
        if self.fail_create {
            return Err(SandboxInitError {
                tenant_id: tenant_id.to_string(),
                reason: "no capacity".into(),
            });
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EchoEnvironment {
            metadata: EnvironmentMetadata {
                id: format!("sandbox-{}", n),
                arch: None,
            },
            releases: Arc::clone(&self.releases),
        }))
    }
}

#[async_trait]
impl VirtualEnvironment for EchoEnvironment {
    fn metadata(&self) -> &EnvironmentMetadata {
        &self.metadata
    }

    async fn execute_code(
        &self,
        request: CodeExecutionRequest,
    ) -> Result<CodeExecutionResult, SandboxError> {
        if request.code.contains("raise") {
            return Err(SandboxError::ExecutionError("user code raised".into()));
        }
        Ok(CodeExecutionResult {
            output: request.inputs,
            ..Default::default()
        })
    }

    async fn release_environment(&self) -> Result<(), SandboxError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn sandbox_manager() -> Arc<SandboxManager> {
    Arc::new(SandboxManager::new())
}

pub fn names(events: &[GraphEngineEvent]) -> Vec<&'static str> {
    events.iter().map(GraphEngineEvent::name).collect()
}

pub fn started_nodes(events: &[GraphEngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            GraphEngineEvent::NodeRunStarted { node_id, .. } => Some(node_id.clone()),
            _ => None,
        })
        .collect()
}

pub fn paused_form_id(events: &[GraphEngineEvent]) -> Option<String> {
    events.iter().find_map(|e| match e {
        GraphEngineEvent::NodeRunPaused { form_id, .. } => form_id.clone(),
        _ => None,
    })
}
