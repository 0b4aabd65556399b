//! The graph engine: a single control loop that dispatches ready nodes to
//! worker tasks and applies their results.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::command_channel::{Command, CommandChannel};
use crate::core::event_bus::{EventEmitter, GraphEngineEvent, PauseReason};
use crate::core::runtime_state::{GraphRuntimeState, PausedNode};
use crate::core::variable_pool::Segment;
use crate::dsl::schema::{
    ErrorStrategy, NodeRunResult, WorkflowExecutionStatus, WorkflowNodeExecutionStatus,
    DEFAULT_SOURCE_HANDLE, FAIL_BRANCH_HANDLE, SUCCESS_BRANCH_HANDLE,
};
use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
use crate::graph::edge_processor::EdgeProcessor;
use crate::graph::state_manager::{EdgeState, NodeState, SkipStateOps};
use crate::graph::types::Graph;
use crate::layers::{GraphEngineLayer, LayerContext};
use crate::nodes::executor::{
    Node, NodeEvent, NodeEventEnvelope, NodeEventSender, NodeKind, NodeRunContext, NodeServices,
};

const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for the graph engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_steps: usize,
    pub max_execution_time_secs: u64,
    /// Upper bound on concurrently running nodes; 0 means unbounded.
    pub max_concurrency: usize,
    pub parallel_enabled: bool,
    /// Capacity of the bounded event channels.
    pub event_buffer: usize,
    /// Iteration parallelism when a node does not set `parallel_nums`.
    pub default_parallel_nums: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: 500,
            max_execution_time_secs: 600,
            max_concurrency: 0,
            parallel_enabled: true,
            event_buffer: 256,
            default_parallel_nums: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> WorkflowResult<Self> {
        toml::from_str(content).map_err(|e| WorkflowError::EngineConfig(e.to_string()))
    }

    pub fn concurrency_limit(&self) -> usize {
        if !self.parallel_enabled {
            1
        } else if self.max_concurrency == 0 {
            usize::MAX
        } else {
            self.max_concurrency
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum GraphRunOutcome {
    Succeeded {
        outputs: HashMap<String, Value>,
    },
    PartialSucceeded {
        exceptions_count: usize,
        outputs: HashMap<String, Value>,
    },
    Failed {
        error: WorkflowError,
        exceptions_count: usize,
    },
    Aborted {
        reason: Option<String>,
        outputs: HashMap<String, Value>,
    },
    /// `snapshot` is the serialized runtime state to resume from.
    Paused {
        snapshot: String,
        reason: PauseReason,
        paused_nodes: Vec<String>,
    },
}

impl GraphRunOutcome {
    pub fn status(&self) -> WorkflowExecutionStatus {
        match self {
            GraphRunOutcome::Succeeded { .. } => WorkflowExecutionStatus::Succeeded,
            GraphRunOutcome::PartialSucceeded { .. } => WorkflowExecutionStatus::PartialSucceeded,
            GraphRunOutcome::Failed { .. } => WorkflowExecutionStatus::Failed,
            GraphRunOutcome::Aborted { .. } => WorkflowExecutionStatus::Stopped,
            GraphRunOutcome::Paused { .. } => WorkflowExecutionStatus::Paused,
        }
    }

    pub fn outputs(&self) -> Option<&HashMap<String, Value>> {
        match self {
            GraphRunOutcome::Succeeded { outputs }
            | GraphRunOutcome::PartialSucceeded { outputs, .. }
            | GraphRunOutcome::Aborted { outputs, .. } => Some(outputs),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        match self {
            GraphRunOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

struct NodeExecOutcome {
    exec_id: String,
    node_id: String,
    predecessor_node_id: Option<String>,
    result: NodeResult<NodeRunResult>,
}

enum LoopExit {
    Completed,
    Aborted(Option<String>),
    Paused(PauseReason),
}

enum Step {
    Event(NodeEventEnvelope),
    Joined(Result<NodeExecOutcome, tokio::task::JoinError>),
    Interrupted,
}

/// Drives one graph traversal to completion, failure, abort or pause.
///
/// The engine is the only writer of the runtime state. Node bodies run on
/// worker tasks against a snapshot of the variable pool; their results and
/// events come back to the control loop, which applies them in order.
pub struct GraphEngine {
    graph: Arc<Graph>,
    state: GraphRuntimeState,
    config: Arc<EngineConfig>,
    services: Arc<NodeServices>,
    emitter: EventEmitter,
    layers: Vec<Arc<dyn GraphEngineLayer>>,
    commands: Option<Mutex<Box<dyn CommandChannel>>>,
    cancel: CancellationToken,
    run_cancel: CancellationToken,
    resumed: HashMap<String, PausedNode>,
    pause_request: Option<Option<String>>,
    abort_request: Option<Option<String>>,
    run_started_at: DateTime<Utc>,
    layer_ctx: LayerContext,
}

impl GraphEngine {
    pub fn new(
        graph: Arc<Graph>,
        runtime_state: GraphRuntimeState,
        config: Arc<EngineConfig>,
        services: Arc<NodeServices>,
        emitter: EventEmitter,
    ) -> Self {
        let cancel = CancellationToken::new();
        let run_cancel = cancel.child_token();
        let run_started_at = runtime_state.start_at();
        GraphEngine {
            graph,
            state: runtime_state,
            config,
            services,
            emitter,
            layers: Vec::new(),
            commands: None,
            cancel,
            run_cancel,
            resumed: HashMap::new(),
            pause_request: None,
            abort_request: None,
            run_started_at,
            layer_ctx: LayerContext::default(),
        }
    }

    pub fn with_layer(mut self, layer: Arc<dyn GraphEngineLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_command_channel(mut self, channel: impl CommandChannel + 'static) -> Self {
        self.commands = Some(Mutex::new(Box::new(channel)));
        self
    }

    /// Cancelling `token` aborts the run.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.run_cancel = token.child_token();
        self.cancel = token;
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn runtime_state(&self) -> &GraphRuntimeState {
        &self.state
    }

    pub async fn run(&mut self) -> GraphRunOutcome {
        self.run_started_at = self.services.runtime.time_provider.now();
        let resumed = self.state.node_run_steps() > 0;
        self.layer_ctx = LayerContext {
            execution_id: self.state.execution_id().to_string(),
            init_params: self.services.init_params.clone(),
            inputs: self
                .state
                .variable_pool()
                .user_inputs()
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
            started_at: self.state.start_at(),
            resumed,
        };
        info!(
            execution_id = %self.layer_ctx.execution_id,
            resumed,
            nodes = self.graph.node_count(),
            "graph run started"
        );

        let mut start_error = None;
        for layer in &self.layers {
            if let Err(e) = layer.on_graph_start(&self.layer_ctx).await {
                error!(layer = layer.name(), error = %e, "layer failed to start");
                start_error = Some(e);
                break;
            }
        }
        if let Some(e) = start_error {
            return self.finish(Err(e)).await;
        }

        self.emit(GraphEngineEvent::GraphRunStarted).await;
        let exit = self.run_loop().await;
        self.finish(exit).await
    }

    async fn finish(&mut self, exit: WorkflowResult<LoopExit>) -> GraphRunOutcome {
        let exceptions_count = self.state.exceptions_count();
        let outcome = match exit {
            Ok(LoopExit::Completed) => {
                let outputs = self.state.outputs().clone();
                if exceptions_count > 0 {
                    GraphRunOutcome::PartialSucceeded {
                        exceptions_count,
                        outputs,
                    }
                } else {
                    GraphRunOutcome::Succeeded { outputs }
                }
            }
            Ok(LoopExit::Aborted(reason)) => GraphRunOutcome::Aborted {
                reason,
                outputs: self.state.outputs().clone(),
            },
            Ok(LoopExit::Paused(reason)) => match self.state.dumps() {
                Ok(snapshot) => GraphRunOutcome::Paused {
                    snapshot,
                    reason,
                    paused_nodes: self
                        .state
                        .paused_nodes()
                        .iter()
                        .map(|p| p.node_id.clone())
                        .collect(),
                },
                Err(e) => GraphRunOutcome::Failed {
                    error: e.into(),
                    exceptions_count,
                },
            },
            Err(error) => GraphRunOutcome::Failed {
                error,
                exceptions_count,
            },
        };

        let event = match &outcome {
            GraphRunOutcome::Succeeded { outputs } => GraphEngineEvent::GraphRunSucceeded {
                outputs: outputs.clone(),
            },
            GraphRunOutcome::PartialSucceeded {
                exceptions_count,
                outputs,
            } => GraphEngineEvent::GraphRunPartialSucceeded {
                exceptions_count: *exceptions_count,
                outputs: outputs.clone(),
            },
            GraphRunOutcome::Failed {
                error,
                exceptions_count,
            } => GraphEngineEvent::GraphRunFailed {
                error: error.to_string(),
                exceptions_count: *exceptions_count,
                node_id: error.node_id().map(str::to_string),
            },
            GraphRunOutcome::Aborted { reason, outputs } => GraphEngineEvent::GraphRunAborted {
                reason: reason.clone(),
                outputs: outputs.clone(),
            },
            GraphRunOutcome::Paused {
                reason,
                paused_nodes,
                ..
            } => GraphEngineEvent::GraphRunPaused {
                workflow_execution_id: self.state.execution_id().to_string(),
                reason: reason.clone(),
                paused_nodes: paused_nodes.clone(),
            },
        };
        info!(
            execution_id = %self.layer_ctx.execution_id,
            status = ?outcome.status(),
            steps = self.state.node_run_steps(),
            "graph run finished"
        );
        self.emit(event).await;

        for layer in &self.layers {
            if let Err(e) = layer.on_graph_end(&self.layer_ctx, outcome.error()).await {
                warn!(layer = layer.name(), error = %e, "layer on_graph_end failed");
            }
        }
        outcome
    }

    async fn run_loop(&mut self) -> WorkflowResult<LoopExit> {
        self.seed();
        let (node_tx, mut node_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let mut workers: JoinSet<NodeExecOutcome> = JoinSet::new();
        let limit = self.config.concurrency_limit();
        let external_cancel = self.cancel.clone();
        let poll_commands = self.commands.is_some();

        loop {
            self.poll_commands();
            if let Some(reason) = self.abort_request.take() {
                info!(execution_id = %self.layer_ctx.execution_id, "abort requested");
                self.stop_workers(&mut workers).await;
                return Ok(LoopExit::Aborted(reason));
            }

            if self.pause_request.is_none() {
                while workers.len() < limit {
                    let Some(node_id) = self.state.state_manager().pop_ready() else {
                        break;
                    };
                    let dispatched = match self.check_limits() {
                        Ok(()) => self.dispatch(node_id, &mut workers, &node_tx).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = dispatched {
                        self.stop_workers(&mut workers).await;
                        return Err(e);
                    }
                }
            }

            if workers.is_empty() {
                let sm = self.state.state_manager();
                if self.pause_request.is_some() && sm.has_ready() {
                    let reason = self.pause_request.take().flatten();
                    return Ok(LoopExit::Paused(PauseReason::Command { reason }));
                }
                if self.state.is_paused() {
                    let node_ids = self
                        .state
                        .paused_nodes()
                        .iter()
                        .map(|p| p.node_id.clone())
                        .collect();
                    return Ok(LoopExit::Paused(PauseReason::HumanInputRequired { node_ids }));
                }
                return Ok(LoopExit::Completed);
            }

            let step = tokio::select! {
                biased;
                Some(envelope) = node_rx.recv() => Step::Event(envelope),
                Some(joined) = workers.join_next() => Step::Joined(joined),
                _ = external_cancel.cancelled(), if !external_cancel.is_cancelled() => Step::Interrupted,
                _ = tokio::time::sleep(COMMAND_POLL_INTERVAL), if poll_commands => Step::Interrupted,
            };

            match step {
                Step::Event(envelope) => self.forward_node_event(envelope).await,
                Step::Joined(joined) => {
                    // A worker's events are all sent before it completes.
                    while let Ok(envelope) = node_rx.try_recv() {
                        self.forward_node_event(envelope).await;
                    }
                    let handled = match joined {
                        Ok(outcome) => self.handle_outcome(outcome).await,
                        Err(e) => Err(WorkflowError::InternalError(format!(
                            "node worker panicked: {}",
                            e
                        ))),
                    };
                    if let Err(e) = handled {
                        self.stop_workers(&mut workers).await;
                        return Err(e);
                    }
                }
                Step::Interrupted => {}
            }
        }
    }

    /// Put the first nodes on the ready queue: the root on a fresh run, the
    /// paused nodes on a resumed one.
    fn seed(&mut self) {
        let paused = self.state.take_paused_nodes();
        let sm = self.state.state_manager();
        if !paused.is_empty() {
            for node in paused {
                if sm.requeue_paused_node(&node.node_id) {
                    debug!(node_id = %node.node_id, "resuming paused node");
                    self.resumed.insert(node.node_id.clone(), node);
                } else {
                    warn!(node_id = %node.node_id, "paused node is not in paused state");
                }
            }
            return;
        }

        let root = self.graph.root_node_id();
        if sm.node_state(root) == NodeState::Unknown && sm.enqueue_node(root) {
            sm.start_execution(root);
        }
    }

    fn poll_commands(&mut self) {
        if self.cancel.is_cancelled() && self.abort_request.is_none() {
            self.abort_request = Some(Some("cancelled".to_string()));
        }
        let commands = match &self.commands {
            Some(channel) => channel.lock().drain(),
            None => return,
        };
        for command in commands {
            match command {
                Command::Abort { reason } => {
                    self.abort_request = Some(reason);
                }
                Command::Pause { reason } => {
                    info!(execution_id = %self.layer_ctx.execution_id, "pause requested");
                    self.pause_request = Some(reason);
                }
                Command::UpdateVariables { variables } => {
                    let pool = self.state.variable_pool_mut();
                    for (selector, value) in variables {
                        if let Err(e) = pool.add(&selector, value) {
                            warn!(selector = %selector, error = %e, "variable update rejected");
                        }
                    }
                }
            }
        }
    }

    fn check_limits(&mut self) -> WorkflowResult<()> {
        let steps = self.state.increment_node_run_steps();
        if steps > self.config.max_steps {
            return Err(WorkflowError::MaxStepsExceeded(self.config.max_steps));
        }

        let elapsed = self.services.runtime.time_provider.now() - self.run_started_at;
        if elapsed.num_seconds() > 0
            && elapsed.num_seconds() as u64 > self.config.max_execution_time_secs
        {
            return Err(WorkflowError::ExecutionTimeout);
        }
        Ok(())
    }

    async fn stop_workers(&self, workers: &mut JoinSet<NodeExecOutcome>) {
        self.run_cancel.cancel();
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }

    fn taken_predecessor(&self, node_id: &str) -> Option<String> {
        let sm = self.state.state_manager();
        self.graph
            .incoming_edges(node_id)
            .into_iter()
            .find(|e| sm.edge_state(&e.id) == EdgeState::Taken)
            .map(|e| e.tail.clone())
    }

    async fn dispatch(
        &mut self,
        node_id: String,
        workers: &mut JoinSet<NodeExecOutcome>,
        node_tx: &mpsc::Sender<NodeEventEnvelope>,
    ) -> WorkflowResult<()> {
        let node = Arc::clone(self.graph.get_node(&node_id)?);
        let resumed = self.resumed.remove(&node_id);
        let exec_id = match &resumed {
            Some(paused) => paused.node_exec_id.clone(),
            None => self.services.runtime.id_generator.next_id(),
        };
        let predecessor_node_id = resumed
            .as_ref()
            .and_then(|p| p.predecessor_node_id.clone())
            .or_else(|| self.taken_predecessor(&node_id));

        self.state.state_manager().mark_node_running(&node_id);
        debug!(node_id = %node_id, node_exec_id = %exec_id, "dispatching node");
        self.emit(GraphEngineEvent::NodeRunStarted {
            id: exec_id.clone(),
            node_id: node_id.clone(),
            node_type: node.kind().as_str().to_string(),
            node_title: node.title().to_string(),
            predecessor_node_id: predecessor_node_id.clone(),
            index: self.state.node_run_steps(),
        })
        .await;

        let ctx = NodeRunContext {
            execution_id: self.state.execution_id().to_string(),
            node_exec_id: exec_id.clone(),
            pool: Arc::new(self.state.variable_pool().clone()),
            events: NodeEventSender::new(exec_id.clone(), node_id.clone(), node_tx.clone()),
            cancel: self.run_cancel.child_token(),
            pending_form_id: resumed.and_then(|p| p.form_id),
            outgoing_handles: self.graph.outgoing_handles(&node_id),
            services: Arc::clone(&self.services),
            config: Arc::clone(&self.config),
        };
        workers.spawn(async move {
            let result = execute_node(node.as_ref(), &ctx).await;
            NodeExecOutcome {
                exec_id,
                node_id,
                predecessor_node_id,
                result,
            }
        });
        Ok(())
    }

    async fn handle_outcome(&mut self, outcome: NodeExecOutcome) -> WorkflowResult<()> {
        let NodeExecOutcome {
            exec_id,
            node_id,
            predecessor_node_id,
            result,
        } = outcome;
        let node = Arc::clone(self.graph.get_node(&node_id)?);

        let result = result.and_then(|r| match r.status {
            WorkflowNodeExecutionStatus::Failed => Err(NodeError::ExecutionError(
                r.error.unwrap_or_else(|| "node reported failure".to_string()),
            )),
            _ => Ok(r),
        });

        match result {
            Ok(r) if r.status == WorkflowNodeExecutionStatus::Paused => {
                self.handle_node_paused(node.as_ref(), exec_id, predecessor_node_id, &r)
                    .await;
                Ok(())
            }
            Ok(r) => {
                self.complete_node(node.as_ref(), &exec_id, r, None).await;
                Ok(())
            }
            Err(NodeError::Cancelled) if self.run_cancel.is_cancelled() => {
                self.state.state_manager().finish_execution(&node_id);
                Ok(())
            }
            Err(error) => self.handle_node_failure(node.as_ref(), &exec_id, error).await,
        }
    }

    async fn handle_node_paused(
        &mut self,
        node: &dyn Node,
        exec_id: String,
        predecessor_node_id: Option<String>,
        result: &NodeRunResult,
    ) {
        let node_id = node.id();
        let form_id = result.paused_form_id().map(str::to_string);
        let sm = self.state.state_manager();
        sm.mark_node_paused(node_id);
        sm.finish_execution(node_id);
        info!(node_id, form_id = ?form_id, "node paused");
        self.state.push_paused_node(PausedNode {
            node_id: node_id.to_string(),
            node_exec_id: exec_id.clone(),
            form_id: form_id.clone(),
            predecessor_node_id,
        });
        self.emit(GraphEngineEvent::NodeRunPaused {
            id: exec_id,
            node_id: node_id.to_string(),
            node_type: node.kind().as_str().to_string(),
            form_id,
        })
        .await;
    }

    async fn handle_node_failure(
        &mut self,
        node: &dyn Node,
        exec_id: &str,
        error: NodeError,
    ) -> WorkflowResult<()> {
        let node_id = node.id();
        let message = error.to_string();
        let base = node.base();

        let mut outputs: HashMap<String, Segment> = match base.error_strategy {
            ErrorStrategy::None => {
                warn!(node_id, error = %message, "node failed");
                let sm = self.state.state_manager();
                sm.mark_node_failed(node_id);
                sm.finish_execution(node_id);
                self.emit(GraphEngineEvent::NodeRunFailed {
                    id: exec_id.to_string(),
                    node_id: node_id.to_string(),
                    node_type: node.kind().as_str().to_string(),
                    node_run_result: NodeRunResult {
                        status: WorkflowNodeExecutionStatus::Failed,
                        error: Some(message.clone()),
                        error_type: Some(error.error_type().to_string()),
                        ..Default::default()
                    },
                    error: message.clone(),
                })
                .await;
                return Err(WorkflowError::NodeExecutionError {
                    node_id: node_id.to_string(),
                    error: message,
                });
            }
            ErrorStrategy::FailBranch => HashMap::new(),
            ErrorStrategy::DefaultValue => base
                .default_value
                .iter()
                .map(|(k, v)| (k.clone(), Segment::from_value(v)))
                .collect(),
        };

        debug!(node_id, strategy = ?base.error_strategy, "node error handled by strategy");
        outputs.insert("error_message".to_string(), Segment::String(message.clone()));
        outputs.insert(
            "error_type".to_string(),
            Segment::String(error.error_type().to_string()),
        );
        let handle = match base.error_strategy {
            ErrorStrategy::FailBranch => FAIL_BRANCH_HANDLE,
            _ => DEFAULT_SOURCE_HANDLE,
        };
        let result = NodeRunResult {
            status: WorkflowNodeExecutionStatus::Exception,
            outputs,
            edge_source_handle: handle.to_string(),
            error: Some(message.clone()),
            error_type: Some(error.error_type().to_string()),
            ..Default::default()
        };
        self.complete_node(node, exec_id, result, Some(message)).await;
        Ok(())
    }

    /// Record a finished node (succeeded, or exception under an error
    /// strategy) and resolve its outgoing edges.
    async fn complete_node(
        &mut self,
        node: &dyn Node,
        exec_id: &str,
        result: NodeRunResult,
        exception: Option<String>,
    ) {
        let node_id = node.id();
        let node_type = node.kind().as_str().to_string();
        self.state
            .variable_pool_mut()
            .set_node_outputs(node_id, &result.outputs);
        self.collect_run_outputs(node.kind(), &result);

        let handle = selected_handle(node, &result, exception.is_some());
        let event = match exception {
            Some(error) => {
                self.state.increment_exceptions_count();
                self.state.state_manager().mark_node_exception(node_id);
                GraphEngineEvent::NodeRunException {
                    id: exec_id.to_string(),
                    node_id: node_id.to_string(),
                    node_type,
                    node_run_result: result,
                    error,
                }
            }
            None => {
                self.state.state_manager().mark_node_succeeded(node_id);
                GraphEngineEvent::NodeRunSucceeded {
                    id: exec_id.to_string(),
                    node_id: node_id.to_string(),
                    node_type,
                    node_run_result: result,
                }
            }
        };
        self.state.state_manager().finish_execution(node_id);
        self.emit(event).await;

        EdgeProcessor::new(&self.graph, self.state.state_manager())
            .process_node_success(node_id, handle.as_deref());
    }

    /// `end` outputs overwrite run outputs; `answer` text is appended.
    fn collect_run_outputs(&mut self, kind: NodeKind, result: &NodeRunResult) {
        let outputs = self.state.outputs_mut();
        match kind {
            NodeKind::End => outputs.extend(result.output_values()),
            NodeKind::Answer => {
                let Some(answer) = result.outputs.get("answer") else {
                    return;
                };
                let text = answer.to_display_string();
                match outputs.get_mut("answer") {
                    Some(Value::String(existing)) => existing.push_str(&text),
                    _ => {
                        outputs.insert("answer".to_string(), Value::String(text));
                    }
                }
            }
            _ => {}
        }
    }

    async fn forward_node_event(&self, envelope: NodeEventEnvelope) {
        let NodeEventEnvelope {
            node_exec_id: id,
            node_id,
            event,
        } = envelope;
        let event = match event {
            NodeEvent::StreamChunk { chunk, is_final } => GraphEngineEvent::NodeRunStreamChunk {
                id,
                node_id,
                chunk,
                is_final,
            },
            NodeEvent::IterationStarted { total } => GraphEngineEvent::IterationStarted {
                id,
                node_id,
                total,
            },
            NodeEvent::IterationItemSucceeded { index, output } => {
                GraphEngineEvent::IterationItemSucceeded {
                    id,
                    node_id,
                    index,
                    output,
                }
            }
            NodeEvent::IterationItemFailed { index, error } => {
                GraphEngineEvent::IterationItemFailed {
                    id,
                    node_id,
                    index,
                    error,
                }
            }
            NodeEvent::RetryScheduled { retry_index, error } => {
                let (node_type, node_title) = match self.graph.node(&node_id) {
                    Some(node) => (node.kind().as_str(), node.title().to_string()),
                    None => ("unknown", node_id.clone()),
                };
                GraphEngineEvent::NodeRunRetry {
                    id,
                    node_type: node_type.to_string(),
                    node_title,
                    node_id,
                    error,
                    retry_index,
                }
            }
        };
        self.emit(event).await;
    }

    /// Layers see every event before the caller does.
    async fn emit(&self, event: GraphEngineEvent) {
        for layer in &self.layers {
            if let Err(e) = layer.on_event(&self.layer_ctx, &event).await {
                warn!(layer = layer.name(), event = event.name(), error = %e, "layer on_event failed");
            }
        }
        self.emitter.emit(event).await;
    }
}

/// Edge handle that decides which outgoing edges are taken. `None` takes all.
fn selected_handle(node: &dyn Node, result: &NodeRunResult, is_exception: bool) -> Option<String> {
    let fail_branch = node.base().error_strategy == ErrorStrategy::FailBranch;
    if is_exception {
        return fail_branch.then(|| FAIL_BRANCH_HANDLE.to_string());
    }
    if node.kind().is_branch() {
        return Some(result.edge_source_handle.clone());
    }
    if fail_branch {
        return Some(SUCCESS_BRANCH_HANDLE.to_string());
    }
    None
}

/// Run a node with its retry policy and timeout, observing cancellation.
async fn execute_node(node: &dyn Node, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
    let base = node.base();
    let max_retries = base.retry_config.effective_max_retries();
    let mut attempt = 0u32;

    loop {
        let run = async {
            match base.timeout_secs {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), node.run(ctx))
                    .await
                    .unwrap_or(Err(NodeError::Timeout(secs))),
                None => node.run(ctx).await,
            }
        };
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(NodeError::Cancelled),
            r = run => r,
        };

        match result {
            Ok(mut r) => {
                r.retry_index = attempt;
                return Ok(r);
            }
            Err(e) if attempt < max_retries && e.is_retryable() && !ctx.cancel.is_cancelled() => {
                attempt += 1;
                debug!(node_id = node.id(), attempt, error = %e, "retrying node");
                ctx.events
                    .send(NodeEvent::RetryScheduled {
                        retry_index: attempt,
                        error: e.to_string(),
                    })
                    .await;
                let interval = base.retry_config.retry_interval_ms;
                if interval > 0 {
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(interval)) => {}
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}
