//! High-level entry point: builds the graph and runtime state, attaches
//! layers and runs the engine on its own task.
//!
//! [`WorkflowEntry`] (constructed via [`WorkflowEntryBuilder`]) either starts
//! a fresh run or continues a paused one from a snapshot. The returned
//! [`WorkflowRunHandle`] carries the event stream and a command sender.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::command_channel::{CommandSender, InMemoryCommandChannel};
use crate::core::dispatcher::{EngineConfig, GraphEngine, GraphRunOutcome};
use crate::core::event_bus::{EventEmitter, GraphEngineEvent};
use crate::core::runtime_state::{GraphRuntimeState, SnapshotError};
use crate::core::snapshot_store::RuntimeStateStore;
use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::GraphConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::types::Graph;
use crate::layers::GraphEngineLayer;
use crate::nodes::executor::{NodeFactory, NodeServices};

/// System variable holding the execution id.
pub const WORKFLOW_RUN_ID_VARIABLE: &str = "workflow_run_id";

enum StateSource {
    Fresh,
    Snapshot(String),
    Store(String),
}

pub struct WorkflowEntryBuilder {
    graph_config: GraphConfig,
    root_node_id: Option<String>,
    services: NodeServices,
    config: EngineConfig,
    execution_id: Option<String>,
    user_inputs: HashMap<String, Value>,
    system_vars: HashMap<String, Value>,
    environment_vars: HashMap<String, Value>,
    conversation_vars: HashMap<String, Value>,
    layers: Vec<Arc<dyn GraphEngineLayer>>,
    snapshot_store: Option<Arc<dyn RuntimeStateStore>>,
    source: StateSource,
}

impl WorkflowEntryBuilder {
    pub fn services(mut self, services: NodeServices) -> Self {
        self.services = services;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Entry node of the graph; detected from the graph when unset.
    pub fn root_node_id(mut self, id: impl Into<String>) -> Self {
        self.root_node_id = Some(id.into());
        self
    }

    /// Fixed id for a fresh run; generated otherwise.
    pub fn execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn user_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.user_inputs = inputs;
        self
    }

    pub fn system_vars(mut self, vars: HashMap<String, Value>) -> Self {
        self.system_vars = vars;
        self
    }

    pub fn environment_vars(mut self, vars: HashMap<String, Value>) -> Self {
        self.environment_vars = vars;
        self
    }

    pub fn conversation_vars(mut self, vars: HashMap<String, Value>) -> Self {
        self.conversation_vars = vars;
        self
    }

    pub fn layer(mut self, layer: Arc<dyn GraphEngineLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Paused runs are saved here and finished runs are removed.
    pub fn snapshot_store(mut self, store: Arc<dyn RuntimeStateStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Continue from a snapshot produced by an earlier pause. Inputs and
    /// variables set on the builder are ignored; the snapshot's pool wins.
    pub fn resume_from_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.source = StateSource::Snapshot(snapshot.into());
        self
    }

    /// Continue the paused run saved in the snapshot store under `execution_id`.
    pub fn resume_from_store(mut self, execution_id: impl Into<String>) -> Self {
        self.source = StateSource::Store(execution_id.into());
        self
    }

    pub async fn build(self) -> WorkflowResult<WorkflowEntry> {
        let services = Arc::new(self.services);
        let factory = NodeFactory::new(Arc::clone(&services));
        let graph = Graph::init(&self.graph_config, &factory, self.root_node_id.as_deref())?;

        let state = match self.source {
            StateSource::Fresh => {
                let execution_id = self
                    .execution_id
                    .unwrap_or_else(|| services.runtime.id_generator.next_id());
                let mut system_vars = self.system_vars;
                system_vars
                    .entry(WORKFLOW_RUN_ID_VARIABLE.to_string())
                    .or_insert_with(|| Value::String(execution_id.clone()));
                let pool = VariablePool::new()
                    .with_system_variables(system_vars)
                    .with_environment_variables(self.environment_vars)
                    .with_conversation_variables(self.conversation_vars)
                    .with_user_inputs(self.user_inputs);
                GraphRuntimeState::new(execution_id, pool, services.runtime.time_provider.now())
            }
            StateSource::Snapshot(snapshot) => GraphRuntimeState::from_snapshot(&snapshot)?,
            StateSource::Store(execution_id) => {
                let store = self.snapshot_store.as_ref().ok_or_else(|| {
                    WorkflowError::InternalError("resume from store without a snapshot store".into())
                })?;
                let snapshot = store
                    .load(&execution_id)
                    .await?
                    .ok_or(SnapshotError::NotFound(execution_id))?;
                GraphRuntimeState::from_snapshot(&snapshot)?
            }
        };
        ensure_state_matches_graph(&state, &graph)?;

        Ok(WorkflowEntry {
            graph: Arc::new(graph),
            state,
            config: Arc::new(self.config),
            services,
            layers: self.layers,
            snapshot_store: self.snapshot_store,
        })
    }
}

/// A snapshot taken against a different graph must not be resumed.
fn ensure_state_matches_graph(state: &GraphRuntimeState, graph: &Graph) -> WorkflowResult<()> {
    let snapshot = state.state_manager().snapshot();
    if let Some(node_id) = snapshot
        .node_states
        .keys()
        .chain(state.paused_nodes().iter().map(|p| &p.node_id))
        .find(|id| !graph.contains_node(id))
    {
        return Err(WorkflowError::NodeNotFound(node_id.clone()));
    }
    if let Some(edge_id) = snapshot.edge_states.keys().find(|id| graph.edge(id).is_none()) {
        return Err(WorkflowError::EdgeNotFound(edge_id.clone()));
    }
    Ok(())
}

/// A graph plus the state to run it from, ready to start.
pub struct WorkflowEntry {
    graph: Arc<Graph>,
    state: GraphRuntimeState,
    config: Arc<EngineConfig>,
    services: Arc<NodeServices>,
    layers: Vec<Arc<dyn GraphEngineLayer>>,
    snapshot_store: Option<Arc<dyn RuntimeStateStore>>,
}

impl WorkflowEntry {
    pub fn builder(graph_config: GraphConfig) -> WorkflowEntryBuilder {
        WorkflowEntryBuilder {
            graph_config,
            root_node_id: None,
            services: NodeServices::default(),
            config: EngineConfig::default(),
            execution_id: None,
            user_inputs: HashMap::new(),
            system_vars: HashMap::new(),
            environment_vars: HashMap::new(),
            conversation_vars: HashMap::new(),
            layers: Vec::new(),
            snapshot_store: None,
            source: StateSource::Fresh,
        }
    }

    pub fn execution_id(&self) -> &str {
        self.state.execution_id()
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Start the engine on a new task.
    pub fn run(self) -> WorkflowRunHandle {
        let execution_id = self.state.execution_id().to_string();
        let (emitter, events) = EventEmitter::channel(self.config.event_buffer);
        let (commands, channel) = InMemoryCommandChannel::new();
        let cancel = CancellationToken::new();

        let mut engine = GraphEngine::new(
            self.graph,
            self.state,
            self.config,
            self.services,
            emitter,
        )
        .with_command_channel(channel)
        .with_cancel_token(cancel.clone());
        for layer in self.layers {
            engine = engine.with_layer(layer);
        }

        let store = self.snapshot_store;
        let run_id = execution_id.clone();
        let join = tokio::spawn(async move {
            let outcome = engine.run().await;
            if let Some(store) = store {
                sync_snapshot(store.as_ref(), &run_id, &outcome).await;
            }
            outcome
        });

        WorkflowRunHandle {
            execution_id,
            events: Some(events),
            commands,
            cancel,
            join,
        }
    }
}

async fn sync_snapshot(store: &dyn RuntimeStateStore, execution_id: &str, outcome: &GraphRunOutcome) {
    let result = match outcome {
        GraphRunOutcome::Paused { snapshot, .. } => store.save(execution_id, snapshot).await,
        _ => store.delete(execution_id).await,
    };
    match result {
        Ok(()) => info!(execution_id, status = ?outcome.status(), "snapshot store updated"),
        Err(e) => warn!(execution_id, error = %e, "snapshot store update failed"),
    }
}

/// A run in progress.
///
/// Events must be consumed (or the receiver released through [`wait`]) or
/// the engine stalls once the bounded event buffer fills up.
///
/// [`wait`]: WorkflowRunHandle::wait
pub struct WorkflowRunHandle {
    execution_id: String,
    events: Option<mpsc::Receiver<GraphEngineEvent>>,
    commands: CommandSender,
    cancel: CancellationToken,
    join: JoinHandle<GraphRunOutcome>,
}

impl WorkflowRunHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Next engine event, or `None` once the run has ended.
    pub async fn next_event(&mut self) -> Option<GraphEngineEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub fn commands(&self) -> &CommandSender {
        &self.commands
    }

    /// Hard stop: cancels in-flight nodes without waiting for the next poll.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drop the event stream and wait for the outcome.
    pub async fn wait(mut self) -> WorkflowResult<GraphRunOutcome> {
        self.events = None;
        self.join
            .await
            .map_err(|e| WorkflowError::InternalError(format!("engine task failed: {}", e)))
    }

    /// Collect every event, then the outcome.
    pub async fn collect(mut self) -> WorkflowResult<(Vec<GraphEngineEvent>, GraphRunOutcome)> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        let outcome = self.wait().await?;
        Ok((events, outcome))
    }
}
