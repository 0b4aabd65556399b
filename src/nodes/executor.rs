//! Node contract, node kinds and the factory that builds nodes from config.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::EngineConfig;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::{Selector, VariablePool};
use crate::domain::repository::HumanInputFormRepository;
use crate::dsl::schema::{BaseNodeData, NodeConfig, NodeRunResult};
use crate::error::{NodeResult, WorkflowError, WorkflowResult};
use crate::sandbox::SandboxManager;

/// Every node type the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    End,
    Answer,
    IfElse,
    Code,
    HumanInput,
    Iteration,
    IterationStart,
    VariableAggregator,
    Llm,
    Tool,
    HttpRequest,
    KnowledgeRetrieval,
    QuestionClassifier,
    ParameterExtractor,
    TemplateTransform,
    DocumentExtractor,
    Agent,
    Loop,
}

/// Stored `type` string for each kind.
const NODE_KINDS: &[(&str, NodeKind)] = &[
    ("start", NodeKind::Start),
    ("end", NodeKind::End),
    ("answer", NodeKind::Answer),
    ("if-else", NodeKind::IfElse),
    ("code", NodeKind::Code),
    ("human-input", NodeKind::HumanInput),
    ("iteration", NodeKind::Iteration),
    ("iteration-start", NodeKind::IterationStart),
    ("variable-aggregator", NodeKind::VariableAggregator),
    ("llm", NodeKind::Llm),
    ("tool", NodeKind::Tool),
    ("http-request", NodeKind::HttpRequest),
    ("knowledge-retrieval", NodeKind::KnowledgeRetrieval),
    ("question-classifier", NodeKind::QuestionClassifier),
    ("parameter-extractor", NodeKind::ParameterExtractor),
    ("template-transform", NodeKind::TemplateTransform),
    ("document-extractor", NodeKind::DocumentExtractor),
    ("agent", NodeKind::Agent),
    ("loop", NodeKind::Loop),
];

impl NodeKind {
    pub fn from_type_str(node_type: &str) -> Option<Self> {
        NODE_KINDS
            .iter()
            .find(|(name, _)| *name == node_type)
            .map(|(_, kind)| *kind)
    }

    pub fn as_str(&self) -> &'static str {
        NODE_KINDS
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Kinds whose business logic lives outside the engine.
    pub fn is_delegated(&self) -> bool {
        matches!(
            self,
            NodeKind::Llm
                | NodeKind::Tool
                | NodeKind::HttpRequest
                | NodeKind::KnowledgeRetrieval
                | NodeKind::QuestionClassifier
                | NodeKind::ParameterExtractor
                | NodeKind::TemplateTransform
                | NodeKind::DocumentExtractor
                | NodeKind::Agent
                | NodeKind::Loop
        )
    }

    /// Kinds that pick one outgoing handle out of several.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            NodeKind::IfElse | NodeKind::HumanInput | NodeKind::QuestionClassifier
        )
    }
}

/// A typed unit of work in the graph.
///
/// Nodes are built once per graph and hold only their parsed config, so the
/// same instance can run many times (iteration bodies). A node suspends by
/// returning a result with status `paused`.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> NodeKind;

    fn base(&self) -> &BaseNodeData;

    fn title(&self) -> &str {
        let title = &self.base().title;
        if title.is_empty() {
            self.id()
        } else {
            title
        }
    }

    /// Output variable names, or `None` when they depend on runtime data.
    fn output_names(&self) -> Option<Vec<String>> {
        None
    }

    /// Selectors this node reads, checked against upstream outputs before the run.
    fn variable_selectors(&self) -> Vec<Selector> {
        Vec::new()
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult>;
}

// ================================
// Node events
// ================================

/// Progress a node reports while it runs.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    StreamChunk { chunk: String, is_final: bool },
    IterationStarted { total: usize },
    IterationItemSucceeded { index: usize, output: Value },
    IterationItemFailed { index: usize, error: String },
    RetryScheduled { retry_index: u32, error: String },
}

#[derive(Debug, Clone)]
pub struct NodeEventEnvelope {
    pub node_exec_id: String,
    pub node_id: String,
    pub event: NodeEvent,
}

/// Per-execution handle a node pushes its events through.
#[derive(Clone)]
pub struct NodeEventSender {
    node_exec_id: String,
    node_id: String,
    tx: mpsc::Sender<NodeEventEnvelope>,
}

impl NodeEventSender {
    pub fn new(
        node_exec_id: impl Into<String>,
        node_id: impl Into<String>,
        tx: mpsc::Sender<NodeEventEnvelope>,
    ) -> Self {
        Self {
            node_exec_id: node_exec_id.into(),
            node_id: node_id.into(),
            tx,
        }
    }

    /// A sender whose events go nowhere.
    pub fn detached(node_id: impl Into<String>) -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(String::new(), node_id, tx)
    }

    pub async fn send(&self, event: NodeEvent) {
        let _ = self
            .tx
            .send(NodeEventEnvelope {
                node_exec_id: self.node_exec_id.clone(),
                node_id: self.node_id.clone(),
                event,
            })
            .await;
    }
}

// ================================
// Run context and services
// ================================

/// Identifiers of the app/workflow the run belongs to.
#[derive(Debug, Clone, Default)]
pub struct GraphInitParams {
    pub tenant_id: String,
    pub app_id: String,
    pub workflow_id: String,
    pub user_id: String,
}

/// Business logic for node kinds implemented outside the engine (LLM, tool, ...).
#[async_trait]
pub trait ExternalNodeHandler: Send + Sync {
    /// Declared outputs for a node with this config, when known statically.
    fn output_names(&self, _config: &Value) -> Option<Vec<String>> {
        None
    }

    async fn run(
        &self,
        node_id: &str,
        config: &Value,
        ctx: &NodeRunContext,
    ) -> NodeResult<NodeRunResult>;
}

/// Shared collaborators handed to every node of a run.
#[derive(Clone, Default)]
pub struct NodeServices {
    pub runtime: RuntimeContext,
    pub init_params: GraphInitParams,
    pub sandbox_manager: Option<Arc<SandboxManager>>,
    pub form_repository: Option<Arc<dyn HumanInputFormRepository>>,
    pub external_handlers: HashMap<String, Arc<dyn ExternalNodeHandler>>,
}

impl NodeServices {
    pub fn with_external_handler(
        mut self,
        node_type: impl Into<String>,
        handler: Arc<dyn ExternalNodeHandler>,
    ) -> Self {
        self.external_handlers.insert(node_type.into(), handler);
        self
    }
}

/// Everything one node execution can see. The pool is a snapshot taken at
/// dispatch; nodes never write to the live pool.
pub struct NodeRunContext {
    pub execution_id: String,
    pub node_exec_id: String,
    pub pool: Arc<VariablePool>,
    pub events: NodeEventSender,
    pub cancel: CancellationToken,
    /// Form id recorded when this node paused earlier in the run.
    pub pending_form_id: Option<String>,
    /// Handles of this node's outgoing edges.
    pub outgoing_handles: Vec<String>,
    pub services: Arc<NodeServices>,
    pub config: Arc<EngineConfig>,
}

impl NodeRunContext {
    pub fn has_outgoing_handle(&self, handle: &str) -> bool {
        self.outgoing_handles.iter().any(|h| h == handle)
    }
}

// ================================
// Factory
// ================================

/// Builds typed nodes from stored config via the [`NodeKind`] table.
#[derive(Clone)]
pub struct NodeFactory {
    services: Arc<NodeServices>,
}

impl NodeFactory {
    pub fn new(services: Arc<NodeServices>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<NodeServices> {
        &self.services
    }

    pub fn create(&self, config: &NodeConfig) -> WorkflowResult<Arc<dyn Node>> {
        let node_id = config.id.as_str();
        if node_id.is_empty() {
            return Err(WorkflowError::GraphConfig("node without id".into()));
        }
        let node_type = config
            .data
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                WorkflowError::GraphConfig(format!("node '{}' has no data.type", node_id))
            })?;
        let kind =
            NodeKind::from_type_str(node_type).ok_or_else(|| WorkflowError::UnknownNodeType {
                node_id: node_id.to_string(),
                node_type: node_type.to_string(),
            })?;
        let invalid = |error: String| WorkflowError::InvalidNodeConfig {
            node_id: node_id.to_string(),
            error,
        };
        let base: BaseNodeData =
            serde_json::from_value(config.data.clone()).map_err(|e| invalid(e.to_string()))?;

        use super::control_flow::{AnswerNode, EndNode, IfElseNode, StartNode};
        use super::flow::{IterationNode, IterationStartNode};
        use super::human_input::HumanInputNode;
        use super::transform::{CodeNode, DelegatedNode, VariableAggregatorNode};

        let data = &config.data;
        let node: Arc<dyn Node> = match kind {
            NodeKind::Start => Arc::new(StartNode::init_node_data(node_id, base, data).map_err(|e| invalid(e.to_string()))?),
            NodeKind::End => Arc::new(EndNode::init_node_data(node_id, base, data).map_err(|e| invalid(e.to_string()))?),
            NodeKind::Answer => Arc::new(AnswerNode::init_node_data(node_id, base, data).map_err(|e| invalid(e.to_string()))?),
            NodeKind::IfElse => Arc::new(IfElseNode::init_node_data(node_id, base, data).map_err(|e| invalid(e.to_string()))?),
            NodeKind::Code => Arc::new(CodeNode::init_node_data(node_id, base, data).map_err(|e| invalid(e.to_string()))?),
            NodeKind::VariableAggregator => Arc::new(
                VariableAggregatorNode::init_node_data(node_id, base, data)
                    .map_err(|e| invalid(e.to_string()))?,
            ),
            NodeKind::IterationStart => Arc::new(IterationStartNode::new(node_id, base)),
            NodeKind::HumanInput => {
                if self.services.form_repository.is_none() {
                    return Err(invalid(
                        "human-input node requires a form repository".to_string(),
                    ));
                }
                Arc::new(
                    HumanInputNode::init_node_data(node_id, base, data)
                        .map_err(|e| invalid(e.to_string()))?,
                )
            }
            NodeKind::Iteration => Arc::new(IterationNode::init_node_data(node_id, base, data, self)?),
            _ => {
                let handler = self
                    .services
                    .external_handlers
                    .get(node_type)
                    .cloned()
                    .ok_or_else(|| invalid(format!("no handler registered for '{}'", node_type)))?;
                Arc::new(DelegatedNode::new(node_id, kind, base, data.clone(), handler))
            }
        };
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_config(id: &str, data: Value) -> NodeConfig {
        NodeConfig {
            id: id.into(),
            data,
        }
    }

    #[test]
    fn test_kind_table_round_trips_every_type() {
        for (name, kind) in NODE_KINDS {
            assert_eq!(NodeKind::from_type_str(name), Some(*kind));
            assert_eq!(kind.as_str(), *name);
        }
        assert_eq!(NodeKind::from_type_str("magic"), None);
        assert!(NodeKind::Llm.is_delegated());
        assert!(!NodeKind::Code.is_delegated());
    }

    #[test]
    fn test_factory_builds_builtin_nodes() {
        let factory = NodeFactory::new(Arc::new(NodeServices::default()));
        let node = factory
            .create(&node_config("s", json!({"type": "start", "title": "Start"})))
            .unwrap();
        assert_eq!(node.kind(), NodeKind::Start);
        assert_eq!(node.title(), "Start");

        let end = factory
            .create(&node_config("e", json!({"type": "end", "outputs": []})))
            .unwrap();
        assert_eq!(end.title(), "e");
    }

    #[test]
    fn test_factory_errors() {
        let factory = NodeFactory::new(Arc::new(NodeServices::default()));
        assert!(matches!(
            factory.create(&node_config("x", json!({"type": "magic"}))),
            Err(WorkflowError::UnknownNodeType { node_type, .. }) if node_type == "magic"
        ));
        assert!(matches!(
            factory.create(&node_config("x", json!({"title": "no type"}))),
            Err(WorkflowError::GraphConfig(_))
        ));
        assert!(matches!(
            factory.create(&node_config("llm", json!({"type": "llm"}))),
            Err(WorkflowError::InvalidNodeConfig { node_id, .. }) if node_id == "llm"
        ));
        assert!(matches!(
            factory.create(&node_config("hi", json!({"type": "human-input"}))),
            Err(WorkflowError::InvalidNodeConfig { .. })
        ));
        assert!(matches!(
            factory.create(&node_config("if", json!({"type": "if-else", "cases": "bad"}))),
            Err(WorkflowError::InvalidNodeConfig { .. })
        ));
    }
}
