//! Nodes whose business logic is provided by an [`ExternalNodeHandler`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::dsl::schema::{BaseNodeData, NodeRunResult};
use crate::error::NodeResult;
use crate::nodes::executor::{ExternalNodeHandler, Node, NodeKind, NodeRunContext};

/// Engine-side shell around an externally implemented node (LLM, tool, ...).
/// Events, retries and error strategies apply to it like any other node.
pub struct DelegatedNode {
    id: String,
    kind: NodeKind,
    base: BaseNodeData,
    config: Value,
    handler: Arc<dyn ExternalNodeHandler>,
}

impl DelegatedNode {
    pub fn new(
        id: &str,
        kind: NodeKind,
        base: BaseNodeData,
        config: Value,
        handler: Arc<dyn ExternalNodeHandler>,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind,
            base,
            config,
            handler,
        }
    }
}

#[async_trait]
impl Node for DelegatedNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        self.handler.output_names(&self.config)
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        self.handler.run(&self.id, &self.config, ctx).await
    }
}
