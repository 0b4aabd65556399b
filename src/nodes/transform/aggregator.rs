//! Variable Aggregator node.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::variable_pool::{Segment, SegmentType, Selector};
use crate::domain::model::VariableAggregatorNodeConfig;
use crate::dsl::schema::{BaseNodeData, NodeRunResult};
use crate::error::{NodeError, NodeResult};
use crate::nodes::executor::{Node, NodeKind, NodeRunContext};
use crate::nodes::parse_config;

/// Returns the first present, non-null variable from a list of selectors.
/// Typically joins the branches of an if-else back into one value.
pub struct VariableAggregatorNode {
    id: String,
    base: BaseNodeData,
    config: VariableAggregatorNodeConfig,
    output_type: Option<SegmentType>,
}

impl VariableAggregatorNode {
    pub fn init_node_data(id: &str, base: BaseNodeData, data: &Value) -> NodeResult<Self> {
        let config: VariableAggregatorNodeConfig = parse_config(data)?;
        let output_type = match config.output_type.as_deref() {
            Some(t) => Some(SegmentType::from_dsl_type(t).ok_or_else(|| {
                NodeError::ConfigError(format!("unknown output_type '{}'", t))
            })?),
            None => None,
        };
        Ok(Self {
            id: id.to_string(),
            base,
            config,
            output_type,
        })
    }
}

#[async_trait]
impl Node for VariableAggregatorNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::VariableAggregator
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        Some(vec!["output".to_string()])
    }

    // Branches not taken never write their outputs, so the candidates are
    // not checked statically.
    fn variable_selectors(&self) -> Vec<Selector> {
        Vec::new()
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        let value = self
            .config
            .variables
            .iter()
            .filter_map(|s| ctx.pool.get_optional(s))
            .find(|v| !v.is_none())
            .unwrap_or(Segment::None);

        if let Some(expected) = &self.output_type {
            if !value.matches_type(expected) {
                return Err(NodeError::TypeError(format!(
                    "aggregated value does not match output_type {:?}",
                    expected
                )));
            }
        }

        let mut outputs = HashMap::new();
        outputs.insert("output".to_string(), value);
        Ok(NodeRunResult::succeeded(outputs))
    }
}
