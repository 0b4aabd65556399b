use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::variable_pool::{Segment, Selector};
use crate::domain::model::{Case, Condition, LogicalOperator};
use crate::dsl::schema::{BaseNodeData, NodeRunResult};
use crate::error::{NodeError, NodeResult};
use crate::evaluator::evaluate_cases;
use crate::nodes::executor::{Node, NodeEvent, NodeKind, NodeRunContext};
use crate::template::{extract_selectors, render_template};

use super::parse_config;

// ================================
// Start Node
// ================================

#[derive(Debug, Clone, Deserialize)]
pub struct StartVariable {
    pub variable: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StartNodeConfig {
    #[serde(default)]
    variables: Vec<StartVariable>,
}

/// Copies the run's user inputs into its own scope.
pub struct StartNode {
    id: String,
    base: BaseNodeData,
    variables: Vec<StartVariable>,
}

impl StartNode {
    pub fn init_node_data(id: &str, base: BaseNodeData, data: &Value) -> NodeResult<Self> {
        let cfg: StartNodeConfig = parse_config(data)?;
        Ok(Self {
            id: id.to_string(),
            base,
            variables: cfg.variables,
        })
    }
}

#[async_trait]
impl Node for StartNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Start
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        if self.variables.is_empty() {
            None
        } else {
            Some(self.variables.iter().map(|v| v.variable.clone()).collect())
        }
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        let pool = &ctx.pool;
        let mut outputs = HashMap::new();

        if self.variables.is_empty() {
            for (name, value) in pool.user_inputs() {
                outputs.insert(name.clone(), value.clone());
            }
        }

        for var in &self.variables {
            let value = match (pool.user_input(&var.variable), &var.default) {
                (Some(v), _) if !v.is_none() => v.clone(),
                (_, Some(default)) => Segment::from_value(default),
                _ if var.required => {
                    return Err(NodeError::InputValidationError(format!(
                        "required input '{}' is missing",
                        var.variable
                    )))
                }
                _ => Segment::None,
            };
            outputs.insert(var.variable.clone(), value);
        }

        let inputs = outputs.iter().map(|(k, v)| (k.clone(), v.to_value())).collect();
        Ok(NodeRunResult::succeeded(outputs).with_inputs(inputs))
    }
}

// ================================
// End Node
// ================================

#[derive(Debug, Clone, Deserialize)]
pub struct OutputVariable {
    pub variable: String,
    #[serde(alias = "variable_selector")]
    pub value_selector: Selector,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EndNodeConfig {
    #[serde(default)]
    outputs: Vec<OutputVariable>,
}

/// Collects the run's final outputs.
pub struct EndNode {
    id: String,
    base: BaseNodeData,
    outputs: Vec<OutputVariable>,
}

impl EndNode {
    pub fn init_node_data(id: &str, base: BaseNodeData, data: &Value) -> NodeResult<Self> {
        let cfg: EndNodeConfig = parse_config(data)?;
        Ok(Self {
            id: id.to_string(),
            base,
            outputs: cfg.outputs,
        })
    }
}

#[async_trait]
impl Node for EndNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::End
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        Some(self.outputs.iter().map(|o| o.variable.clone()).collect())
    }

    fn variable_selectors(&self) -> Vec<Selector> {
        self.outputs.iter().map(|o| o.value_selector.clone()).collect()
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        let mut outputs = HashMap::new();
        for ov in &self.outputs {
            let value = ctx
                .pool
                .get_optional(&ov.value_selector)
                .unwrap_or(Segment::None);
            outputs.insert(ov.variable.clone(), value);
        }
        let inputs = outputs.iter().map(|(k, v)| (k.clone(), v.to_value())).collect();
        Ok(NodeRunResult::succeeded(outputs).with_inputs(inputs))
    }
}

// ================================
// Answer Node
// ================================

#[derive(Debug, Clone, Default, Deserialize)]
struct AnswerNodeConfig {
    #[serde(default)]
    answer: String,
}

pub struct AnswerNode {
    id: String,
    base: BaseNodeData,
    answer: String,
}

impl AnswerNode {
    pub fn init_node_data(id: &str, base: BaseNodeData, data: &Value) -> NodeResult<Self> {
        let cfg: AnswerNodeConfig = parse_config(data)?;
        Ok(Self {
            id: id.to_string(),
            base,
            answer: cfg.answer,
        })
    }
}

#[async_trait]
impl Node for AnswerNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Answer
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        Some(vec!["answer".to_string()])
    }

    fn variable_selectors(&self) -> Vec<Selector> {
        extract_selectors(&self.answer)
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        let rendered = render_template(&self.answer, &ctx.pool, false)?;
        ctx.events
            .send(NodeEvent::StreamChunk {
                chunk: rendered.clone(),
                is_final: true,
            })
            .await;

        let mut outputs = HashMap::new();
        outputs.insert("answer".to_string(), Segment::String(rendered));
        Ok(NodeRunResult::succeeded(outputs))
    }
}

// ================================
// IfElse Node
// ================================

#[derive(Debug, Clone, Default, Deserialize)]
struct IfElseNodeConfig {
    #[serde(default)]
    cases: Option<Vec<Case>>,
    /// Single-case form: evaluated as case `true`.
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    logical_operator: LogicalOperator,
}

/// Selects the handle of the first matching case, or `false`.
pub struct IfElseNode {
    id: String,
    base: BaseNodeData,
    cases: Vec<Case>,
}

impl IfElseNode {
    pub fn init_node_data(id: &str, base: BaseNodeData, data: &Value) -> NodeResult<Self> {
        let cfg: IfElseNodeConfig = parse_config(data)?;
        let cases = match cfg.cases {
            Some(cases) => cases,
            None => vec![Case {
                case_id: "true".to_string(),
                logical_operator: cfg.logical_operator,
                conditions: cfg.conditions,
            }],
        };
        Ok(Self {
            id: id.to_string(),
            base,
            cases,
        })
    }
}

#[async_trait]
impl Node for IfElseNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::IfElse
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        Some(vec!["result".to_string(), "selected_case_id".to_string()])
    }

    fn variable_selectors(&self) -> Vec<Selector> {
        self.cases
            .iter()
            .flat_map(|c| c.conditions.iter().map(|cond| cond.variable_selector.clone()))
            .collect()
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        let selected = evaluate_cases(&self.cases, &ctx.pool);

        let mut outputs = HashMap::new();
        outputs.insert(
            "result".to_string(),
            Segment::Boolean(selected != crate::evaluator::ELSE_CASE_ID),
        );
        outputs.insert(
            "selected_case_id".to_string(),
            Segment::String(selected.clone()),
        );
        Ok(NodeRunResult::succeeded(outputs).with_handle(selected))
    }
}
