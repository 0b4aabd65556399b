use serde::{Deserialize, Serialize};

use super::Selector;
use crate::dsl::schema::GraphConfig;

/// What an iteration does when one item's sub-run fails.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IterationErrorMode {
    /// The whole iteration node fails.
    #[default]
    #[serde(alias = "terminated")]
    Terminated,
    /// The failed item contributes `null` and the remaining items still run.
    #[serde(alias = "continue_on_error")]
    ContinueOnError,
    /// The failed item is dropped from the aggregated output.
    #[serde(alias = "remove_abnormal_output", alias = "remove_abnormal")]
    RemoveAbnormalOutput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IterationNodeConfig {
    pub iterator_selector: Selector,
    /// Variable read from each finished sub-run, e.g. `["body_code", "result"]`.
    pub output_selector: Selector,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default)]
    pub parallel_nums: Option<usize>,
    #[serde(default)]
    pub error_handle_mode: IterationErrorMode,
    /// Body graph executed once per item. Its nodes read the current item
    /// as `[<iteration id>, "item"]` and its position as `[<iteration id>, "index"]`.
    pub sub_graph: GraphConfig,
    #[serde(default)]
    pub start_node_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VariableAggregatorNodeConfig {
    /// Candidate selectors, checked in order; the first one present wins.
    pub variables: Vec<Selector>,
    #[serde(default)]
    pub output_type: Option<String>,
}
