use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Selector;

/// Comparison operators used by condition evaluation.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Contains,
    #[serde(alias = "not contains")]
    NotContains,
    #[serde(alias = "start with")]
    StartWith,
    #[serde(alias = "end with")]
    EndWith,
    Is,
    #[serde(alias = "is not")]
    IsNot,
    Empty,
    #[serde(alias = "not empty")]
    NotEmpty,
    In,
    #[serde(alias = "not in")]
    NotIn,
    #[serde(alias = "all of")]
    AllOf,
    #[serde(alias = "=")]
    Equal,
    #[serde(alias = "≠")]
    NotEqual,
    #[serde(alias = ">", alias = "greater_than")]
    GreaterThan,
    #[serde(alias = "<", alias = "less_than")]
    LessThan,
    #[serde(alias = "≥", alias = "greater_than_or_equal")]
    GreaterOrEqual,
    #[serde(alias = "≤", alias = "less_than_or_equal")]
    LessOrEqual,
    Null,
    #[serde(alias = "not null")]
    NotNull,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Condition {
    pub variable_selector: Selector,
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub value: Value,
}

/// One if-else case. Its `case_id` doubles as the outgoing edge handle.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
