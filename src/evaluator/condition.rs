use crate::core::variable_pool::{Segment, VariablePool};
use crate::domain::model::{Case, ComparisonOperator, Condition, LogicalOperator};
use serde_json::Value;

/// Handle selected when no case matches.
pub const ELSE_CASE_ID: &str = "false";

/// Evaluate if-else cases, returning the case_id of the first matching case,
/// or [`ELSE_CASE_ID`] when none matches.
pub fn evaluate_cases(cases: &[Case], pool: &VariablePool) -> String {
    cases
        .iter()
        .find(|case| evaluate_case(case, pool))
        .map(|case| case.case_id.clone())
        .unwrap_or_else(|| ELSE_CASE_ID.to_string())
}

/// Evaluate a single case (AND/OR logic)
pub fn evaluate_case(case: &Case, pool: &VariablePool) -> bool {
    match case.logical_operator {
        LogicalOperator::And => case.conditions.iter().all(|c| evaluate_condition(c, pool)),
        LogicalOperator::Or => case.conditions.iter().any(|c| evaluate_condition(c, pool)),
    }
}

/// Evaluate a single condition. A missing variable compares as `None`.
pub fn evaluate_condition(cond: &Condition, pool: &VariablePool) -> bool {
    let actual = pool
        .get_optional(&cond.variable_selector)
        .unwrap_or(Segment::None);
    let expected = &cond.value;

    match &cond.comparison_operator {
        ComparisonOperator::Contains => eval_contains(&actual, expected),
        ComparisonOperator::NotContains => !eval_contains(&actual, expected),
        ComparisonOperator::StartWith => actual
            .to_display_string()
            .starts_with(&value_to_string(expected)),
        ComparisonOperator::EndWith => actual
            .to_display_string()
            .ends_with(&value_to_string(expected)),

        ComparisonOperator::Is => actual.to_display_string() == value_to_string(expected),
        ComparisonOperator::IsNot => actual.to_display_string() != value_to_string(expected),

        ComparisonOperator::Empty => actual.is_empty(),
        ComparisonOperator::NotEmpty => !actual.is_empty(),

        ComparisonOperator::In => eval_in(&actual, expected),
        ComparisonOperator::NotIn => !eval_in(&actual, expected),
        ComparisonOperator::AllOf => eval_all_of(&actual, expected),

        ComparisonOperator::Equal => compare_numbers(&actual, expected, |a, b| (a - b).abs() < f64::EPSILON),
        ComparisonOperator::NotEqual => match (actual.as_f64(), value_to_f64(expected)) {
            (Some(a), Some(b)) => (a - b).abs() >= f64::EPSILON,
            _ => true,
        },
        ComparisonOperator::GreaterThan => compare_numbers(&actual, expected, |a, b| a > b),
        ComparisonOperator::LessThan => compare_numbers(&actual, expected, |a, b| a < b),
        ComparisonOperator::GreaterOrEqual => compare_numbers(&actual, expected, |a, b| a >= b),
        ComparisonOperator::LessOrEqual => compare_numbers(&actual, expected, |a, b| a <= b),

        ComparisonOperator::Null => actual.is_none(),
        ComparisonOperator::NotNull => !actual.is_none(),
    }
}

fn compare_numbers(actual: &Segment, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), value_to_f64(expected)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_string_vec(v: &Value) -> Vec<String> {
    match v {
        Value::Array(arr) => arr.iter().map(value_to_string).collect(),
        Value::String(s) => vec![s.clone()],
        _ => vec![],
    }
}

fn eval_contains(actual: &Segment, expected: &Value) -> bool {
    let e = value_to_string(expected);
    match actual {
        Segment::String(s) => s.contains(&e),
        Segment::ArrayString(arr) => arr.iter().any(|s| s == &e),
        Segment::Array(arr) => arr.iter().any(|s| s.to_display_string() == e),
        _ => false,
    }
}

fn eval_in(actual: &Segment, expected: &Value) -> bool {
    value_to_string_vec(expected).contains(&actual.to_display_string())
}

fn eval_all_of(actual: &Segment, expected: &Value) -> bool {
    let Some(items) = actual.as_items() else {
        return false;
    };
    let actual_strs: Vec<String> = items.iter().map(Segment::to_display_string).collect();
    value_to_string_vec(expected)
        .iter()
        .all(|e| actual_strs.contains(e))
}
