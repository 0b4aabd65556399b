//! Graph config parser: converts raw JSON/YAML/TOML text into [`GraphConfig`].

use serde_json::Value;

use super::schema::GraphConfig;
use crate::error::WorkflowError;

/// Supported graph config formats.
#[derive(Debug, Clone, Copy)]
pub enum GraphConfigFormat {
    Json,
    Yaml,
    Toml,
}

/// Parse and shape-check a stored graph configuration.
pub fn parse_graph_config(
    content: &str,
    format: GraphConfigFormat,
) -> Result<GraphConfig, WorkflowError> {
    let raw: Value = match format {
        GraphConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| WorkflowError::GraphConfig(e.to_string()))?,
        GraphConfigFormat::Yaml => serde_saphyr::from_str(content)
            .map_err(|e| WorkflowError::GraphConfig(e.to_string()))?,
        GraphConfigFormat::Toml => {
            let toml_val: toml::Value = toml::from_str(content)
                .map_err(|e| WorkflowError::GraphConfig(e.to_string()))?;
            toml_value_to_json(toml_val)
        }
    };
    graph_config_from_value(raw)
}

/// Check that `nodes` and `edges` exist and are lists, then deserialize.
pub fn graph_config_from_value(raw: Value) -> Result<GraphConfig, WorkflowError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| WorkflowError::GraphConfig("graph config must be an object".into()))?;
    for key in ["nodes", "edges"] {
        match obj.get(key) {
            Some(Value::Array(_)) => {}
            Some(_) => {
                return Err(WorkflowError::GraphConfig(format!(
                    "'{}' in graph config must be a list",
                    key
                )))
            }
            None => {
                return Err(WorkflowError::GraphConfig(format!(
                    "graph config is missing '{}'",
                    key
                )))
            }
        }
    }
    serde_json::from_value(raw).map_err(|e| WorkflowError::GraphConfig(e.to_string()))
}

/// TOML has no null; datetimes are stringified.
fn toml_value_to_json(val: toml::Value) -> Value {
    match val {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_value_to_json).collect()),
        toml::Value::Table(tbl) => Value::Object(
            tbl.into_iter()
                .map(|(k, v)| (k, toml_value_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}
