pub mod control_flow;
pub mod executor;
pub mod flow;
pub mod human_input;
pub mod transform;

pub use executor::*;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{NodeError, NodeResult};

/// Deserialize a node's `data` block into its typed config.
pub(crate) fn parse_config<T: for<'de> Deserialize<'de>>(data: &Value) -> NodeResult<T> {
    serde_json::from_value(data.clone()).map_err(|e| NodeError::ConfigError(e.to_string()))
}
