//! Code node: runs user code in the execution's sandbox.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::core::variable_pool::{Segment, SegmentType, Selector};
use crate::dsl::schema::{BaseNodeData, NodeRunResult};
use crate::error::{NodeError, NodeResult};
use crate::nodes::executor::{Node, NodeKind, NodeRunContext};
use crate::nodes::parse_config;
use crate::sandbox::{CodeExecutionRequest, CodeLanguage};

const DEFAULT_CODE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct VariableMapping {
    pub variable: String,
    pub value_selector: Selector,
}

#[derive(Debug, Clone, Deserialize)]
struct OutputSpec {
    #[serde(rename = "type")]
    output_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CodeNodeConfig {
    #[serde(alias = "language")]
    code_language: CodeLanguage,
    code: String,
    #[serde(default)]
    variables: Vec<VariableMapping>,
    #[serde(default)]
    outputs: HashMap<String, OutputSpec>,
}

pub struct CodeNode {
    id: String,
    base: BaseNodeData,
    language: CodeLanguage,
    code: String,
    variables: Vec<VariableMapping>,
    outputs: Vec<(String, SegmentType)>,
}

impl CodeNode {
    pub fn init_node_data(id: &str, base: BaseNodeData, data: &Value) -> NodeResult<Self> {
        let cfg: CodeNodeConfig = parse_config(data)?;
        let mut outputs = Vec::with_capacity(cfg.outputs.len());
        for (name, spec) in cfg.outputs {
            let ty = SegmentType::from_dsl_type(&spec.output_type).ok_or_else(|| {
                NodeError::ConfigError(format!(
                    "output '{}' has unknown type '{}'",
                    name, spec.output_type
                ))
            })?;
            outputs.push((name, ty));
        }
        outputs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self {
            id: id.to_string(),
            base,
            language: cfg.code_language,
            code: cfg.code,
            variables: cfg.variables,
            outputs,
        })
    }

    fn timeout(&self) -> Duration {
        self.base
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CODE_TIMEOUT)
    }
}

#[async_trait]
impl Node for CodeNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Code
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        if self.outputs.is_empty() {
            None
        } else {
            Some(self.outputs.iter().map(|(name, _)| name.clone()).collect())
        }
    }

    fn variable_selectors(&self) -> Vec<Selector> {
        self.variables.iter().map(|v| v.value_selector.clone()).collect()
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        let manager = ctx.services.sandbox_manager.as_ref().ok_or_else(|| {
            NodeError::ExecutionError("no sandbox manager configured".to_string())
        })?;
        let sandbox = manager.get(&ctx.execution_id)?;

        let mut inputs = serde_json::Map::new();
        for mapping in &self.variables {
            let value = ctx
                .pool
                .get_optional(&mapping.value_selector)
                .map(|s| s.to_value())
                .unwrap_or(Value::Null);
            inputs.insert(mapping.variable.clone(), value);
        }

        let result = sandbox
            .execute_code(CodeExecutionRequest {
                code: self.code.clone(),
                language: self.language,
                inputs: Value::Object(inputs.clone()),
                timeout: self.timeout(),
            })
            .await?;

        let Value::Object(returned) = result.output else {
            return Err(NodeError::TypeError(
                "code must return an object".to_string(),
            ));
        };

        let mut outputs = HashMap::new();
        if self.outputs.is_empty() {
            for (name, value) in &returned {
                outputs.insert(name.clone(), Segment::from_value(value));
            }
        } else {
            for (name, ty) in &self.outputs {
                let value = returned.get(name).ok_or_else(|| {
                    NodeError::ExecutionError(format!("output '{}' is missing", name))
                })?;
                let segment = Segment::from_value(value);
                if !segment.matches_type(ty) {
                    return Err(NodeError::TypeError(format!(
                        "output '{}' is not of type {:?}",
                        name, ty
                    )));
                }
                outputs.insert(name.clone(), segment);
            }
        }

        Ok(NodeRunResult::succeeded(outputs).with_inputs(inputs.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variable_pool::VariablePool;
    use crate::nodes::executor::NodeServices;
    use crate::nodes::test_support::run_context_with;
    use crate::sandbox::{
        CodeExecutionResult, EnvironmentMetadata, SandboxError, SandboxManager,
        VirtualEnvironment,
    };
    use serde_json::json;
    use std::sync::Arc;

    /// Echoes its inputs back, doubling `x`.
    struct DoublingEnv(EnvironmentMetadata);

    #[async_trait]
    impl VirtualEnvironment for DoublingEnv {
        fn metadata(&self) -> &EnvironmentMetadata {
            &self.0
        }

        async fn execute_code(
            &self,
            request: CodeExecutionRequest,
        ) -> Result<CodeExecutionResult, SandboxError> {
            let x = request.inputs["x"].as_i64().unwrap_or(0);
            Ok(CodeExecutionResult {
                output: json!({"result": x * 2, "label": "doubled"}),
                ..Default::default()
            })
        }

        async fn release_environment(&self) -> Result<(), SandboxError> {
            Ok(())
        }
    }

    fn services_with_sandbox() -> NodeServices {
        let manager = SandboxManager::new();
        manager.register(
            "exec-1",
            Arc::new(DoublingEnv(EnvironmentMetadata::default())),
        );
        NodeServices {
            sandbox_manager: Some(Arc::new(manager)),
            ..Default::default()
        }
    }

    fn node(outputs: Value) -> CodeNode {
        let base = serde_json::from_value(json!({"type": "code"})).unwrap();
        CodeNode::init_node_data(
            "code",
            base,
            &json!({
                "code_language": "python3",
                "code": "def main(x): return {'result': x * 2}",
                "variables": [{"variable": "x", "value_selector": ["start", "x"]}],
                "outputs": outputs,
            }),
        )
        .unwrap()
    }

    fn pool() -> VariablePool {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "x"), 21i64).unwrap();
        pool
    }

    #[tokio::test]
    async fn test_code_runs_in_registered_sandbox() {
        let node = node(json!({"result": {"type": "number"}}));
        let result = node
            .run(&run_context_with(pool(), services_with_sandbox()))
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], Segment::Integer(42));
        assert!(!result.outputs.contains_key("label"));
        assert_eq!(node.output_names(), Some(vec!["result".to_string()]));
    }

    #[tokio::test]
    async fn test_code_output_type_checked() {
        let node = node(json!({"label": {"type": "number"}}));
        let err = node
            .run(&run_context_with(pool(), services_with_sandbox()))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::TypeError(_)));
    }

    #[tokio::test]
    async fn test_code_without_sandbox_fails() {
        let node = node(json!({}));
        let services = NodeServices {
            sandbox_manager: Some(Arc::new(SandboxManager::new())),
            ..Default::default()
        };
        let err = node.run(&run_context_with(pool(), services)).await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::SandboxError(SandboxError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_unknown_output_type_rejected() {
        let base = serde_json::from_value(json!({"type": "code"})).unwrap();
        let err = CodeNode::init_node_data(
            "code",
            base,
            &json!({"code_language": "python3", "code": "", "outputs": {"r": {"type": "tensor"}}}),
        );
        assert!(err.is_err());
    }
}
