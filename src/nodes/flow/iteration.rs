//! Iteration node: runs its body graph once per element of a list.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

use crate::core::dispatcher::{EngineConfig, GraphEngine, GraphRunOutcome};
use crate::core::event_bus::EventEmitter;
use crate::core::runtime_state::GraphRuntimeState;
use crate::core::variable_pool::{Segment, Selector, VariablePool};
use crate::domain::model::{IterationErrorMode, IterationNodeConfig};
use crate::dsl::schema::{BaseNodeData, NodeRunResult};
use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
use crate::graph::types::Graph;
use crate::nodes::executor::{Node, NodeEvent, NodeFactory, NodeKind, NodeRunContext, NodeServices};
use crate::nodes::parse_config;

/// Metadata key listing the indices of failed items.
pub const FAILED_INDICES_KEY: &str = "failed_indices";

/// Entry point of an iteration body. Produces no outputs.
pub struct IterationStartNode {
    id: String,
    base: BaseNodeData,
}

impl IterationStartNode {
    pub fn new(id: &str, base: BaseNodeData) -> Self {
        Self {
            id: id.to_string(),
            base,
        }
    }
}

#[async_trait]
impl Node for IterationStartNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::IterationStart
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        Some(Vec::new())
    }

    async fn run(&self, _ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        Ok(NodeRunResult::default())
    }
}

/// Each item runs in its own nested engine on a copy of the pool, with the
/// current element at `[<iteration id>, "item"]` and its position at
/// `[<iteration id>, "index"]`. The value at `output_selector` after the
/// body finishes becomes that item's output.
pub struct IterationNode {
    id: String,
    base: BaseNodeData,
    config: IterationNodeConfig,
    body: Arc<Graph>,
}

impl IterationNode {
    pub fn init_node_data(
        id: &str,
        base: BaseNodeData,
        data: &Value,
        factory: &NodeFactory,
    ) -> WorkflowResult<Self> {
        let config: IterationNodeConfig =
            parse_config(data).map_err(|e| WorkflowError::InvalidNodeConfig {
                node_id: id.to_string(),
                error: e.to_string(),
            })?;
        let body = Graph::init(&config.sub_graph, factory, config.start_node_id.as_deref())?;
        Ok(Self {
            id: id.to_string(),
            base,
            config,
            body: Arc::new(body),
        })
    }

    fn parallelism(&self, config: &EngineConfig) -> usize {
        if self.config.is_parallel && config.parallel_enabled {
            self.config
                .parallel_nums
                .unwrap_or(config.default_parallel_nums)
                .max(1)
        } else {
            1
        }
    }
}

#[async_trait]
impl Node for IterationNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Iteration
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        Some(vec!["output".to_string()])
    }

    fn variable_selectors(&self) -> Vec<Selector> {
        vec![self.config.iterator_selector.clone()]
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        let items = ctx
            .pool
            .get(&self.config.iterator_selector)?
            .as_items()
            .ok_or_else(|| {
                NodeError::TypeError(format!(
                    "iterator {} is not an array",
                    self.config.iterator_selector
                ))
            })?;
        let total = items.len();
        let parallelism = self.parallelism(&ctx.config);
        debug!(node_id = %self.id, total, parallelism, "iteration started");
        ctx.events.send(NodeEvent::IterationStarted { total }).await;

        let mut pending = items.into_iter().enumerate();
        let mut workers: JoinSet<(usize, Result<Value, String>)> = JoinSet::new();
        let mut outputs: Vec<Option<Value>> = vec![None; total];
        let mut failed = Vec::new();

        loop {
            while workers.len() < parallelism {
                let Some((index, item)) = pending.next() else {
                    break;
                };
                let run = ItemRun {
                    body: Arc::clone(&self.body),
                    pool: (*ctx.pool).clone(),
                    iteration_id: self.id.clone(),
                    execution_id: ctx.execution_id.clone(),
                    output_selector: self.config.output_selector.clone(),
                    services: Arc::clone(&ctx.services),
                    config: Arc::clone(&ctx.config),
                };
                let cancel = ctx.cancel.child_token();
                workers.spawn(async move { (index, run.execute(index, item, cancel).await) });
            }

            let joined = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    workers.abort_all();
                    return Err(NodeError::Cancelled);
                }
                joined = workers.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            let (index, result) =
                joined.map_err(|e| NodeError::ExecutionError(format!("iteration worker: {}", e)))?;

            match result {
                Ok(output) => {
                    ctx.events
                        .send(NodeEvent::IterationItemSucceeded {
                            index,
                            output: output.clone(),
                        })
                        .await;
                    outputs[index] = Some(output);
                }
                Err(error) => {
                    ctx.events
                        .send(NodeEvent::IterationItemFailed {
                            index,
                            error: error.clone(),
                        })
                        .await;
                    match self.config.error_handle_mode {
                        IterationErrorMode::Terminated => {
                            workers.abort_all();
                            return Err(NodeError::ExecutionError(format!(
                                "iteration item {} failed: {}",
                                index, error
                            )));
                        }
                        IterationErrorMode::ContinueOnError => outputs[index] = Some(Value::Null),
                        IterationErrorMode::RemoveAbnormalOutput => {}
                    }
                    failed.push(index);
                }
            }
        }

        failed.sort_unstable();
        let output: Vec<Value> = outputs.into_iter().flatten().collect();
        let mut result = NodeRunResult::succeeded(HashMap::from([(
            "output".to_string(),
            Segment::from_value(&Value::Array(output)),
        )]));
        result
            .metadata
            .insert("iteration_count".to_string(), Value::from(total));
        result
            .metadata
            .insert(FAILED_INDICES_KEY.to_string(), Value::from(failed));
        Ok(result)
    }
}

/// Everything one item's nested run needs, owned so it can move to a task.
struct ItemRun {
    body: Arc<Graph>,
    pool: VariablePool,
    iteration_id: String,
    execution_id: String,
    output_selector: Selector,
    services: Arc<NodeServices>,
    config: Arc<EngineConfig>,
}

impl ItemRun {
    async fn execute(
        self,
        index: usize,
        item: Segment,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Value, String> {
        let mut pool = self.pool;
        pool.add(&Selector::new(self.iteration_id.as_str(), "item"), item)
            .map_err(|e| e.to_string())?;
        pool.add(&Selector::new(self.iteration_id.as_str(), "index"), index as i64)
            .map_err(|e| e.to_string())?;

        let state = GraphRuntimeState::new(
            self.execution_id,
            pool,
            self.services.runtime.time_provider.now(),
        );
        let mut engine = GraphEngine::new(
            self.body,
            state,
            self.config,
            self.services,
            EventEmitter::detached(),
        )
        .with_cancel_token(cancel);

        match engine.run().await {
            GraphRunOutcome::Succeeded { .. } | GraphRunOutcome::PartialSucceeded { .. } => engine
                .runtime_state()
                .variable_pool()
                .get(&self.output_selector)
                .map(|segment| segment.to_value())
                .map_err(|e| e.to_string()),
            GraphRunOutcome::Failed { error, .. } => Err(error.to_string()),
            GraphRunOutcome::Aborted { reason, .. } => Err(format!(
                "iteration body aborted: {}",
                reason.unwrap_or_default()
            )),
            GraphRunOutcome::Paused { .. } => {
                Err("human input is not supported inside an iteration".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::executor::ExternalNodeHandler;
    use crate::nodes::test_support::run_context_with;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Doubles `[iter, item]`, failing on the values listed in `fail_on`.
    struct Doubler {
        fail_on: Vec<i64>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl Doubler {
        fn new(fail_on: Vec<i64>) -> Arc<Self> {
            Arc::new(Self {
                fail_on,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ExternalNodeHandler for Doubler {
        async fn run(
            &self,
            _node_id: &str,
            _config: &Value,
            ctx: &NodeRunContext,
        ) -> NodeResult<NodeRunResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let item = ctx.pool.get(&Selector::new("iter", "item"))?;
            let n = item.as_f64().unwrap_or_default() as i64;
            if self.fail_on.contains(&n) {
                return Err(NodeError::ExecutionError(format!("cannot double {}", n)));
            }
            Ok(NodeRunResult::succeeded(HashMap::from([(
                "result".to_string(),
                Segment::Integer(n * 2),
            )])))
        }
    }

    fn iteration(mode: &str, parallel: bool, handler: Arc<Doubler>) -> (IterationNode, NodeServices) {
        let services = NodeServices::default().with_external_handler("tool", handler);
        let factory = NodeFactory::new(Arc::new(services.clone()));
        let data = json!({
            "type": "iteration",
            "iterator_selector": ["start", "items"],
            "output_selector": ["double", "result"],
            "is_parallel": parallel,
            "parallel_nums": 2,
            "error_handle_mode": mode,
            "start_node_id": "iter-start",
            "sub_graph": {
                "nodes": [
                    {"id": "iter-start", "data": {"type": "iteration-start"}},
                    {"id": "double", "data": {"type": "tool"}}
                ],
                "edges": [{"source": "iter-start", "target": "double"}]
            }
        });
        let base = serde_json::from_value(data.clone()).unwrap();
        let node = IterationNode::init_node_data("iter", base, &data, &factory).unwrap();
        (node, services)
    }

    fn pool(items: Value) -> VariablePool {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "items"), items).unwrap();
        pool
    }

    #[tokio::test]
    async fn test_sequential_iteration_collects_outputs_in_order() {
        let handler = Doubler::new(vec![]);
        let (node, services) = iteration("terminated", false, handler.clone());
        let ctx = run_context_with(pool(json!([1, 2, 3])), services);
        let result = node.run(&ctx).await.unwrap();
        assert_eq!(result.output_values()["output"], json!([2, 4, 6]));
        assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parallel_continue_on_error_records_failure() {
        let handler = Doubler::new(vec![2]);
        let (node, services) = iteration("continue-on-error", true, handler.clone());
        let ctx = run_context_with(pool(json!([1, 2, 3])), services);
        let result = node.run(&ctx).await.unwrap();
        assert_eq!(result.output_values()["output"], json!([2, null, 6]));
        assert_eq!(result.metadata[FAILED_INDICES_KEY], json!([1]));
        assert!(handler.max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_remove_abnormal_output_drops_failed_items() {
        let (node, services) = iteration("remove-abnormal-output", true, Doubler::new(vec![1, 3]));
        let ctx = run_context_with(pool(json!([1, 2, 3])), services);
        let result = node.run(&ctx).await.unwrap();
        assert_eq!(result.output_values()["output"], json!([4]));
        assert_eq!(result.metadata[FAILED_INDICES_KEY], json!([0, 2]));
    }

    #[tokio::test]
    async fn test_terminated_mode_fails_node() {
        let (node, services) = iteration("terminated", false, Doubler::new(vec![2]));
        let ctx = run_context_with(pool(json!([1, 2, 3])), services);
        let err = node.run(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("iteration item 1 failed"));
    }

    #[tokio::test]
    async fn test_non_array_input_is_type_error() {
        let (node, services) = iteration("terminated", false, Doubler::new(vec![]));
        let ctx = run_context_with(pool(json!("nope")), services);
        assert!(matches!(node.run(&ctx).await, Err(NodeError::TypeError(_))));
    }

    #[tokio::test]
    async fn test_empty_list_yields_empty_output() {
        let (node, services) = iteration("terminated", true, Doubler::new(vec![]));
        let ctx = run_context_with(pool(json!([])), services);
        let result = node.run(&ctx).await.unwrap();
        assert_eq!(result.output_values()["output"], json!([]));
    }
}
