use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, info_span, warn, Span};

use super::{GraphEngineLayer, LayerContext};
use crate::core::event_bus::GraphEngineEvent;
use crate::error::{WorkflowError, WorkflowResult};

/// Logs node lifecycle events with their durations inside one span per run.
pub struct TracingLayer {
    span: Mutex<Span>,
    run_started: Mutex<Option<Instant>>,
    node_started: Mutex<HashMap<String, Instant>>,
}

impl Default for TracingLayer {
    fn default() -> Self {
        Self {
            span: Mutex::new(Span::none()),
            run_started: Mutex::new(None),
            node_started: Mutex::new(HashMap::new()),
        }
    }
}

impl TracingLayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn elapsed_ms(&self, exec_id: &str) -> Option<u128> {
        self.node_started
            .lock()
            .remove(exec_id)
            .map(|t| t.elapsed().as_millis())
    }
}

#[async_trait]
impl GraphEngineLayer for TracingLayer {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn on_graph_start(&self, ctx: &LayerContext) -> WorkflowResult<()> {
        let span = info_span!(
            "graph_run",
            execution_id = %ctx.execution_id,
            workflow_id = %ctx.init_params.workflow_id,
            resumed = ctx.resumed
        );
        *self.span.lock() = span;
        *self.run_started.lock() = Some(Instant::now());
        Ok(())
    }

    async fn on_event(&self, _ctx: &LayerContext, event: &GraphEngineEvent) -> WorkflowResult<()> {
        let span = self.span.lock().clone();
        let _entered = span.enter();
        match event {
            GraphEngineEvent::NodeRunStarted {
                id,
                node_id,
                node_type,
                index,
                ..
            } => {
                self.node_started.lock().insert(id.clone(), Instant::now());
                info!(node_id = %node_id, node_type = %node_type, index, "node started");
            }
            GraphEngineEvent::NodeRunSucceeded { id, node_id, .. } => {
                info!(node_id = %node_id, duration_ms = ?self.elapsed_ms(id), "node succeeded");
            }
            GraphEngineEvent::NodeRunException {
                id, node_id, error, ..
            } => {
                warn!(
                    node_id = %node_id,
                    duration_ms = ?self.elapsed_ms(id),
                    error = %error,
                    "node ended with exception"
                );
            }
            GraphEngineEvent::NodeRunFailed {
                id, node_id, error, ..
            } => {
                warn!(
                    node_id = %node_id,
                    duration_ms = ?self.elapsed_ms(id),
                    error = %error,
                    "node failed"
                );
            }
            GraphEngineEvent::NodeRunPaused {
                id,
                node_id,
                form_id,
                ..
            } => {
                info!(
                    node_id = %node_id,
                    duration_ms = ?self.elapsed_ms(id),
                    form_id = ?form_id,
                    "node paused"
                );
            }
            GraphEngineEvent::NodeRunRetry {
                node_id,
                retry_index,
                error,
                ..
            } => {
                info!(node_id = %node_id, retry_index, error = %error, "node retry");
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_graph_end(
        &self,
        _ctx: &LayerContext,
        error: Option<&WorkflowError>,
    ) -> WorkflowResult<()> {
        let span = std::mem::replace(&mut *self.span.lock(), Span::none());
        let _entered = span.enter();
        let duration_ms = self
            .run_started
            .lock()
            .take()
            .map(|t| t.elapsed().as_millis());
        match error {
            Some(e) => warn!(duration_ms = ?duration_ms, error = %e, "graph run failed"),
            None => info!(duration_ms = ?duration_ms, "graph run ended"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_node_durations_are_tracked_per_execution() {
        let layer = TracingLayer::new();
        let ctx = LayerContext::default();
        layer.on_graph_start(&ctx).await.unwrap();
        layer
            .on_event(
                &ctx,
                &GraphEngineEvent::NodeRunStarted {
                    id: "x-1".into(),
                    node_id: "a".into(),
                    node_type: "code".into(),
                    node_title: "A".into(),
                    predecessor_node_id: None,
                    index: 1,
                },
            )
            .await
            .unwrap();
        assert!(layer.node_started.lock().contains_key("x-1"));
        assert!(layer.elapsed_ms("x-1").is_some());
        assert!(layer.elapsed_ms("x-1").is_none());
        layer.on_graph_end(&ctx, None).await.unwrap();
        assert!(layer.run_started.lock().is_none());
    }
}
