//! Engine layers: observers attached to a run's lifecycle.
//!
//! The engine calls every layer at run start, for every event it emits and
//! at run end. A failing `on_graph_start` fails the run before any node is
//! dispatched; failures in the other two callbacks are logged and ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::event_bus::GraphEngineEvent;
use crate::error::{WorkflowError, WorkflowResult};
use crate::nodes::executor::GraphInitParams;

pub mod persistence;
pub mod sandbox;
pub mod tracing;

pub use self::persistence::PersistenceLayer;
pub use self::sandbox::SandboxLayer;
pub use self::tracing::TracingLayer;

/// What a layer knows about the run it observes.
#[derive(Debug, Clone, Default)]
pub struct LayerContext {
    pub execution_id: String,
    pub init_params: GraphInitParams,
    pub inputs: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    /// The run continues from a snapshot.
    pub resumed: bool,
}

#[async_trait]
pub trait GraphEngineLayer: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    async fn on_graph_start(&self, _ctx: &LayerContext) -> WorkflowResult<()> {
        Ok(())
    }

    async fn on_event(&self, _ctx: &LayerContext, _event: &GraphEngineEvent) -> WorkflowResult<()> {
        Ok(())
    }

    /// `error` is set when the run failed.
    async fn on_graph_end(
        &self,
        _ctx: &LayerContext,
        _error: Option<&WorkflowError>,
    ) -> WorkflowResult<()> {
        Ok(())
    }
}
