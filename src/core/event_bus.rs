use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::dsl::schema::NodeRunResult;

/// Why a run stopped without finishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PauseReason {
    /// One or more human input forms are waiting.
    HumanInputRequired { node_ids: Vec<String> },
    /// A `Pause` command arrived.
    Command { reason: Option<String> },
}

/// Events the engine emits, in the order its control loop processes them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEngineEvent {
    // === Graph-level events ===
    GraphRunStarted,
    GraphRunSucceeded {
        outputs: HashMap<String, Value>,
    },
    GraphRunPartialSucceeded {
        exceptions_count: usize,
        outputs: HashMap<String, Value>,
    },
    GraphRunFailed {
        error: String,
        exceptions_count: usize,
        node_id: Option<String>,
    },
    GraphRunAborted {
        reason: Option<String>,
        outputs: HashMap<String, Value>,
    },
    GraphRunPaused {
        workflow_execution_id: String,
        reason: PauseReason,
        paused_nodes: Vec<String>,
    },

    // === Node-level events ===
    NodeRunStarted {
        id: String,
        node_id: String,
        node_type: String,
        node_title: String,
        predecessor_node_id: Option<String>,
        index: usize,
    },
    NodeRunStreamChunk {
        id: String,
        node_id: String,
        chunk: String,
        is_final: bool,
    },
    NodeRunSucceeded {
        id: String,
        node_id: String,
        node_type: String,
        node_run_result: NodeRunResult,
    },
    NodeRunFailed {
        id: String,
        node_id: String,
        node_type: String,
        node_run_result: NodeRunResult,
        error: String,
    },
    NodeRunException {
        id: String,
        node_id: String,
        node_type: String,
        node_run_result: NodeRunResult,
        error: String,
    },
    NodeRunRetry {
        id: String,
        node_id: String,
        node_type: String,
        node_title: String,
        error: String,
        retry_index: u32,
    },
    NodeRunPaused {
        id: String,
        node_id: String,
        node_type: String,
        form_id: Option<String>,
    },

    // === Iteration events ===
    IterationStarted {
        id: String,
        node_id: String,
        total: usize,
    },
    IterationItemSucceeded {
        id: String,
        node_id: String,
        index: usize,
        output: Value,
    },
    IterationItemFailed {
        id: String,
        node_id: String,
        index: usize,
        error: String,
    },
}

impl GraphEngineEvent {
    /// Node the event is about, for node-level events.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            GraphEngineEvent::NodeRunStarted { node_id, .. }
            | GraphEngineEvent::NodeRunStreamChunk { node_id, .. }
            | GraphEngineEvent::NodeRunSucceeded { node_id, .. }
            | GraphEngineEvent::NodeRunFailed { node_id, .. }
            | GraphEngineEvent::NodeRunException { node_id, .. }
            | GraphEngineEvent::NodeRunRetry { node_id, .. }
            | GraphEngineEvent::NodeRunPaused { node_id, .. }
            | GraphEngineEvent::IterationStarted { node_id, .. }
            | GraphEngineEvent::IterationItemSucceeded { node_id, .. }
            | GraphEngineEvent::IterationItemFailed { node_id, .. } => Some(node_id),
            GraphEngineEvent::GraphRunFailed { node_id, .. } => node_id.as_deref(),
            _ => None,
        }
    }

    /// Last event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GraphEngineEvent::GraphRunSucceeded { .. }
                | GraphEngineEvent::GraphRunPartialSucceeded { .. }
                | GraphEngineEvent::GraphRunFailed { .. }
                | GraphEngineEvent::GraphRunAborted { .. }
                | GraphEngineEvent::GraphRunPaused { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            GraphEngineEvent::GraphRunStarted => "graph_run_started",
            GraphEngineEvent::GraphRunSucceeded { .. } => "graph_run_succeeded",
            GraphEngineEvent::GraphRunPartialSucceeded { .. } => "graph_run_partial_succeeded",
            GraphEngineEvent::GraphRunFailed { .. } => "graph_run_failed",
            GraphEngineEvent::GraphRunAborted { .. } => "graph_run_aborted",
            GraphEngineEvent::GraphRunPaused { .. } => "graph_run_paused",
            GraphEngineEvent::NodeRunStarted { .. } => "node_run_started",
            GraphEngineEvent::NodeRunStreamChunk { .. } => "node_run_stream_chunk",
            GraphEngineEvent::NodeRunSucceeded { .. } => "node_run_succeeded",
            GraphEngineEvent::NodeRunFailed { .. } => "node_run_failed",
            GraphEngineEvent::NodeRunException { .. } => "node_run_exception",
            GraphEngineEvent::NodeRunRetry { .. } => "node_run_retry",
            GraphEngineEvent::NodeRunPaused { .. } => "node_run_paused",
            GraphEngineEvent::IterationStarted { .. } => "iteration_started",
            GraphEngineEvent::IterationItemSucceeded { .. } => "iteration_item_succeeded",
            GraphEngineEvent::IterationItemFailed { .. } => "iteration_item_failed",
        }
    }
}

/// Sender wrapper for engine events, with an atomic active flag so that event
/// emission can be cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<GraphEngineEvent>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<GraphEngineEvent>, active: Arc<AtomicBool>) -> Self {
        Self { tx, active }
    }

    /// An active emitter and the receiving end of its bounded channel.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<GraphEngineEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx, Arc::new(AtomicBool::new(true))), rx)
    }

    /// An emitter nobody listens to.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx, Arc::new(AtomicBool::new(false)))
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub async fn emit(&self, event: GraphEngineEvent) {
        if self.is_active() && self.tx.send(event).await.is_err() {
            // Receiver dropped; stop paying for sends.
            self.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emitter_delivers_in_order() {
        let (emitter, mut rx) = EventEmitter::channel(8);
        emitter.emit(GraphEngineEvent::GraphRunStarted).await;
        emitter
            .emit(GraphEngineEvent::GraphRunSucceeded {
                outputs: HashMap::new(),
            })
            .await;
        assert!(matches!(rx.recv().await, Some(GraphEngineEvent::GraphRunStarted)));
        let last = rx.recv().await.unwrap();
        assert!(last.is_terminal());
        assert_eq!(last.name(), "graph_run_succeeded");
    }

    #[tokio::test]
    async fn test_emitter_deactivates_when_receiver_dropped() {
        let (emitter, rx) = EventEmitter::channel(8);
        drop(rx);
        emitter.emit(GraphEngineEvent::GraphRunStarted).await;
        assert!(!emitter.is_active());
        assert!(!EventEmitter::detached().is_active());
    }

    #[test]
    fn test_event_node_id_and_serialization() {
        let event = GraphEngineEvent::NodeRunPaused {
            id: "x1".into(),
            node_id: "hi".into(),
            node_type: "human-input".into(),
            form_id: Some("f1".into()),
        };
        assert_eq!(event.node_id(), Some("hi"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_run_paused");
        assert_eq!(json["form_id"], "f1");
    }
}
