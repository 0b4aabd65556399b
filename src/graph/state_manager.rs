//! Node and edge status for one run.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Unknown,
    /// Enqueued for execution.
    Taken,
    Running,
    Succeeded,
    Exception,
    Failed,
    Skipped,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeState {
    #[default]
    Unknown,
    Taken,
    Skipped,
}

/// Aggregate over a set of edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeStateAnalysis {
    pub has_unknown: bool,
    pub has_taken: bool,
    pub all_skipped: bool,
}

/// Serializable copy of everything the manager tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub node_states: HashMap<String, NodeState>,
    #[serde(default)]
    pub edge_states: HashMap<String, EdgeState>,
    #[serde(default)]
    pub ready_queue: Vec<String>,
    #[serde(default)]
    pub executing: Vec<String>,
}

/// The mutations the skip propagator and edge processor perform.
///
/// Split out so propagation can be tested against a recording mock.
pub trait SkipStateOps {
    fn analyze_edge_states(&self, edge_ids: &[String]) -> EdgeStateAnalysis;
    /// Returns false when the node was already enqueued or decided.
    fn enqueue_node(&self, node_id: &str) -> bool;
    fn start_execution(&self, node_id: &str);
    fn mark_node_skipped(&self, node_id: &str);
    fn mark_edge_taken(&self, edge_id: &str);
    fn mark_edge_skipped(&self, edge_id: &str);
}

#[derive(Default)]
struct Inner {
    node_states: HashMap<String, NodeState>,
    edge_states: HashMap<String, EdgeState>,
    ready_queue: VecDeque<String>,
    executing: HashSet<String>,
}

/// Single source of truth for node/edge status. Every operation takes the
/// lock once, so callers on worker tasks see consistent state.
#[derive(Default)]
pub struct GraphStateManager {
    inner: Mutex<Inner>,
}

impl GraphStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            inner: Mutex::new(Inner {
                node_states: snapshot.node_states,
                edge_states: snapshot.edge_states,
                ready_queue: snapshot.ready_queue.into(),
                executing: snapshot.executing.into_iter().collect(),
            }),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock();
        let mut executing: Vec<String> = inner.executing.iter().cloned().collect();
        executing.sort();
        StateSnapshot {
            node_states: inner.node_states.clone(),
            edge_states: inner.edge_states.clone(),
            ready_queue: inner.ready_queue.iter().cloned().collect(),
            executing,
        }
    }

    pub fn node_state(&self, node_id: &str) -> NodeState {
        self.inner
            .lock()
            .node_states
            .get(node_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn edge_state(&self, edge_id: &str) -> EdgeState {
        self.inner
            .lock()
            .edge_states
            .get(edge_id)
            .copied()
            .unwrap_or_default()
    }

    fn set_node_state(&self, node_id: &str, state: NodeState) {
        self.inner
            .lock()
            .node_states
            .insert(node_id.to_string(), state);
    }

    /// Ready when no incoming edge is undecided and at least one is taken.
    /// A node without incoming edges is always ready.
    pub fn is_node_ready(&self, incoming_edge_ids: &[String]) -> bool {
        if incoming_edge_ids.is_empty() {
            return true;
        }
        let analysis = self.analyze_edge_states(incoming_edge_ids);
        !analysis.has_unknown && analysis.has_taken
    }

    pub fn pop_ready(&self) -> Option<String> {
        self.inner.lock().ready_queue.pop_front()
    }

    pub fn has_ready(&self) -> bool {
        !self.inner.lock().ready_queue.is_empty()
    }

    pub fn mark_node_running(&self, node_id: &str) {
        self.set_node_state(node_id, NodeState::Running);
    }

    pub fn mark_node_succeeded(&self, node_id: &str) {
        self.set_node_state(node_id, NodeState::Succeeded);
    }

    pub fn mark_node_exception(&self, node_id: &str) {
        self.set_node_state(node_id, NodeState::Exception);
    }

    pub fn mark_node_failed(&self, node_id: &str) {
        self.set_node_state(node_id, NodeState::Failed);
    }

    pub fn mark_node_paused(&self, node_id: &str) {
        self.set_node_state(node_id, NodeState::Paused);
    }

    pub fn finish_execution(&self, node_id: &str) {
        self.inner.lock().executing.remove(node_id);
    }

    /// Put a paused node back on the ready queue when its run resumes.
    pub fn requeue_paused_node(&self, node_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.node_states.get(node_id) != Some(&NodeState::Paused) {
            return false;
        }
        inner
            .node_states
            .insert(node_id.to_string(), NodeState::Taken);
        inner.ready_queue.push_back(node_id.to_string());
        inner.executing.insert(node_id.to_string());
        true
    }

    /// Nothing queued and nothing in flight.
    pub fn is_execution_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner.ready_queue.is_empty() && inner.executing.is_empty()
    }

    pub fn nodes_in_state(&self, state: NodeState) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .node_states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl SkipStateOps for GraphStateManager {
    fn analyze_edge_states(&self, edge_ids: &[String]) -> EdgeStateAnalysis {
        let inner = self.inner.lock();
        let mut analysis = EdgeStateAnalysis {
            all_skipped: !edge_ids.is_empty(),
            ..Default::default()
        };
        for id in edge_ids {
            match inner.edge_states.get(id).copied().unwrap_or_default() {
                EdgeState::Unknown => {
                    analysis.has_unknown = true;
                    analysis.all_skipped = false;
                }
                EdgeState::Taken => {
                    analysis.has_taken = true;
                    analysis.all_skipped = false;
                }
                EdgeState::Skipped => {}
            }
        }
        analysis
    }

    fn enqueue_node(&self, node_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let state = inner.node_states.get(node_id).copied().unwrap_or_default();
        if state != NodeState::Unknown {
            return false;
        }
        inner
            .node_states
            .insert(node_id.to_string(), NodeState::Taken);
        inner.ready_queue.push_back(node_id.to_string());
        true
    }

    fn start_execution(&self, node_id: &str) {
        self.inner.lock().executing.insert(node_id.to_string());
    }

    fn mark_node_skipped(&self, node_id: &str) {
        self.set_node_state(node_id, NodeState::Skipped);
    }

    fn mark_edge_taken(&self, edge_id: &str) {
        self.inner
            .lock()
            .edge_states
            .insert(edge_id.to_string(), EdgeState::Taken);
    }

    fn mark_edge_skipped(&self, edge_id: &str) {
        self.inner
            .lock()
            .edge_states
            .insert(edge_id.to_string(), EdgeState::Skipped);
    }
}
