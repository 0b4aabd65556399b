//! Transitive skip marking over the graph.
//!
//! For the head node of a resolved edge:
//! - any incoming edge still unknown: wait for it;
//! - any incoming edge taken: the node is enqueued;
//! - every incoming edge skipped: the node and its outgoing edges are
//!   skipped, and the same rule is applied to each downstream head.
//!
//! Propagation walks an explicit stack, so graph depth is not bounded by
//! the call stack.

use tracing::warn;

use super::state_manager::SkipStateOps;
use super::types::Graph;

pub struct SkipPropagator<'a, S: SkipStateOps> {
    graph: &'a Graph,
    state: &'a S,
}

impl<'a, S: SkipStateOps> SkipPropagator<'a, S> {
    pub fn new(graph: &'a Graph, state: &'a S) -> Self {
        Self { graph, state }
    }

    /// Apply the three-way rule to the head of `edge_id`, cascading skips.
    pub fn propagate_skip_from_edge(&self, edge_id: &str) {
        let mut pending = vec![edge_id.to_string()];
        while let Some(edge_id) = pending.pop() {
            self.visit_edge(&edge_id, &mut pending);
        }
    }

    /// Skip every unselected branch edge, then cascade from each.
    pub fn skip_branch_paths<'e>(&self, unselected_edge_ids: impl IntoIterator<Item = &'e str>) {
        let mut pending = Vec::new();
        for edge_id in unselected_edge_ids {
            self.state.mark_edge_skipped(edge_id);
            pending.push(edge_id.to_string());
        }
        // Reverse so edges are examined in the order given.
        pending.reverse();
        while let Some(edge_id) = pending.pop() {
            self.visit_edge(&edge_id, &mut pending);
        }
    }

    fn visit_edge(&self, edge_id: &str, pending: &mut Vec<String>) {
        let Some(edge) = self.graph.edge(edge_id) else {
            debug_assert!(false, "skip propagation reached unknown edge {}", edge_id);
            warn!(edge_id, "skip propagation reached an unknown edge");
            return;
        };
        let head = edge.head.as_str();
        if !self.graph.contains_node(head) {
            debug_assert!(false, "edge {} points at unknown node {}", edge_id, head);
            warn!(edge_id, node_id = head, "edge points at an unknown node");
            return;
        }

        let analysis = self
            .state
            .analyze_edge_states(self.graph.incoming_edge_ids(head));
        if analysis.has_unknown {
            return;
        }
        if analysis.has_taken {
            if self.state.enqueue_node(head) {
                self.state.start_execution(head);
            }
            return;
        }
        if analysis.all_skipped {
            self.skip_node(head, pending);
        }
    }

    fn skip_node(&self, node_id: &str, pending: &mut Vec<String>) {
        self.state.mark_node_skipped(node_id);
        let outgoing = self.graph.outgoing_edge_ids(node_id);
        for edge_id in outgoing {
            self.state.mark_edge_skipped(edge_id);
        }
        pending.extend(outgoing.iter().rev().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::schema::{EdgeConfig, GraphConfig, NodeConfig};
    use crate::graph::state_manager::{
        EdgeState, EdgeStateAnalysis, GraphStateManager, NodeState,
    };
    use crate::nodes::executor::{NodeFactory, NodeServices};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn graph(nodes: &[&str], edges: &[(&str, &str, &str)]) -> Graph {
        let config = GraphConfig {
            nodes: nodes
                .iter()
                .map(|id| NodeConfig {
                    id: id.to_string(),
                    data: json!({"type": "answer", "answer": ""}),
                })
                .collect(),
            edges: edges
                .iter()
                .map(|(id, s, t)| EdgeConfig {
                    id: Some(id.to_string()),
                    source: s.to_string(),
                    target: t.to_string(),
                    source_handle: None,
                })
                .collect(),
        };
        let factory = NodeFactory::new(Arc::new(NodeServices::default()));
        Graph::init(&config, &factory, Some(nodes[0])).unwrap()
    }

    /// Records every mutation; edge analysis is scripted.
    #[derive(Default)]
    struct RecordingState {
        analysis: EdgeStateAnalysis,
        calls: Mutex<Vec<String>>,
    }

    impl SkipStateOps for RecordingState {
        fn analyze_edge_states(&self, _edge_ids: &[String]) -> EdgeStateAnalysis {
            self.analysis
        }
        fn enqueue_node(&self, node_id: &str) -> bool {
            self.calls.lock().push(format!("enqueue:{}", node_id));
            true
        }
        fn start_execution(&self, node_id: &str) {
            self.calls.lock().push(format!("start:{}", node_id));
        }
        fn mark_node_skipped(&self, node_id: &str) {
            self.calls.lock().push(format!("skip_node:{}", node_id));
        }
        fn mark_edge_taken(&self, edge_id: &str) {
            self.calls.lock().push(format!("take_edge:{}", edge_id));
        }
        fn mark_edge_skipped(&self, edge_id: &str) {
            self.calls.lock().push(format!("skip_edge:{}", edge_id));
        }
    }

    #[test]
    fn test_unknown_incoming_edge_stops_processing() {
        let g = graph(
            &["n0", "n1", "node_2", "n3"],
            &[("edge_1", "n0", "node_2"), ("edge_2", "n1", "node_2"), ("edge_3", "n3", "node_2")],
        );
        let state = RecordingState {
            analysis: EdgeStateAnalysis {
                has_unknown: true,
                has_taken: false,
                all_skipped: false,
            },
            ..Default::default()
        };
        SkipPropagator::new(&g, &state).propagate_skip_from_edge("edge_1");
        assert!(state.calls.lock().is_empty());
    }

    #[test]
    fn test_taken_incoming_edge_enqueues_head() {
        let g = graph(&["a", "b"], &[("e1", "a", "b")]);
        let state = RecordingState {
            analysis: EdgeStateAnalysis {
                has_unknown: false,
                has_taken: true,
                all_skipped: false,
            },
            ..Default::default()
        };
        SkipPropagator::new(&g, &state).propagate_skip_from_edge("e1");
        assert_eq!(*state.calls.lock(), vec!["enqueue:b", "start:b"]);
    }

    #[test]
    fn test_all_skipped_cascades_downstream() {
        let g = graph(
            &["a", "b", "c", "d"],
            &[("e1", "a", "b"), ("e2", "b", "c"), ("e3", "c", "d")],
        );
        let sm = GraphStateManager::new();
        SkipPropagator::new(&g, &sm).skip_branch_paths(["e1"]);

        for node in ["b", "c", "d"] {
            assert_eq!(sm.node_state(node), NodeState::Skipped, "{}", node);
        }
        for edge in ["e1", "e2", "e3"] {
            assert_eq!(sm.edge_state(edge), EdgeState::Skipped, "{}", edge);
        }
        assert_eq!(sm.node_state("a"), NodeState::Unknown);
    }

    #[test]
    fn test_taken_sibling_wins_over_skips() {
        // a -> j, b -> j, c -> j; a's edge taken, the other two skipped.
        let g = graph(
            &["root", "a", "b", "c", "j"],
            &[
                ("r-a", "root", "a"),
                ("r-b", "root", "b"),
                ("r-c", "root", "c"),
                ("a-j", "a", "j"),
                ("b-j", "b", "j"),
                ("c-j", "c", "j"),
            ],
        );
        let sm = GraphStateManager::new();
        sm.mark_edge_taken("a-j");
        SkipPropagator::new(&g, &sm).skip_branch_paths(["r-b", "r-c"]);

        assert_eq!(sm.node_state("b"), NodeState::Skipped);
        assert_eq!(sm.node_state("c"), NodeState::Skipped);
        assert_eq!(sm.node_state("j"), NodeState::Taken);
        assert_eq!(sm.pop_ready().as_deref(), Some("j"));
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let ids: Vec<String> = (0..5_000).map(|i| format!("n{}", i)).collect();
        let edges: Vec<(String, String, String)> = (1..ids.len())
            .map(|i| (format!("e{}", i), ids[i - 1].clone(), ids[i].clone()))
            .collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let edge_refs: Vec<(&str, &str, &str)> = edges
            .iter()
            .map(|(e, s, t)| (e.as_str(), s.as_str(), t.as_str()))
            .collect();
        let g = graph(&id_refs, &edge_refs);
        let sm = GraphStateManager::new();
        SkipPropagator::new(&g, &sm).skip_branch_paths(["e1"]);
        assert_eq!(sm.node_state("n4999"), NodeState::Skipped);
    }
}
