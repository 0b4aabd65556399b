//! Resolves a finished node's outgoing edges.

use crate::dsl::schema::DEFAULT_SOURCE_HANDLE;

use super::skip_propagator::SkipPropagator;
use super::state_manager::SkipStateOps;
use super::types::Graph;

pub struct EdgeProcessor<'a, S: SkipStateOps> {
    graph: &'a Graph,
    state: &'a S,
}

impl<'a, S: SkipStateOps> EdgeProcessor<'a, S> {
    pub fn new(graph: &'a Graph, state: &'a S) -> Self {
        Self { graph, state }
    }

    /// Mark the outgoing edges of a completed node.
    ///
    /// With `selected_handle` set, only edges carrying that handle (or the
    /// plain `source` handle) are taken; sibling edges are skipped first so
    /// their branches are decided before any join is checked. Without it,
    /// every outgoing edge is taken.
    pub fn process_node_success(&self, node_id: &str, selected_handle: Option<&str>) {
        let propagator = SkipPropagator::new(self.graph, self.state);
        let outgoing = self.graph.outgoing_edges(node_id);

        let (taken, skipped): (Vec<_>, Vec<_>) = match selected_handle {
            None => (outgoing, Vec::new()),
            Some(handle) => outgoing.into_iter().partition(|e| {
                e.source_handle == handle || e.source_handle == DEFAULT_SOURCE_HANDLE
            }),
        };

        propagator.skip_branch_paths(skipped.iter().map(|e| e.id.as_str()));
        for edge in taken {
            self.state.mark_edge_taken(&edge.id);
            propagator.propagate_skip_from_edge(&edge.id);
        }
    }
}
