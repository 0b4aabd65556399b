use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{WorkflowError, WorkflowResult};
use crate::nodes::executor::Node;

/// A directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: String,
    /// Source node id.
    pub tail: String,
    /// Target node id.
    pub head: String,
    /// Branch discriminator; `source` for plain edges.
    pub source_handle: String,
}

/// Immutable node/edge structure of one run.
///
/// Edges are indexed in both directions by node id. Adjacency lists keep
/// the order edges appeared in the config, so traversal is deterministic.
pub struct Graph {
    pub(crate) nodes: HashMap<String, Arc<dyn Node>>,
    pub(crate) node_order: Vec<String>,
    pub(crate) edges: HashMap<String, Edge>,
    pub(crate) in_edges: HashMap<String, Vec<String>>,
    pub(crate) out_edges: HashMap<String, Vec<String>>,
    pub(crate) root_node_id: String,
}

impl Graph {
    pub fn root_node_id(&self) -> &str {
        &self.root_node_id
    }

    pub fn node(&self, node_id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(node_id)
    }

    pub fn get_node(&self, node_id: &str) -> WorkflowResult<&Arc<dyn Node>> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn edge(&self, edge_id: &str) -> Option<&Edge> {
        self.edges.get(edge_id)
    }

    /// Node ids in config order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.node_order.iter().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn incoming_edge_ids(&self, node_id: &str) -> &[String] {
        self.in_edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outgoing_edge_ids(&self, node_id: &str) -> &[String] {
        self.out_edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.incoming_edge_ids(node_id)
            .iter()
            .filter_map(|id| self.edges.get(id))
            .collect()
    }

    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.outgoing_edge_ids(node_id)
            .iter()
            .filter_map(|id| self.edges.get(id))
            .collect()
    }

    /// Distinct handles of a node's outgoing edges.
    pub fn outgoing_handles(&self, node_id: &str) -> Vec<String> {
        let mut handles: Vec<String> = Vec::new();
        for edge in self.outgoing_edges(node_id) {
            if !handles.contains(&edge.source_handle) {
                handles.push(edge.source_handle.clone());
            }
        }
        handles
    }

    /// Direct predecessors of a node, in edge order.
    pub fn predecessors(&self, node_id: &str) -> Vec<&str> {
        self.incoming_edges(node_id)
            .into_iter()
            .map(|e| e.tail.as_str())
            .collect()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("root_node_id", &self.root_node_id)
            .field("nodes", &self.node_order)
            .field("edges", &self.edges.len())
            .finish()
    }
}
