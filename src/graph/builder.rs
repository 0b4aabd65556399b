use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use tracing::debug;

use crate::dsl::schema::{ErrorStrategy, GraphConfig, DEFAULT_SOURCE_HANDLE, SUCCESS_BRANCH_HANDLE};
use crate::error::{WorkflowError, WorkflowResult};
use crate::nodes::executor::{NodeFactory, NodeKind};

use super::types::{Edge, Graph};

/// Outputs every error-strategy node gains when it handles a failure.
pub const ERROR_OUTPUTS: [&str; 2] = ["error_message", "error_type"];

impl Graph {
    /// Build the graph for one run.
    ///
    /// Nodes are constructed through `factory`; edges must reference known
    /// nodes; the structure must be acyclic. `root_node_id` overrides root
    /// detection (sub-graphs name their entry node explicitly).
    pub fn init(
        config: &GraphConfig,
        factory: &NodeFactory,
        root_node_id: Option<&str>,
    ) -> WorkflowResult<Graph> {
        let mut nodes = HashMap::with_capacity(config.nodes.len());
        let mut node_order = Vec::with_capacity(config.nodes.len());
        for node_config in &config.nodes {
            let node = factory.create(node_config)?;
            if nodes.insert(node_config.id.clone(), node).is_some() {
                return Err(WorkflowError::GraphBuildError(format!(
                    "duplicate node id: {}",
                    node_config.id
                )));
            }
            node_order.push(node_config.id.clone());
        }

        let mut edges = HashMap::with_capacity(config.edges.len());
        let mut in_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut out_edges: HashMap<String, Vec<String>> = HashMap::new();
        for edge_config in &config.edges {
            let tail = nodes.get(&edge_config.source).ok_or_else(|| {
                WorkflowError::GraphBuildError(format!(
                    "source node not found: {}",
                    edge_config.source
                ))
            })?;
            if !nodes.contains_key(&edge_config.target) {
                return Err(WorkflowError::GraphBuildError(format!(
                    "target node not found: {}",
                    edge_config.target
                )));
            }

            let mut handle = edge_config
                .source_handle
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE_HANDLE.to_string());
            if tail.base().error_strategy == ErrorStrategy::FailBranch
                && handle == DEFAULT_SOURCE_HANDLE
            {
                handle = SUCCESS_BRANCH_HANDLE.to_string();
            }

            let id = edge_config.id.clone().unwrap_or_else(|| {
                format!("{}-{}-{}", edge_config.source, handle, edge_config.target)
            });
            let edge = Edge {
                id: id.clone(),
                tail: edge_config.source.clone(),
                head: edge_config.target.clone(),
                source_handle: handle,
            };
            if edges.insert(id.clone(), edge).is_some() {
                return Err(WorkflowError::GraphBuildError(format!(
                    "duplicate edge id: {}",
                    id
                )));
            }
            out_edges
                .entry(edge_config.source.clone())
                .or_default()
                .push(id.clone());
            in_edges
                .entry(edge_config.target.clone())
                .or_default()
                .push(id);
        }

        check_acyclic(&node_order, &edges)?;

        let root_node_id = match root_node_id {
            Some(root) if nodes.contains_key(root) => root.to_string(),
            Some(root) => return Err(WorkflowError::NodeNotFound(root.to_string())),
            None => find_root(&node_order, &in_edges, |id| {
                nodes.get(id).map(|n| n.kind()) == Some(NodeKind::Start)
            })?,
        };

        let graph = Graph {
            nodes,
            node_order,
            edges,
            in_edges,
            out_edges,
            root_node_id,
        };
        graph.validate_selectors()?;

        debug!(
            root = %graph.root_node_id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "graph built"
        );
        Ok(graph)
    }

    /// Reject selectors that name a field a node in this graph never outputs.
    /// Nodes whose outputs are only known at runtime are not checked.
    fn validate_selectors(&self) -> WorkflowResult<()> {
        for node_id in &self.node_order {
            let Some(node) = self.nodes.get(node_id) else {
                continue;
            };
            for selector in node.variable_selectors() {
                let Some(target) = self.nodes.get(selector.node_id()) else {
                    continue;
                };
                let Some(mut names) = target.output_names() else {
                    continue;
                };
                if target.base().error_strategy != ErrorStrategy::None {
                    names.extend(ERROR_OUTPUTS.iter().map(|s| s.to_string()));
                }
                if !names.iter().any(|n| n == selector.variable_name()) {
                    return Err(WorkflowError::InvalidNodeConfig {
                        node_id: node_id.clone(),
                        error: format!(
                            "selector {} references '{}', which node '{}' does not output",
                            selector,
                            selector.variable_name(),
                            target.id()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_acyclic(node_order: &[String], edges: &HashMap<String, Edge>) -> WorkflowResult<()> {
    let mut dag = StableDiGraph::<&str, ()>::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for id in node_order {
        index.insert(id.as_str(), dag.add_node(id.as_str()));
    }
    for edge in edges.values() {
        if let (Some(&a), Some(&b)) = (index.get(edge.tail.as_str()), index.get(edge.head.as_str())) {
            dag.add_edge(a, b, ());
        }
    }
    if is_cyclic_directed(&dag) {
        return Err(WorkflowError::CycleDetected);
    }
    Ok(())
}

/// The unique start node without incoming edges, or else the unique node
/// without incoming edges.
fn find_root(
    node_order: &[String],
    in_edges: &HashMap<String, Vec<String>>,
    is_start: impl Fn(&str) -> bool,
) -> WorkflowResult<String> {
    let candidates: Vec<&String> = node_order
        .iter()
        .filter(|id| in_edges.get(*id).map_or(true, Vec::is_empty))
        .collect();

    let starts: Vec<&String> = candidates
        .iter()
        .copied()
        .filter(|id| is_start(id))
        .collect();
    let pick = if starts.is_empty() { candidates } else { starts };

    match pick.as_slice() {
        [] => Err(WorkflowError::NoRootNode),
        [root] => Ok((*root).clone()),
        many => Err(WorkflowError::MultipleRootNodes(
            many.iter().map(|s| (*s).clone()).collect(),
        )),
    }
}
