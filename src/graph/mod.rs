//! Graph construction and traversal state.
//!
//! The [`Graph`] is built once per run by [`Graph::init`] and never changes.
//! Node and edge status live in the [`GraphStateManager`]; the
//! [`EdgeProcessor`] and [`SkipPropagator`] decide which nodes run next.

pub mod builder;
pub mod edge_processor;
pub mod skip_propagator;
pub mod state_manager;
pub mod types;

pub use edge_processor::EdgeProcessor;
pub use skip_propagator::SkipPropagator;
pub use state_manager::{
    EdgeState, EdgeStateAnalysis, GraphStateManager, NodeState, SkipStateOps, StateSnapshot,
};
pub use types::{Edge, Graph};
