//! Nodes that compute new values from upstream outputs.

pub mod aggregator;
pub mod code;
pub mod delegated;

pub use aggregator::VariableAggregatorNode;
pub use code::CodeNode;
pub use delegated::DelegatedNode;
