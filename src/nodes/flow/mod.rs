//! Container nodes that run an embedded body graph.

pub mod iteration;

pub use iteration::{IterationNode, IterationStartNode};
