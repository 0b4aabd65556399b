//! Config model types shared by the parser, the nodes and the graph builder.

mod condition;
mod flow;
mod selector;

pub use condition::{Case, ComparisonOperator, Condition, LogicalOperator};
pub use flow::{IterationErrorMode, IterationNodeConfig, VariableAggregatorNodeConfig};
pub use selector::{
    Selector, CONVERSATION_VARIABLE_NODE_ID, ENVIRONMENT_VARIABLE_NODE_ID,
    SYSTEM_VARIABLE_NODE_ID,
};
