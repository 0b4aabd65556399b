//! Public entry points for running a graph.

mod entry;

pub use entry::{WorkflowEntry, WorkflowEntryBuilder, WorkflowRunHandle, WORKFLOW_RUN_ID_VARIABLE};
