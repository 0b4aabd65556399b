//! # graphflow: a workflow graph execution engine
//!
//! `graphflow` runs user-authored node graphs (start, branches, code,
//! iteration, human input and delegated kinds such as LLM or tool calls)
//! as a DAG with:
//!
//! - **Concurrent dispatch**: independent branches run as parallel workers
//!   while a single control loop owns all node and edge state.
//! - **Skip propagation**: branches that are not taken are skipped
//!   transitively, so joins never wait on dead paths.
//! - **Pause and resume**: a human input node pauses the run; the runtime
//!   state serializes to a versioned snapshot that a later process resumes.
//! - **Engine layers**: persistence, sandbox lifecycle and tracing observe
//!   the run without the engine knowing what they do.
//! - **Error strategies**: per-node retry, timeout, fail-branch and
//!   default-value handling.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use graphflow::{parse_graph_config, GraphConfigFormat, WorkflowEntry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), graphflow::WorkflowError> {
//!     let json = std::fs::read_to_string("graph.json").unwrap();
//!     let config = parse_graph_config(&json, GraphConfigFormat::Json)?;
//!     let entry = WorkflowEntry::builder(config).build().await?;
//!     let outcome = entry.run().wait().await?;
//!     println!("{:?}", outcome.status());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod core;
pub mod domain;
pub mod dsl;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod infrastructure;
pub mod layers;
pub mod nodes;
pub mod sandbox;
pub mod template;

pub use crate::api::{WorkflowEntry, WorkflowEntryBuilder, WorkflowRunHandle};
pub use crate::core::{
    Command, CommandChannel, CommandSender, EngineConfig, FileRuntimeStateStore,
    GraphEngine, GraphEngineEvent, GraphRunOutcome, GraphRuntimeState, InMemoryCommandChannel,
    MemoryRuntimeStateStore, PauseReason, RuntimeContext, RuntimeStateStore, Segment, Selector,
    SnapshotError, VariablePool,
};
pub use crate::domain::human_input::{FormDefinition, FormStatus, HumanInputForm};
pub use crate::domain::repository::{
    HumanInputFormRepository, WorkflowExecutionRepository, WorkflowNodeExecutionRepository,
};
pub use crate::dsl::{
    parse_graph_config, GraphConfig, GraphConfigFormat, WorkflowExecutionStatus,
    WorkflowNodeExecutionStatus,
};
pub use crate::error::{NodeError, WorkflowError};
pub use crate::graph::Graph;
pub use crate::layers::{GraphEngineLayer, PersistenceLayer, SandboxLayer, TracingLayer};
pub use crate::nodes::{ExternalNodeHandler, Node, NodeFactory, NodeKind, NodeServices};
pub use crate::sandbox::SandboxManager;
