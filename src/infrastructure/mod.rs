//! Infrastructure layer: in-process implementations of the repository traits.

pub mod memory_repository;

pub use memory_repository::{
    InMemoryHumanInputFormRepository, InMemoryWorkflowExecutionRepository,
    InMemoryWorkflowNodeExecutionRepository,
};
