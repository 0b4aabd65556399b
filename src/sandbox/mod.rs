//! Sandbox provisioning for code execution.
//!
//! A [`SandboxProviderService`] creates one [`VirtualEnvironment`] per
//! workflow execution; the [`SandboxManager`] keeps it reachable by
//! execution id until the sandbox layer releases it.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{SandboxError, SandboxInitError};
pub use manager::SandboxManager;
pub use types::*;
