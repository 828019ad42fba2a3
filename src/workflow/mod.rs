//! Workflow abstractions
//!
//! A workflow is a deterministic program that orchestrates activities and
//! durable timers through its [`crate::engine::WorkflowContext`]. Scheduled
//! work is represented as [`WorkflowFuture`]s that resolve from persisted
//! state.

mod builder;
mod definition;
mod future;
mod registry;

pub use builder::{Step, WorkflowBuilder};
pub use definition::{Definition, Workflow, WorkflowError, WorkflowFn, WorkflowOptions};
pub use future::WorkflowFuture;
pub use registry::{RegistryError, WorkflowRegistry};
