//! Workflow engine and execution context
//!
//! The engine turns workflow definitions into scheduled activities, manages
//! workflow lifecycle, fires durable timers, and emits events. Workflow code
//! sees only the [`WorkflowContext`].

mod context;
#[allow(clippy::module_inception)]
mod engine;

pub use context::WorkflowContext;
pub use engine::{
    Engine, EngineConfig, EngineError, StartWorkflowOptions, DEFAULT_TIMER_SCAN_INTERVAL,
};
