//! Activity abstractions
//!
//! Activities are the non-deterministic units of work that workers execute:
//! LLM requests, tool invocations, HTTP and database side effects. They are
//! idempotent per activity ID, may be retried per policy, and can stream
//! sub-events through their execution context.

mod context;
mod definition;
mod registry;

pub use context::{ActivityContext, CancellationHandle};
pub use definition::{Activity, ActivityError, ActivityFn};
pub use registry::{
    ActivityInfo, ActivityRegistry, Registration, RegistryError, DEFAULT_ACTIVITY_TIMEOUT,
};
