//! Worker pool
//!
//! Workers dequeue activity tasks, execute them with timeout, retry, and
//! idempotency semantics, and write results back through the store.

#[allow(clippy::module_inception)]
mod worker;

pub use worker::{Worker, WorkerConfig, WorkerError};
