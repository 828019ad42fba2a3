//! Task queue abstractions
//!
//! At-least-once delivery of activity tasks with visibility timeouts,
//! ack/nack, and an optional dead-letter queue.

mod memory;
mod queue;
mod task;

pub use memory::{InMemoryQueue, QueueOptions};
pub use queue::{Queue, QueueError};
pub use task::{Task, TaskType};
