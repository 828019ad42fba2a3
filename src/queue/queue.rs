//! Queue trait definition
//!
//! The queue provides at-least-once delivery of tasks with a visibility
//! timeout: a dequeued task stays hidden until it is acked, nacked, or its
//! visibility window expires, at which point it becomes deliverable again.
//! Duplicates are possible by contract and are absorbed by activity
//! idempotency. Ordering is best-effort FIFO.

use std::time::Duration;

use async_trait::async_trait;

use super::task::Task;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue has been closed
    #[error("queue is closed")]
    Closed,

    /// Task is not in the inflight set
    #[error("task {0} not found in flight")]
    TaskNotFound(String),

    /// Transient backend failure
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Task distribution contract
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    /// Append a task to the named queue
    async fn enqueue(&self, queue_name: &str, task: Task) -> Result<(), QueueError>;

    /// Take the next ready task, waiting until one is available
    ///
    /// The returned task's `attempts` counter has been incremented and the
    /// task is inflight until acked, nacked, or its visibility expires.
    async fn dequeue(&self, queue_name: &str) -> Result<Option<Task>, QueueError>;

    /// Take the next ready task, or `None` once `timeout` elapses
    async fn dequeue_with_timeout(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> Result<Option<Task>, QueueError>;

    /// Acknowledge successful processing, removing the task from inflight
    async fn ack(&self, queue_name: &str, task_id: &str) -> Result<(), QueueError>;

    /// Report failed processing
    ///
    /// With `requeue` the task becomes ready again; without it the task is
    /// dropped, or appended to the dead-letter queue when one is enabled.
    async fn nack(&self, queue_name: &str, task_id: &str, requeue: bool)
        -> Result<(), QueueError>;

    /// Number of ready tasks (inflight tasks are excluded)
    async fn len(&self, queue_name: &str) -> Result<usize, QueueError>;

    /// Shut the queue down; idempotent
    async fn close(&self) -> Result<(), QueueError>;
}
