//! In-memory queue with visibility timeouts and an optional DLQ
//!
//! The reference adapter. Each named queue keeps a ready deque and an
//! inflight map keyed by task ID; a background scanner returns inflight
//! tasks whose visibility deadline has passed to the ready deque.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use super::queue::{Queue, QueueError};
use super::task::Task;

/// Configuration for the in-memory queue
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How long a dequeued task stays hidden before redelivery
    pub visibility_timeout: Duration,

    /// Whether tasks nacked without requeue are kept in a DLQ
    pub enable_dlq: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            enable_dlq: false,
        }
    }
}

struct InflightTask {
    task: Task,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    closed: bool,
    ready: HashMap<String, VecDeque<Task>>,
    inflight: HashMap<String, HashMap<String, InflightTask>>,
    dlq: HashMap<String, Vec<Task>>,
}

impl QueueState {
    /// Move expired inflight tasks back to ready; returns how many moved
    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let mut moved = 0;
        for (queue_name, inflight) in self.inflight.iter_mut() {
            let expired: Vec<String> = inflight
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            for task_id in expired {
                if let Some(entry) = inflight.remove(&task_id) {
                    self.ready
                        .entry(queue_name.clone())
                        .or_default()
                        .push_back(entry.task);
                    moved += 1;
                }
            }
        }
        moved
    }

    fn pop_ready(&mut self, queue_name: &str, visibility: Duration) -> Option<Task> {
        let mut task = self.ready.get_mut(queue_name)?.pop_front()?;
        task.attempts += 1;
        self.inflight
            .entry(queue_name.to_string())
            .or_default()
            .insert(
                task.id.clone(),
                InflightTask {
                    task: task.clone(),
                    deadline: Instant::now() + visibility,
                },
            );
        Some(task)
    }

    fn remove_inflight(&mut self, queue_name: &str, task_id: &str) -> Option<Task> {
        self.inflight
            .get_mut(queue_name)
            .and_then(|inflight| inflight.remove(task_id))
            .map(|entry| entry.task)
    }
}

/// In-memory queue
///
/// Must be constructed inside a tokio runtime: the constructor spawns the
/// visibility scanner that redelivers expired inflight tasks.
///
/// # Example
///
/// ```ignore
/// let queue = InMemoryQueue::new();
/// queue.enqueue("default", task).await?;
/// ```
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    options: QueueOptions,
    shutdown_tx: watch::Sender<bool>,
    scanner_handle: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryQueue {
    /// Create a queue with default options
    pub fn new() -> Self {
        Self::with_options(QueueOptions::default())
    }

    /// Create a queue with the given options
    pub fn with_options(options: QueueOptions) -> Self {
        let state = Arc::new(Mutex::new(QueueState::default()));
        let notify = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scanner_handle =
            Self::start_scanner(state.clone(), notify.clone(), &options, shutdown_rx);

        Self {
            state,
            notify,
            options,
            shutdown_tx,
            scanner_handle: Mutex::new(Some(scanner_handle)),
        }
    }

    fn start_scanner(
        state: Arc<Mutex<QueueState>>,
        notify: Arc<Notify>,
        options: &QueueOptions,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        // Scanner period stays at half the visibility window so an expired
        // task is never hidden for more than 1.5x its timeout.
        let period = (options.visibility_timeout / 2).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let moved = state.lock().reclaim_expired(Instant::now());
                        if moved > 0 {
                            debug!(count = moved, "redelivering expired inflight tasks");
                            notify.notify_waiters();
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }

    async fn dequeue_inner(
        &self,
        queue_name: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<Task>, QueueError> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                state.reclaim_expired(Instant::now());
                if let Some(task) = state.pop_ready(queue_name, self.options.visibility_timeout) {
                    return Ok(Some(task));
                }
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Re-check after registering the waiter so an enqueue between the
            // lock release and the wait cannot be missed.
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if let Some(task) = state.pop_ready(queue_name, self.options.visibility_timeout) {
                    return Ok(Some(task));
                }
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    if tokio::time::timeout(deadline - now, notified).await.is_err() {
                        // One last look before reporting an empty poll
                        let mut state = self.state.lock();
                        if state.closed {
                            return Err(QueueError::Closed);
                        }
                        state.reclaim_expired(Instant::now());
                        return Ok(state.pop_ready(queue_name, self.options.visibility_timeout));
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Number of DLQ entries for a queue (for tests and operators)
    pub fn dlq_len(&self, queue_name: &str) -> usize {
        self.state
            .lock()
            .dlq
            .get(queue_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Snapshot of the DLQ contents for a queue
    pub fn dlq_tasks(&self, queue_name: &str) -> Vec<Task> {
        self.state
            .lock()
            .dlq
            .get(queue_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of inflight tasks for a queue (for tests)
    pub fn inflight_len(&self, queue_name: &str) -> usize {
        self.state
            .lock()
            .inflight
            .get(queue_name)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, queue_name: &str, task: Task) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state
                .ready
                .entry(queue_name.to_string())
                .or_default()
                .push_back(task);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue_name: &str) -> Result<Option<Task>, QueueError> {
        self.dequeue_inner(queue_name, None).await
    }

    async fn dequeue_with_timeout(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> Result<Option<Task>, QueueError> {
        self.dequeue_inner(queue_name, Some(Instant::now() + timeout))
            .await
    }

    async fn ack(&self, queue_name: &str, task_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state
            .remove_inflight(queue_name, task_id)
            .map(|_| ())
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))
    }

    async fn nack(
        &self,
        queue_name: &str,
        task_id: &str,
        requeue: bool,
    ) -> Result<(), QueueError> {
        let dropped = {
            let mut state = self.state.lock();
            let task = state
                .remove_inflight(queue_name, task_id)
                .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;

            if requeue {
                state
                    .ready
                    .entry(queue_name.to_string())
                    .or_default()
                    .push_back(task);
                None
            } else if self.options.enable_dlq {
                state
                    .dlq
                    .entry(queue_name.to_string())
                    .or_default()
                    .push(task.clone());
                Some(task)
            } else {
                Some(task)
            }
        };

        match dropped {
            None => self.notify.notify_waiters(),
            Some(task) => debug!(task_id = %task.id, requeue, "task dropped from queue"),
        }
        Ok(())
    }

    async fn len(&self, queue_name: &str) -> Result<usize, QueueError> {
        let mut state = self.state.lock();
        state.reclaim_expired(Instant::now());
        Ok(state.ready.get(queue_name).map(VecDeque::len).unwrap_or(0))
    }

    async fn close(&self) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.ready.clear();
            state.inflight.clear();
        }
        let _ = self.shutdown_tx.send(true);
        self.notify.notify_waiters();
        if let Some(handle) = self.scanner_handle.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}
