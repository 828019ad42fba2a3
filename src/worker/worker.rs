//! Worker pool for activity task execution
//!
//! Polls a task queue, executes registered activities with idempotency,
//! timeout, and cancellation semantics, writes results back to the store,
//! and acks or nacks tasks per the activity's retry policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activity::{ActivityContext, ActivityError, ActivityRegistry, CancellationHandle};
use crate::queue::{Queue, QueueError, Task, TaskType};
use crate::reliability::RetryPolicy;
use crate::state::{
    event_data, ActivityRetryingData, ActivityStartedData, ActivityState, Event, EventType, Store,
    StoreError, WorkflowStatus,
};

/// How often the workflow-cancel watcher polls the store; this bounds the
/// worst-case cancellation latency of a running activity
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker ID (generated if not provided)
    pub id: String,

    /// Queue this worker polls
    pub queue_name: String,

    /// Number of parallel poll loops
    pub max_concurrent: usize,

    /// Dequeue wait per poll
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: format!("worker-{}", Uuid::now_v7()),
            queue_name: "default".to_string(),
            max_concurrent: 5,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    /// Set the worker ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the queue to poll
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// Set the number of parallel poll loops
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Set the dequeue wait per poll
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Worker already running
    #[error("worker is already running")]
    AlreadyRunning,

    /// Graceful shutdown timed out
    #[error("worker shutdown timed out")]
    ShutdownTimeout,

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Result of one task delivery, used for the ack/nack decision
struct TaskOutcome {
    success: bool,
    retryable: bool,
    /// Requeue regardless of attempts, used when a durable write failed and
    /// the whole attempt must be replayed
    force_requeue: bool,
    max_attempts: u32,
    backoff: Duration,
}

impl TaskOutcome {
    fn success() -> Self {
        Self {
            success: true,
            retryable: false,
            force_requeue: false,
            max_attempts: 0,
            backoff: Duration::ZERO,
        }
    }

    fn failure(policy: &RetryPolicy, next_attempt: u32, retryable: bool) -> Self {
        Self {
            success: false,
            retryable,
            force_requeue: false,
            max_attempts: policy.max_attempts,
            backoff: policy.delay_for_attempt(next_attempt),
        }
    }

    fn replay_attempt(policy: &RetryPolicy, next_attempt: u32) -> Self {
        Self {
            success: false,
            retryable: true,
            force_requeue: true,
            max_attempts: policy.max_attempts,
            backoff: policy.delay_for_attempt(next_attempt),
        }
    }
}

/// Worker pool
///
/// # Example
///
/// ```ignore
/// let worker = Worker::new(queue, registry, store, WorkerConfig::default());
/// worker.start()?;
/// // ...
/// worker.stop(Duration::from_secs(5)).await?;
/// ```
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<dyn Queue>,
    registry: Arc<ActivityRegistry>,
    store: Arc<dyn Store>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Create a new worker
    pub fn new(
        queue: Arc<dyn Queue>,
        registry: Arc<ActivityRegistry>,
        store: Arc<dyn Store>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            queue,
            registry,
            store,
            running: AtomicBool::new(false),
            shutdown_tx,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Worker ID
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Start the poll loops
    #[instrument(skip(self), fields(worker_id = %self.config.id))]
    pub fn start(&self) -> Result<(), WorkerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyRunning);
        }

        info!(
            worker_id = %self.config.id,
            queue = %self.config.queue_name,
            max_concurrent = self.config.max_concurrent,
            "starting worker"
        );

        let mut handles = self.handles.lock();
        for loop_num in 0..self.config.max_concurrent {
            let queue = self.queue.clone();
            let registry = self.registry.clone();
            let store = self.store.clone();
            let config = self.config.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                Self::poll_loop(queue, registry, store, config, loop_num, shutdown_rx).await;
            }));
        }
        Ok(())
    }

    /// Stop the worker, waiting up to `timeout` for loops to drain
    #[instrument(skip(self), fields(worker_id = %self.config.id))]
    pub async fn stop(&self, timeout: Duration) -> Result<(), WorkerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!(worker_id = %self.config.id, "stopping worker");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let deadline = tokio::time::Instant::now() + timeout;

        for handle in handles {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                handle.abort();
                return Err(WorkerError::ShutdownTimeout);
            }
            if tokio::time::timeout(deadline - now, handle).await.is_err() {
                return Err(WorkerError::ShutdownTimeout);
            }
        }

        info!(worker_id = %self.config.id, "worker stopped");
        Ok(())
    }

    async fn poll_loop(
        queue: Arc<dyn Queue>,
        registry: Arc<ActivityRegistry>,
        store: Arc<dyn Store>,
        config: WorkerConfig,
        loop_num: usize,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        debug!(worker_id = %config.id, loop_num, "poll loop started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                result = queue.dequeue_with_timeout(&config.queue_name, config.poll_interval) => {
                    match result {
                        Ok(Some(task)) => {
                            Self::process_task(&queue, &registry, &store, &config, task).await;
                        }
                        Ok(None) => {}
                        Err(QueueError::Closed) => {
                            debug!(worker_id = %config.id, loop_num, "queue closed");
                            break;
                        }
                        Err(error) => {
                            warn!(worker_id = %config.id, "dequeue failed: {error}");
                            tokio::time::sleep(config.poll_interval).await;
                        }
                    }
                }
            }
        }

        debug!(worker_id = %config.id, loop_num, "poll loop exited");
    }

    /// Execute one delivery and settle it with the queue
    async fn process_task(
        queue: &Arc<dyn Queue>,
        registry: &Arc<ActivityRegistry>,
        store: &Arc<dyn Store>,
        config: &WorkerConfig,
        task: Task,
    ) {
        debug!(
            worker_id = %config.id,
            task_id = %task.id,
            workflow_id = %task.workflow_id,
            "received task"
        );

        // Terminal workflows take no further events; late or duplicate tasks
        // for them are retired without side effects
        if let Ok(state) = store.get_workflow_state(&task.workflow_id).await {
            if state.is_complete() {
                debug!(
                    task_id = %task.id,
                    workflow_id = %task.workflow_id,
                    status = %state.status,
                    "dropping task for finished workflow"
                );
                if let Err(error) = queue.ack(&config.queue_name, &task.id).await {
                    warn!(task_id = %task.id, "failed to ack retired task: {error}");
                }
                return;
            }
        }

        let outcome = match task.task_type {
            TaskType::Activity => Self::execute_activity(registry, store, config, &task).await,
            TaskType::Workflow => {
                warn!(task_id = %task.id, "workflow tasks are not supported on this queue");
                TaskOutcome::failure(&RetryPolicy::no_retry(), task.attempts + 1, false)
            }
        };

        if outcome.success {
            if let Err(error) = queue.ack(&config.queue_name, &task.id).await {
                warn!(task_id = %task.id, "failed to ack task: {error}");
            }
            return;
        }

        let requeue =
            outcome.force_requeue || (outcome.retryable && task.attempts < outcome.max_attempts);

        if requeue && !task.activity_id.is_empty() {
            let event = Event::new(
                task.workflow_id.clone(),
                EventType::ActivityRetrying,
                event_data(&ActivityRetryingData {
                    activity_id: task.activity_id.clone(),
                    attempt: task.attempts,
                    backoff_ms: outcome.backoff.as_millis() as u64,
                }),
            );
            if let Err(error) = store.append_event(event).await {
                warn!(task_id = %task.id, "failed to record activity_retrying: {error}");
            }
        }

        if let Err(error) = queue.nack(&config.queue_name, &task.id, requeue).await {
            warn!(task_id = %task.id, requeue, "failed to nack task: {error}");
        }
    }

    /// The activity pipeline: idempotency check, exactly-once lifecycle
    /// events, timeout + cancel enforcement, durable result writes
    async fn execute_activity(
        registry: &Arc<ActivityRegistry>,
        store: &Arc<dyn Store>,
        config: &WorkerConfig,
        task: &Task,
    ) -> TaskOutcome {
        let next_attempt = task.attempts + 1;

        let registration = match registry.get(&task.activity_name) {
            Ok(registration) => registration,
            Err(error) => {
                warn!(
                    activity_name = %task.activity_name,
                    task_id = %task.id,
                    "activity not found: {error}"
                );
                return TaskOutcome::failure(&RetryPolicy::default(), next_attempt, true);
            }
        };
        let policy = registration.info.retry_policy.clone();

        // Load or initialize the activity state. A completed record is the
        // idempotency cache: duplicate deliveries return it with zero new
        // events and no re-execution.
        let mut activity_state = match store.get_activity_state(&task.activity_id).await {
            Ok(state) if state.status == WorkflowStatus::Completed => {
                debug!(
                    activity_id = %task.activity_id,
                    "duplicate delivery of completed activity, using cached result"
                );
                return TaskOutcome::success();
            }
            Ok(mut state) => {
                // A prior attempt already emitted activity_started
                state.attempt = task.attempts;
                if let Err(error) = store.save_activity_state(&state).await {
                    warn!(activity_id = %task.activity_id, "failed to update attempt: {error}");
                    return TaskOutcome::replay_attempt(&policy, next_attempt);
                }
                state
            }
            Err(StoreError::ActivityNotFound(_)) => {
                let state = ActivityState::new(
                    &task.activity_id,
                    &task.activity_name,
                    &task.workflow_id,
                    task.input.clone(),
                    task.attempts,
                );
                if let Err(error) = store.save_activity_state(&state).await {
                    warn!(activity_id = %task.activity_id, "failed to save state: {error}");
                    return TaskOutcome::replay_attempt(&policy, next_attempt);
                }

                let event = Event::new(
                    task.workflow_id.clone(),
                    EventType::ActivityStarted,
                    event_data(&ActivityStartedData {
                        activity_id: task.activity_id.clone(),
                        activity_name: task.activity_name.clone(),
                    }),
                );
                if let Err(error) = store.append_event(event).await {
                    warn!(activity_id = %task.activity_id, "failed to record start: {error}");
                    return TaskOutcome::replay_attempt(&policy, next_attempt);
                }
                state
            }
            Err(error) => {
                warn!(activity_id = %task.activity_id, "failed to read state: {error}");
                return TaskOutcome::replay_attempt(&policy, next_attempt);
            }
        };

        let ctx = ActivityContext::new(
            &task.workflow_id,
            &task.activity_id,
            &task.activity_name,
            task.attempts,
            policy.max_attempts,
            store.clone(),
        );
        let watcher = Self::spawn_cancel_watcher(
            store.clone(),
            task.workflow_id.clone(),
            ctx.cancellation_handle(),
        );

        let timeout = registration.info.timeout;
        let execution = registration.activity.execute(ctx, task.input.clone());
        let result = match tokio::time::timeout(timeout, execution).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::retryable(format!(
                "activity timed out after {timeout:?}"
            ))),
        };
        watcher.abort();

        activity_state.end_time = Some(Utc::now());

        match result {
            Ok(output) => {
                activity_state.status = WorkflowStatus::Completed;
                activity_state.output = output;
                activity_state.error = String::new();

                // Event before state: result pollers wake on the state
                // record, so the completion event must already be in the log
                let event = Event::new(
                    task.workflow_id.clone(),
                    EventType::ActivityCompleted,
                    event_data(&crate::state::ActivityCompletedData {
                        activity_id: task.activity_id.clone(),
                        output: activity_state.output.clone(),
                    }),
                );
                if let Err(error) = store.append_event(event).await {
                    warn!(activity_id = %task.activity_id, "failed to record completion: {error}");
                    return TaskOutcome::replay_attempt(&policy, next_attempt);
                }
                if let Err(error) = store.save_activity_state(&activity_state).await {
                    warn!(activity_id = %task.activity_id, "failed to save result: {error}");
                    return TaskOutcome::replay_attempt(&policy, next_attempt);
                }

                debug!(
                    worker_id = %config.id,
                    activity_id = %task.activity_id,
                    "activity completed"
                );
                TaskOutcome::success()
            }
            Err(activity_error) => {
                activity_state.status = WorkflowStatus::Failed;
                activity_state.error = activity_error.message.clone();

                let event = Event::new(
                    task.workflow_id.clone(),
                    EventType::ActivityFailed,
                    event_data(&crate::state::ActivityFailedData {
                        activity_id: task.activity_id.clone(),
                        error: activity_error.message.clone(),
                        attempt: task.attempts,
                    }),
                );
                if let Err(error) = store.append_event(event).await {
                    warn!(activity_id = %task.activity_id, "failed to record failure: {error}");
                    return TaskOutcome::replay_attempt(&policy, next_attempt);
                }
                if let Err(error) = store.save_activity_state(&activity_state).await {
                    warn!(activity_id = %task.activity_id, "failed to save failure: {error}");
                    return TaskOutcome::replay_attempt(&policy, next_attempt);
                }

                warn!(
                    worker_id = %config.id,
                    activity_id = %task.activity_id,
                    attempt = task.attempts,
                    "activity failed: {activity_error}"
                );

                // Work for a canceled workflow is never retried
                let workflow_canceled = matches!(
                    store.get_workflow_state(&task.workflow_id).await,
                    Ok(state) if state.status == WorkflowStatus::Canceled
                );
                let retryable = !workflow_canceled
                    && activity_error.retryable
                    && policy.is_retryable(&activity_error.message);
                TaskOutcome::failure(&policy, next_attempt, retryable)
            }
        }
    }

    /// Cancel the activity when its workflow's persisted status flips to
    /// Canceled
    fn spawn_cancel_watcher(
        store: Arc<dyn Store>,
        workflow_id: String,
        handle: CancellationHandle,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CANCEL_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                match store.get_workflow_state(&workflow_id).await {
                    Ok(state) if state.status == WorkflowStatus::Canceled => {
                        debug!(%workflow_id, "workflow canceled, canceling activity");
                        handle.cancel();
                        return;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%workflow_id, "cancel watcher poll failed: {error}");
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.config.id)
            .field("queue_name", &self.config.queue_name)
            .field("max_concurrent", &self.config.max_concurrent)
            .finish()
    }
}
