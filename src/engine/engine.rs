//! Workflow engine
//!
//! Coordinates workflow execution: turns registered definitions into
//! scheduled activities, owns workflow lifecycle transitions, fires durable
//! timers, and exposes the status/event readers the serving layer consumes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::context::WorkflowContext;
use crate::queue::{Queue, QueueError};
use crate::state::{
    event_data, Event, EventType, IdempotencyOutcome, Store, StoreError, TimerFiredData,
    WorkflowCompletedData, WorkflowFailedData, WorkflowStartedData, WorkflowState, WorkflowStatus,
};
use crate::workflow::{Definition, RegistryError, WorkflowError, WorkflowRegistry};

/// Default period of the durable-timer scanner
pub const DEFAULT_TIMER_SCAN_INTERVAL: Duration = Duration::from_millis(200);

/// How long a freshly started workflow waits before transitioning to
/// Running, so an immediate cancel lands first
const START_GRACE: Duration = Duration::from_millis(50);

/// How often the driver's watcher polls for cancellation
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn Queue>,
    pub workflow_registry: Arc<WorkflowRegistry>,
    pub timer_scan_interval: Duration,
}

impl EngineConfig {
    /// Create a configuration with the default timer scan interval
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        workflow_registry: Arc<WorkflowRegistry>,
    ) -> Self {
        Self {
            store,
            queue,
            workflow_registry,
            timer_scan_interval: DEFAULT_TIMER_SCAN_INTERVAL,
        }
    }

    /// Set the timer scanner period
    pub fn with_timer_scan_interval(mut self, interval: Duration) -> Self {
        self.timer_scan_interval = interval;
        self
    }
}

/// Options for starting a workflow
#[derive(Debug, Clone, Default)]
pub struct StartWorkflowOptions {
    /// Client-supplied key that deduplicates starts: the same key always
    /// returns the same workflow ID
    pub idempotency_key: Option<String>,
}

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid request
    #[error("{0}")]
    Validation(String),

    /// No definition registered under the requested name
    #[error("workflow {0} not found")]
    WorkflowNotFound(String),

    /// Cancel requested for a workflow that already finished
    #[error("workflow {0} already finished")]
    AlreadyTerminal(String),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Workflow execution engine
///
/// # Example
///
/// ```ignore
/// let engine = Engine::new(EngineConfig::new(store, queue, registry));
/// engine.start();
///
/// let workflow_id = engine.start_workflow("enrich-order", json!({"id": 7})).await?;
/// let state = engine.get_workflow_status(&workflow_id).await?;
/// ```
pub struct Engine {
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    registry: Arc<WorkflowRegistry>,
    timer_scan_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    scanner_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Create an engine from its configuration
    pub fn new(config: EngineConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store: config.store,
            queue: config.queue,
            registry: config.workflow_registry,
            timer_scan_interval: config.timer_scan_interval,
            shutdown_tx,
            scanner_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Start the durable-timer scanner
    ///
    /// Idempotent; must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut handle = self.scanner_handle.lock();
        if handle.is_some() {
            return;
        }

        info!(interval = ?self.timer_scan_interval, "starting timer scanner");
        let store = self.store.clone();
        let interval = self.timer_scan_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::scan_timers(&store).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("timer scanner stopping");
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the timer scanner
    ///
    /// In-flight workflow drivers continue until their next checkpoint;
    /// durable state lets a restarted engine resume timers and results.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.scanner_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Start a workflow by registered name
    #[instrument(skip(self, input))]
    pub async fn start_workflow(
        &self,
        workflow_name: &str,
        input: Value,
    ) -> Result<String, EngineError> {
        self.start_workflow_with_options(workflow_name, input, StartWorkflowOptions::default())
            .await
    }

    /// Start a workflow, with optional idempotent-start semantics
    ///
    /// When `idempotency_key` is set and the key already maps to a workflow,
    /// the existing workflow ID is returned with no new state or events.
    #[instrument(skip(self, input, options))]
    pub async fn start_workflow_with_options(
        &self,
        workflow_name: &str,
        input: Value,
        options: StartWorkflowOptions,
    ) -> Result<String, EngineError> {
        if workflow_name.is_empty() {
            return Err(EngineError::Validation(
                "workflow name is required".to_string(),
            ));
        }

        let definition = self.registry.get(workflow_name).map_err(|error| match error {
            RegistryError::NotFound(name) => EngineError::WorkflowNotFound(name),
            other => EngineError::Validation(other.to_string()),
        })?;

        let workflow_id = format!("wf-{}", Uuid::now_v7());

        if let Some(key) = options.idempotency_key.as_deref().filter(|k| !k.is_empty()) {
            match self
                .store
                .map_idempotency_key_to_workflow(key, &workflow_id)
                .await?
            {
                IdempotencyOutcome::Created => {}
                IdempotencyOutcome::Exists(existing) => {
                    debug!(key, %existing, "idempotency key already mapped");
                    return Ok(existing);
                }
            }
        }

        let state = WorkflowState::new(
            &workflow_id,
            workflow_name,
            input.clone(),
            &definition.options.task_queue,
        );
        self.store.save_workflow_state(&state).await?;

        let event = Event::new(
            workflow_id.clone(),
            EventType::WorkflowStarted,
            event_data(&WorkflowStartedData {
                workflow_name: workflow_name.to_string(),
                input: input.clone(),
                task_queue: definition.options.task_queue.clone(),
            }),
        );
        self.store.append_event(event).await?;

        let store = self.store.clone();
        let queue = self.queue.clone();
        let id = workflow_id.clone();
        tokio::spawn(async move {
            Self::drive_workflow(store, queue, definition, id, input).await;
        });

        info!(%workflow_id, workflow_name, "started workflow");
        Ok(workflow_id)
    }

    /// Cancel a workflow
    ///
    /// Fails with [`EngineError::AlreadyTerminal`] if the workflow finished.
    /// Cancellation is advisory and persistent: the state flips to Canceled
    /// immediately, and running activities observe it through their
    /// execution contexts.
    #[instrument(skip(self))]
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), EngineError> {
        let mut state = self.store.get_workflow_state(workflow_id).await?;
        if state.is_complete() {
            return Err(EngineError::AlreadyTerminal(workflow_id.to_string()));
        }

        state.status = WorkflowStatus::Canceled;
        state.end_time = Some(Utc::now());
        self.store.save_workflow_state(&state).await?;

        self.store
            .append_event(Event::new(
                workflow_id.to_string(),
                EventType::WorkflowCanceled,
                Default::default(),
            ))
            .await?;

        info!(%workflow_id, "canceled workflow");
        Ok(())
    }

    /// Current state of a workflow
    pub async fn get_workflow_status(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowState, EngineError> {
        Ok(self.store.get_workflow_state(workflow_id).await?)
    }

    /// Full event history of a workflow
    pub async fn get_workflow_events(&self, workflow_id: &str) -> Result<Vec<Event>, EngineError> {
        Ok(self.store.get_events(workflow_id).await?)
    }

    /// Events with sequence strictly greater than `since`
    pub async fn get_workflow_events_since(
        &self,
        workflow_id: &str,
        since: i64,
    ) -> Result<Vec<Event>, EngineError> {
        Ok(self.store.get_events_since(workflow_id, since).await?)
    }

    /// List workflows, optionally filtered by status
    pub async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowState>, EngineError> {
        Ok(self.store.list_workflows(status).await?)
    }

    /// Remove a workflow and all of its durable records
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<(), EngineError> {
        Ok(self.store.delete_workflow(workflow_id).await?)
    }

    /// Run a workflow program to completion and persist the outcome
    async fn drive_workflow(
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        definition: Arc<Definition>,
        workflow_id: String,
        input: Value,
    ) {
        // Give an immediate cancel a chance to land before we flip to Running
        tokio::time::sleep(START_GRACE).await;

        let mut state = match store.get_workflow_state(&workflow_id).await {
            Ok(state) => state,
            Err(error) => {
                error!(%workflow_id, "driver failed to load workflow state: {error}");
                return;
            }
        };
        if state.status == WorkflowStatus::Canceled {
            debug!(%workflow_id, "workflow canceled before start");
            return;
        }

        state.status = WorkflowStatus::Running;
        if let Err(error) = store.save_workflow_state(&state).await {
            error!(%workflow_id, "driver failed to mark workflow running: {error}");
            return;
        }

        // Watcher trips the context's cancellation channel when the persisted
        // status flips to Canceled
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let watcher = {
            let store = store.clone();
            let workflow_id = workflow_id.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(CANCEL_POLL_INTERVAL);
                loop {
                    ticker.tick().await;
                    match store.get_workflow_state(&workflow_id).await {
                        Ok(state) if state.status == WorkflowStatus::Canceled => {
                            let _ = cancel_tx.send(true);
                            return;
                        }
                        Ok(_) => {}
                        Err(error) => {
                            warn!(%workflow_id, "cancel watcher poll failed: {error}");
                        }
                    }
                }
            })
        };

        let ctx = WorkflowContext::new(
            workflow_id.clone(),
            definition.options.task_queue.clone(),
            store.clone(),
            queue,
            cancel_rx,
        );

        let execution = definition.workflow.execute(ctx, input);
        let result = match definition.options.execution_timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => Err(WorkflowError::new(format!(
                    "workflow execution timed out after {limit:?}"
                ))),
            },
            None => execution.await,
        };

        watcher.abort();

        // A cancel that landed mid-execution wins: the terminal event was
        // already written and no completion/failure may follow it
        let mut state = match store.get_workflow_state(&workflow_id).await {
            Ok(state) => state,
            Err(error) => {
                error!(%workflow_id, "driver failed to reload workflow state: {error}");
                return;
            }
        };
        if state.status == WorkflowStatus::Canceled {
            debug!(%workflow_id, "workflow canceled during execution");
            return;
        }

        state.end_time = Some(Utc::now());
        match result {
            Ok(output) => {
                state.status = WorkflowStatus::Completed;
                state.output = output.clone();

                let event = Event::new(
                    workflow_id.clone(),
                    EventType::WorkflowCompleted,
                    event_data(&WorkflowCompletedData { output }),
                );
                match store.append_event(event).await {
                    Ok(appended) => state.last_event_seq = appended.sequence_num,
                    Err(error) => {
                        error!(%workflow_id, "failed to record workflow completion: {error}");
                    }
                }
                info!(%workflow_id, "workflow completed");
            }
            Err(workflow_error) => {
                state.status = WorkflowStatus::Failed;
                state.error = workflow_error.to_string();

                let event = Event::new(
                    workflow_id.clone(),
                    EventType::WorkflowFailed,
                    event_data(&WorkflowFailedData {
                        error: workflow_error.to_string(),
                    }),
                );
                match store.append_event(event).await {
                    Ok(appended) => state.last_event_seq = appended.sequence_num,
                    Err(error) => {
                        error!(%workflow_id, "failed to record workflow failure: {error}");
                    }
                }
                warn!(%workflow_id, "workflow failed: {workflow_error}");
            }
        }

        if let Err(error) = store.save_workflow_state(&state).await {
            error!(%workflow_id, "failed to save terminal workflow state: {error}");
        }
    }

    /// One pass of the durable-timer scanner
    async fn scan_timers(store: &Arc<dyn Store>) {
        let due = match store.list_due_timers(Utc::now()).await {
            Ok(due) => due,
            Err(error) => {
                warn!("timer scan failed: {error}");
                return;
            }
        };

        for record in due {
            let transitioned = match store
                .mark_timer_fired(&record.workflow_id, &record.timer_id)
                .await
            {
                Ok(transitioned) => transitioned,
                Err(error) => {
                    warn!(
                        workflow_id = %record.workflow_id,
                        timer_id = %record.timer_id,
                        "failed to mark timer fired: {error}"
                    );
                    continue;
                }
            };
            if !transitioned {
                continue;
            }

            // Terminal workflows take no further events; the timer is
            // retired without firing
            match store.get_workflow_state(&record.workflow_id).await {
                Ok(state) if state.is_complete() => {
                    debug!(
                        workflow_id = %record.workflow_id,
                        timer_id = %record.timer_id,
                        "timer due for finished workflow, skipping event"
                    );
                    continue;
                }
                _ => {}
            }

            let event = Event::new(
                record.workflow_id.clone(),
                EventType::TimerFired,
                event_data(&TimerFiredData {
                    timer_id: record.timer_id.clone(),
                }),
            );
            if let Err(error) = store.append_event(event).await {
                warn!(
                    workflow_id = %record.workflow_id,
                    timer_id = %record.timer_id,
                    "failed to record timer_fired event: {error}"
                );
            } else {
                debug!(
                    workflow_id = %record.workflow_id,
                    timer_id = %record.timer_id,
                    "timer fired"
                );
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("timer_scan_interval", &self.timer_scan_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::state::InMemoryStore;
    use crate::workflow::{Definition, WorkflowFn};
    use serde_json::json;

    fn engine_with(workflows: Vec<Definition>) -> (Arc<Engine>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let registry = Arc::new(WorkflowRegistry::new());
        for definition in workflows {
            registry.register(definition).unwrap();
        }
        let engine = Engine::new(EngineConfig::new(store.clone(), queue, registry));
        (Arc::new(engine), store)
    }

    fn passthrough(name: &str) -> Definition {
        Definition::new(
            name,
            Arc::new(WorkflowFn::new(|_ctx, input| async move { Ok(input) })),
        )
    }

    async fn wait_for_status(
        engine: &Engine,
        workflow_id: &str,
        status: WorkflowStatus,
    ) -> WorkflowState {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let state = engine.get_workflow_status(workflow_id).await.unwrap();
            if state.status == status {
                return state;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {status}, last was {}",
                state.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_start_workflow_records_state_and_event() {
        let (engine, _store) = engine_with(vec![passthrough("pass")]);

        let workflow_id = engine.start_workflow("pass", json!("in")).await.unwrap();
        assert!(workflow_id.starts_with("wf-"));

        let state = wait_for_status(&engine, &workflow_id, WorkflowStatus::Completed).await;
        assert_eq!(state.workflow_name, "pass");
        assert_eq!(state.output, json!("in"));
        assert!(state.end_time.is_some());

        let events = engine.get_workflow_events(&workflow_id).await.unwrap();
        assert_eq!(events[0].event_type, EventType::WorkflowStarted);
        assert_eq!(
            events.last().unwrap().event_type,
            EventType::WorkflowCompleted
        );
    }

    #[tokio::test]
    async fn test_unknown_workflow_name() {
        let (engine, _store) = engine_with(vec![]);
        let result = engine.start_workflow("ghost", json!({})).await;
        assert!(matches!(result, Err(EngineError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_workflow_name() {
        let (engine, _store) = engine_with(vec![]);
        let result = engine.start_workflow("", json!({})).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_workflow_failure_records_error_verbatim() {
        let failing = Definition::new(
            "fail",
            Arc::new(WorkflowFn::new(|_ctx, _input| async move {
                Err(WorkflowError::new("llm exploded"))
            })),
        );
        let (engine, _store) = engine_with(vec![failing]);

        let workflow_id = engine.start_workflow("fail", json!({})).await.unwrap();
        let state = wait_for_status(&engine, &workflow_id, WorkflowStatus::Failed).await;
        assert_eq!(state.error, "llm exploded");

        let events = engine.get_workflow_events(&workflow_id).await.unwrap();
        let failed = events
            .iter()
            .find(|e| e.event_type == EventType::WorkflowFailed)
            .expect("workflow_failed event");
        assert_eq!(failed.data_str("error"), Some("llm exploded"));
    }

    #[tokio::test]
    async fn test_cancel_before_run_wins() {
        let (engine, _store) = engine_with(vec![passthrough("pass")]);

        let workflow_id = engine.start_workflow("pass", json!({})).await.unwrap();
        engine.cancel_workflow(&workflow_id).await.unwrap();

        let state = wait_for_status(&engine, &workflow_id, WorkflowStatus::Canceled).await;
        assert!(state.end_time.is_some());

        // Driver must not append terminal events after the cancel
        tokio::time::sleep(Duration::from_millis(200)).await;
        let events = engine.get_workflow_events(&workflow_id).await.unwrap();
        assert!(!events
            .iter()
            .any(|e| e.event_type == EventType::WorkflowCompleted));
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::WorkflowCanceled));
    }

    #[tokio::test]
    async fn test_cancel_terminal_workflow_conflicts() {
        let (engine, _store) = engine_with(vec![passthrough("pass")]);

        let workflow_id = engine.start_workflow("pass", json!({})).await.unwrap();
        wait_for_status(&engine, &workflow_id, WorkflowStatus::Completed).await;

        let result = engine.cancel_workflow(&workflow_id).await;
        assert!(matches!(result, Err(EngineError::AlreadyTerminal(_))));
    }

    #[tokio::test]
    async fn test_cancel_unknown_workflow() {
        let (engine, _store) = engine_with(vec![]);
        let result = engine.cancel_workflow("wf-ghost").await;
        assert!(matches!(
            result,
            Err(EngineError::Store(StoreError::WorkflowNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_idempotent_start_returns_same_id() {
        let (engine, store) = engine_with(vec![passthrough("pass")]);

        let options = StartWorkflowOptions {
            idempotency_key: Some("K".to_string()),
        };
        let first = engine
            .start_workflow_with_options("pass", json!({"a": 1}), options.clone())
            .await
            .unwrap();
        wait_for_status(&engine, &first, WorkflowStatus::Completed).await;
        let events_before = store.event_count();

        // Same key, same body
        let second = engine
            .start_workflow_with_options("pass", json!({"a": 1}), options.clone())
            .await
            .unwrap();
        assert_eq!(second, first);

        // Same key, different body still routes to the original workflow
        let third = engine
            .start_workflow_with_options("pass", json!({"a": 2}), options)
            .await
            .unwrap();
        assert_eq!(third, first);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.event_count(), events_before);
        assert_eq!(store.workflow_count(), 1);
    }

    #[tokio::test]
    async fn test_execution_timeout_fails_workflow() {
        let slow = Definition::new(
            "slow",
            Arc::new(WorkflowFn::new(|_ctx, _input| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!("late"))
            })),
        )
        .with_options(crate::workflow::WorkflowOptions {
            execution_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let (engine, _store) = engine_with(vec![slow]);

        let workflow_id = engine.start_workflow("slow", json!({})).await.unwrap();
        let state = wait_for_status(&engine, &workflow_id, WorkflowStatus::Failed).await;
        assert!(state.error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_timer_scanner_fires_due_timers_once() {
        let (engine, store) = engine_with(vec![]);
        engine.start();

        store.save_workflow_state(&WorkflowState::new(
            "wf-1",
            "sleepy",
            json!({}),
            "default",
        ))
        .await
        .unwrap();
        store
            .schedule_timer("wf-1", "timer-1", Utc::now())
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let events = store.get_events("wf-1").await.unwrap();
            let fired = events
                .iter()
                .filter(|e| e.event_type == EventType::TimerFired)
                .count();
            if fired == 1 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "timer never fired");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // A few more scan periods must not duplicate the event
        tokio::time::sleep(Duration::from_millis(500)).await;
        let events = store.get_events("wf-1").await.unwrap();
        let fired = events
            .iter()
            .filter(|e| e.event_type == EventType::TimerFired)
            .count();
        assert_eq!(fired, 1);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_timer_for_terminal_workflow_is_retired_silently() {
        let (engine, store) = engine_with(vec![]);
        engine.start();

        let mut state = WorkflowState::new("wf-1", "sleepy", json!({}), "default");
        state.status = WorkflowStatus::Canceled;
        state.end_time = Some(Utc::now());
        store.save_workflow_state(&state).await.unwrap();
        store
            .schedule_timer("wf-1", "timer-1", Utc::now())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;

        let events = store.get_events("wf-1").await.unwrap();
        assert!(!events.iter().any(|e| e.event_type == EventType::TimerFired));
        // Retired: no longer listed as due
        assert!(store.list_due_timers(Utc::now()).await.unwrap().is_empty());

        engine.stop().await;
    }
}
