//! The execution context handed to workflow code
//!
//! Exposes the deterministic workflow API: schedule activities (with stable
//! IDs), sleep on durable timers, read logical time and the workflow ID.
//! Scheduled work returns [`WorkflowFuture`]s that resolve by polling
//! persisted state, so a re-executed workflow re-attaches to results that
//! were produced before a crash.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::queue::{Queue, Task, TaskType};
use crate::state::{
    event_data, ActivityScheduledData, Event, EventType, Store, StoreError, TimerScheduledData,
    WorkflowStatus,
};
use crate::workflow::{WorkflowError, WorkflowFuture};

/// How often activity-result futures re-read activity state
const ACTIVITY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often timer futures re-read the event log
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct ContextInner {
    workflow_id: String,
    task_queue: String,
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    timer_seq: AtomicU64,
    cancel_rx: watch::Receiver<bool>,
}

/// Workflow execution context
///
/// Cloning is cheap; clones share the workflow-local timer counter and the
/// cancellation channel.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

impl WorkflowContext {
    pub(crate) fn new(
        workflow_id: impl Into<String>,
        task_queue: impl Into<String>,
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                workflow_id: workflow_id.into(),
                task_queue: task_queue.into(),
                store,
                queue,
                timer_seq: AtomicU64::new(0),
                cancel_rx,
            }),
        }
    }

    /// Unique identifier of this workflow execution
    pub fn workflow_id(&self) -> &str {
        &self.inner.workflow_id
    }

    /// Queue that this workflow's activities are dispatched to
    pub fn task_queue(&self) -> &str {
        &self.inner.task_queue
    }

    /// Current workflow time
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Check if the workflow has been canceled
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_rx.borrow()
    }

    /// Schedule an activity under a fresh ID
    pub async fn execute_activity(&self, activity_name: &str, input: Value) -> WorkflowFuture {
        let activity_id = format!("act-{}", Uuid::now_v7());
        self.execute_activity_with_id(activity_name, input, &activity_id)
            .await
    }

    /// Schedule an activity under a caller-chosen stable ID
    ///
    /// If the activity already completed, the returned future is resolved
    /// immediately from the cached result: no new events, no new task. If a
    /// prior attempt is still in flight, the task is re-enqueued without a
    /// duplicate `activity_scheduled` event.
    pub async fn execute_activity_with_id(
        &self,
        activity_name: &str,
        input: Value,
        activity_id: &str,
    ) -> WorkflowFuture {
        let activity_id = if activity_id.is_empty() {
            format!("act-{}", Uuid::now_v7())
        } else {
            activity_id.to_string()
        };

        // A canceled workflow schedules nothing further
        if self.is_cancelled() {
            return WorkflowFuture::failed(
                &activity_id,
                WorkflowError::new("workflow canceled"),
            );
        }

        let mut previously_scheduled = false;
        match self.inner.store.get_activity_state(&activity_id).await {
            Ok(state) if state.status == WorkflowStatus::Completed => {
                debug!(
                    workflow_id = %self.inner.workflow_id,
                    %activity_id,
                    "returning cached activity result"
                );
                return WorkflowFuture::resolved(&activity_id, state.output);
            }
            Ok(_) => previously_scheduled = true,
            Err(StoreError::ActivityNotFound(_)) => {}
            Err(error) => {
                return WorkflowFuture::failed(
                    &activity_id,
                    WorkflowError::new(format!("failed to read activity state: {error}")),
                );
            }
        }

        if !previously_scheduled {
            let event = Event::new(
                self.inner.workflow_id.clone(),
                EventType::ActivityScheduled,
                event_data(&ActivityScheduledData {
                    activity_id: activity_id.clone(),
                    activity_name: activity_name.to_string(),
                    input: input.clone(),
                }),
            );
            if let Err(error) = self.inner.store.append_event(event).await {
                return WorkflowFuture::failed(
                    &activity_id,
                    WorkflowError::new(format!("failed to record activity schedule: {error}")),
                );
            }
        }

        let task = Task::new(TaskType::Activity, self.inner.workflow_id.clone(), input)
            .with_activity(&activity_id, activity_name);
        if let Err(error) = self.inner.queue.enqueue(&self.inner.task_queue, task).await {
            return WorkflowFuture::failed(
                &activity_id,
                WorkflowError::new(format!("failed to enqueue activity: {error}")),
            );
        }

        debug!(
            workflow_id = %self.inner.workflow_id,
            %activity_id,
            activity_name,
            "scheduled activity"
        );

        let future = WorkflowFuture::new(&activity_id);
        self.spawn_activity_poller(activity_id, future.clone());
        future
    }

    /// Pause the workflow on a durable timer
    ///
    /// The timer ID comes from a workflow-local counter, so a re-executed
    /// workflow re-attaches to the timer it scheduled before a crash. The
    /// future resolves when the engine's scanner appends the matching
    /// `timer_fired` event.
    pub async fn sleep(&self, duration: Duration) -> WorkflowFuture {
        let seq = self.inner.timer_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let timer_id = format!("timer-{seq}");

        if self.is_cancelled() {
            return WorkflowFuture::failed(&timer_id, WorkflowError::new("workflow canceled"));
        }

        let fire_at = Utc::now() + chrono::Duration::milliseconds(duration.as_millis() as i64);

        if let Err(error) = self
            .inner
            .store
            .schedule_timer(&self.inner.workflow_id, &timer_id, fire_at)
            .await
        {
            return WorkflowFuture::failed(
                &timer_id,
                WorkflowError::new(format!("failed to schedule timer: {error}")),
            );
        }

        let event = Event::new(
            self.inner.workflow_id.clone(),
            EventType::TimerScheduled,
            event_data(&TimerScheduledData {
                timer_id: timer_id.clone(),
                fire_at,
                duration_ms: duration.as_millis() as u64,
            }),
        );
        if let Err(error) = self.inner.store.append_event(event).await {
            // The timer record itself is durable; the event is observability
            warn!(
                workflow_id = %self.inner.workflow_id,
                %timer_id,
                "failed to record timer_scheduled event: {error}"
            );
        }

        let future = WorkflowFuture::new(&timer_id);
        self.spawn_timer_poller(timer_id, future.clone());
        future
    }

    fn spawn_activity_poller(&self, activity_id: String, future: WorkflowFuture) {
        let store = self.inner.store.clone();
        let mut cancel_rx = self.inner.cancel_rx.clone();

        tokio::spawn(async move {
            if *cancel_rx.borrow() {
                future.fail(WorkflowError::new("workflow canceled"));
                return;
            }
            let mut ticker = tokio::time::interval(ACTIVITY_POLL_INTERVAL);
            loop {
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            future.fail(WorkflowError::new("workflow canceled"));
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        match store.get_activity_state(&activity_id).await {
                            Ok(state) => match state.status {
                                WorkflowStatus::Completed => {
                                    future.resolve(state.output);
                                    return;
                                }
                                WorkflowStatus::Failed => {
                                    future.fail(WorkflowError::new(format!(
                                        "activity failed: {}",
                                        state.error
                                    )));
                                    return;
                                }
                                _ => {}
                            },
                            // Not started yet; keep polling
                            Err(StoreError::ActivityNotFound(_)) => {}
                            Err(error) => {
                                warn!(%activity_id, "activity state poll failed: {error}");
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_timer_poller(&self, timer_id: String, future: WorkflowFuture) {
        let store = self.inner.store.clone();
        let workflow_id = self.inner.workflow_id.clone();
        let mut cancel_rx = self.inner.cancel_rx.clone();

        tokio::spawn(async move {
            if *cancel_rx.borrow() {
                future.fail(WorkflowError::new("workflow canceled"));
                return;
            }
            let mut since = 0i64;
            let mut ticker = tokio::time::interval(EVENT_POLL_INTERVAL);
            loop {
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            future.fail(WorkflowError::new("workflow canceled"));
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        match store.get_events_since(&workflow_id, since).await {
                            Ok(events) => {
                                for event in events {
                                    if event.sequence_num > since {
                                        since = event.sequence_num;
                                    }
                                    if event.event_type == EventType::TimerFired
                                        && event.data_str("timer_id") == Some(timer_id.as_str())
                                    {
                                        future.resolve(Value::Null);
                                        return;
                                    }
                                }
                            }
                            Err(error) => {
                                warn!(%workflow_id, %timer_id, "event poll failed: {error}");
                            }
                        }
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("workflow_id", &self.inner.workflow_id)
            .field("task_queue", &self.inner.task_queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::state::{ActivityState, InMemoryStore};
    use serde_json::json;

    fn test_context(
        store: Arc<InMemoryStore>,
        queue: Arc<InMemoryQueue>,
    ) -> (WorkflowContext, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = WorkflowContext::new("wf-1", "default", store, queue, cancel_rx);
        (ctx, cancel_tx)
    }

    #[tokio::test]
    async fn test_execute_activity_schedules_event_and_task() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (ctx, _cancel_tx) = test_context(store.clone(), queue.clone());

        let future = ctx
            .execute_activity_with_id("echo", json!("hi"), "a1")
            .await;
        assert_eq!(future.id(), "a1");
        assert!(!future.is_ready());

        let events = store.get_events("wf-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ActivityScheduled);
        assert_eq!(events[0].data_str("activity_id"), Some("a1"));

        assert_eq!(queue.len("default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_completed_activity_short_circuits() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());

        let mut state = ActivityState::new("a1", "echo", "wf-1", json!("hi"), 1);
        state.status = WorkflowStatus::Completed;
        state.output = json!("cached");
        store.save_activity_state(&state).await.unwrap();

        let (ctx, _cancel_tx) = test_context(store.clone(), queue.clone());
        let future = ctx
            .execute_activity_with_id("echo", json!("hi"), "a1")
            .await;

        assert!(future.is_ready());
        assert_eq!(future.get().await.unwrap(), json!("cached"));

        // No duplicate events, no task enqueued
        assert!(store.get_events("wf-1").await.unwrap().is_empty());
        assert_eq!(queue.len("default").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inflight_activity_suppresses_duplicate_scheduled_event() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());

        let state = ActivityState::new("a1", "echo", "wf-1", json!("hi"), 1);
        store.save_activity_state(&state).await.unwrap();

        let (ctx, _cancel_tx) = test_context(store.clone(), queue.clone());
        let _future = ctx
            .execute_activity_with_id("echo", json!("hi"), "a1")
            .await;

        assert!(store.get_events("wf-1").await.unwrap().is_empty());
        assert_eq!(queue.len("default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_activity_future_resolves_from_state() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (ctx, _cancel_tx) = test_context(store.clone(), queue.clone());

        let future = ctx
            .execute_activity_with_id("echo", json!("hi"), "a1")
            .await;

        let mut state = ActivityState::new("a1", "echo", "wf-1", json!("hi"), 1);
        state.status = WorkflowStatus::Completed;
        state.output = json!("done");
        store.save_activity_state(&state).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), future.get())
            .await
            .expect("future resolved")
            .unwrap();
        assert_eq!(result, json!("done"));
    }

    #[tokio::test]
    async fn test_sleep_schedules_timer_and_resolves_on_fired_event() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (ctx, _cancel_tx) = test_context(store.clone(), queue.clone());

        let future = ctx.sleep(Duration::from_secs(60)).await;
        assert_eq!(future.id(), "timer-1");

        let due = store
            .list_due_timers(Utc::now() + chrono::Duration::seconds(120))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].timer_id, "timer-1");

        let events = store.get_events("wf-1").await.unwrap();
        assert_eq!(events[0].event_type, EventType::TimerScheduled);

        // Simulate the scanner firing the timer
        store
            .append_event(Event::new(
                "wf-1",
                EventType::TimerFired,
                event_data(&crate::state::TimerFiredData {
                    timer_id: "timer-1".to_string(),
                }),
            ))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), future.get())
            .await
            .expect("future resolved")
            .unwrap();
    }

    #[tokio::test]
    async fn test_timer_ids_are_stable_counters() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (ctx, _cancel_tx) = test_context(store, queue);

        let first = ctx.sleep(Duration::from_secs(60)).await;
        let second = ctx.sleep(Duration::from_secs(60)).await;
        assert_eq!(first.id(), "timer-1");
        assert_eq!(second.id(), "timer-2");
    }

    #[tokio::test]
    async fn test_cancellation_fails_pending_futures() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (ctx, cancel_tx) = test_context(store, queue);

        let future = ctx
            .execute_activity_with_id("echo", json!("hi"), "a1")
            .await;
        assert!(!ctx.is_cancelled());

        cancel_tx.send(true).unwrap();

        let error = tokio::time::timeout(Duration::from_secs(2), future.get())
            .await
            .expect("future settled")
            .unwrap_err();
        assert_eq!(error.message, "workflow canceled");
        assert!(ctx.is_cancelled());
    }
}
