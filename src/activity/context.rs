//! Activity execution context
//!
//! Built by the worker for each task delivery. Carries attempt information,
//! an event emitter so activities can stream observability events (agent
//! steps, tool calls, messages) into the workflow's log, the store handle
//! for idempotency-aware activities, and cancellation detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::state::{Event, EventType, Store, StoreError};

/// Context provided to activities during execution
///
/// Cloning is cheap; internals are shared.
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
///     ctx.emit_event(EventType::AgentStepPlanned, data).await?;
///
///     tokio::select! {
///         result = call_model(input) => result,
///         _ = ctx.cancelled() => Err(ActivityError::non_retryable("canceled")),
///     }
/// }
/// ```
#[derive(Clone)]
pub struct ActivityContext {
    workflow_id: String,
    activity_id: String,
    activity_name: String,
    attempt: u32,
    max_attempts: u32,
    store: Arc<dyn Store>,
    cancelled: Arc<AtomicBool>,
}

impl ActivityContext {
    /// Create a new activity context
    pub fn new(
        workflow_id: impl Into<String>,
        activity_id: impl Into<String>,
        activity_name: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            activity_id: activity_id.into(),
            activity_name: activity_name.into(),
            attempt,
            max_attempts,
            store,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Workflow that owns this activity
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Stable activity identifier within the workflow
    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    /// Registered name of the activity
    pub fn activity_name(&self) -> &str {
        &self.activity_name
    }

    /// Current delivery attempt (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Check if this is the final attempt allowed by the retry policy
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Store handle, for idempotency-aware activities
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Append an event to the owning workflow's log
    ///
    /// This is how activities stream sub-events (agent steps, tool calls,
    /// messages) to subscribers while still running.
    pub async fn emit_event(
        &self,
        event_type: EventType,
        data: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.store
            .append_event(Event::new(self.workflow_id.clone(), event_type, data))
            .await?;
        Ok(())
    }

    /// Get a handle that can cancel this activity
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Resolve when cancellation is requested
    ///
    /// Useful in `select!` arms next to the actual work.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl std::fmt::Debug for ActivityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityContext")
            .field("workflow_id", &self.workflow_id)
            .field("activity_id", &self.activity_id)
            .field("activity_name", &self.activity_name)
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Handle to cancel an activity
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStore;

    fn context_with_store() -> (ActivityContext, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ActivityContext::new("wf-1", "act-1", "echo", 1, 3, store.clone());
        (ctx, store)
    }

    #[test]
    fn test_context_accessors() {
        let (ctx, _) = context_with_store();
        assert_eq!(ctx.workflow_id(), "wf-1");
        assert_eq!(ctx.activity_id(), "act-1");
        assert_eq!(ctx.activity_name(), "echo");
        assert_eq!(ctx.attempt(), 1);
        assert!(!ctx.is_last_attempt());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_is_last_attempt() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let ctx = ActivityContext::new("wf-1", "act-1", "echo", 3, 3, store);
        assert!(ctx.is_last_attempt());
    }

    #[test]
    fn test_cancellation_handle() {
        let (ctx, _) = context_with_store();
        let handle = ctx.cancellation_handle();

        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_emit_event_appends_to_log() {
        let (ctx, store) = context_with_store();

        let mut data = Map::new();
        data.insert("content".to_string(), Value::String("hello".to_string()));
        ctx.emit_event(EventType::AgentMessage, data).await.unwrap();

        let events = store.get_events("wf-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::AgentMessage);
        assert_eq!(events[0].data_str("content"), Some("hello"));
        assert_eq!(events[0].sequence_num, 1);
    }
}
