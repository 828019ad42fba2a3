//! Store trait definition and persisted records
//!
//! The store is the single source of truth: the per-workflow event log,
//! workflow and activity state records, the idempotency key map, and durable
//! timers all live behind this trait. Implementations must be thread-safe and
//! must serialize event appends per workflow.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::Event;

/// Error type for store operations
///
/// `Unavailable` is transient and retryable by the caller's policy;
/// `Corrupted` is fatal and requires operator action. The store itself never
/// retries.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow record not found
    #[error("workflow {0} not found")]
    WorkflowNotFound(String),

    /// Activity record not found
    #[error("activity {0} not found")]
    ActivityNotFound(String),

    /// Timer record not found
    #[error("timer {timer_id} not found for workflow {workflow_id}")]
    TimerNotFound {
        workflow_id: String,
        timer_id: String,
    },

    /// Transient backend failure
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Unparseable or inconsistent persisted data
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

/// Lifecycle status of a workflow (also reused for activity records)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not yet running
    Pending,

    /// Currently executing
    Running,

    /// Finished successfully
    Completed,

    /// Finished with an error
    Failed,

    /// Canceled before completion
    Canceled,
}

impl WorkflowStatus {
    /// Check if the status is terminal (no further transitions are legal)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Current state of a workflow execution, keyed by `workflow_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub input: Value,
    pub output: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub last_event_seq: i64,
    pub task_queue: String,
}

impl WorkflowState {
    /// Create a new pending workflow state
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        input: Value,
        task_queue: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            status: WorkflowStatus::Pending,
            input,
            output: Value::Null,
            error: String::new(),
            start_time: Utc::now(),
            end_time: None,
            last_event_seq: 0,
            task_queue: task_queue.into(),
        }
    }

    /// Check if the workflow is still making progress
    pub fn is_running(&self) -> bool {
        matches!(self.status, WorkflowStatus::Pending | WorkflowStatus::Running)
    }

    /// Check if the workflow has finished
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    /// Execution duration: start to end if terminal, start to now otherwise
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end - self.start_time,
            None => Utc::now() - self.start_time,
        }
    }
}

/// Current state of an activity attempt group, keyed by `activity_id`
///
/// A `Completed` record is the idempotency cache for duplicate task
/// deliveries: its output is fixed and the status never regresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityState {
    pub activity_id: String,
    pub activity_name: String,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub input: Value,
    pub output: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub attempt: u32,
}

impl ActivityState {
    /// Create a new running activity state for the first observed attempt
    pub fn new(
        activity_id: impl Into<String>,
        activity_name: impl Into<String>,
        workflow_id: impl Into<String>,
        input: Value,
        attempt: u32,
    ) -> Self {
        Self {
            activity_id: activity_id.into(),
            activity_name: activity_name.into(),
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Running,
            input,
            output: Value::Null,
            error: String::new(),
            start_time: Utc::now(),
            end_time: None,
            attempt,
        }
    }
}

/// A durable timer persisted by the store
///
/// `fired` transitions false to true exactly once via
/// [`Store::mark_timer_fired`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub workflow_id: String,
    pub timer_id: String,
    pub fire_at: DateTime<Utc>,
    pub fired: bool,
}

/// Outcome of mapping an idempotency key to a workflow ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// The key was newly created for the supplied workflow ID
    Created,

    /// The key already mapped to this workflow ID
    Exists(String),
}

/// Store for workflow state, events, idempotency keys, and durable timers
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Upsert the full workflow state record
    ///
    /// Implementations maintain a status index (status -> set of workflow
    /// IDs) so that [`Store::list_workflows`] can read by status.
    async fn save_workflow_state(&self, state: &WorkflowState) -> Result<(), StoreError>;

    /// Read the workflow state record
    async fn get_workflow_state(&self, workflow_id: &str) -> Result<WorkflowState, StoreError>;

    /// Append an event to the workflow's log, assigning the next sequence
    ///
    /// Appends are serialized per workflow: the assigned sequence is strictly
    /// increasing and gapless, starting at 1. The owning workflow state's
    /// `last_event_seq` is updated in the same atomic step. Returns the event
    /// with its assigned sequence.
    async fn append_event(&self, event: Event) -> Result<Event, StoreError>;

    /// All events for a workflow, ordered by sequence
    ///
    /// An unknown workflow yields an empty list, not an error.
    async fn get_events(&self, workflow_id: &str) -> Result<Vec<Event>, StoreError>;

    /// Events with sequence strictly greater than `since`, ordered
    async fn get_events_since(
        &self,
        workflow_id: &str,
        since: i64,
    ) -> Result<Vec<Event>, StoreError>;

    /// Upsert the full activity state record
    async fn save_activity_state(&self, state: &ActivityState) -> Result<(), StoreError>;

    /// Read the activity state record
    async fn get_activity_state(&self, activity_id: &str) -> Result<ActivityState, StoreError>;

    /// List workflows, optionally filtered by status, in stable order
    /// (start time, then workflow ID)
    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowState>, StoreError>;

    /// Remove the workflow state, its events, its activity states, and its
    /// timer records
    async fn delete_workflow(&self, workflow_id: &str) -> Result<(), StoreError>;

    /// Atomically map an idempotency key to a workflow ID
    ///
    /// Create-if-absent: when the key already exists the existing workflow ID
    /// is returned and no state changes.
    async fn map_idempotency_key_to_workflow(
        &self,
        key: &str,
        workflow_id: &str,
    ) -> Result<IdempotencyOutcome, StoreError>;

    /// Look up the workflow ID for an idempotency key, if present
    async fn get_workflow_id_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Persist a durable timer; a no-op if the (workflow, timer) pair exists
    async fn schedule_timer(
        &self,
        workflow_id: &str,
        timer_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// All unfired timers with `fire_at <= now`
    async fn list_due_timers(&self, now: DateTime<Utc>) -> Result<Vec<TimerRecord>, StoreError>;

    /// Atomically flip a timer's fired flag from false to true
    ///
    /// Returns true exactly once per record across any number of concurrent
    /// callers.
    async fn mark_timer_fired(
        &self,
        workflow_id: &str,
        timer_id: &str,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_is_terminal() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_workflow_state_helpers() {
        let mut state = WorkflowState::new("wf-1", "order", json!({"n": 1}), "default");
        assert!(state.is_running());
        assert!(!state.is_complete());

        state.status = WorkflowStatus::Completed;
        state.end_time = Some(state.start_time + Duration::seconds(2));
        assert!(!state.is_running());
        assert!(state.is_complete());
        assert_eq!(state.duration(), Duration::seconds(2));
    }

    #[test]
    fn test_workflow_state_round_trip() {
        let state = WorkflowState::new("wf-1", "order", json!({"n": 1}), "default");
        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: WorkflowState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(state, decoded);
    }

    #[test]
    fn test_activity_state_round_trip() {
        let mut state = ActivityState::new("act-1", "echo", "wf-1", json!("hi"), 1);
        state.status = WorkflowStatus::Completed;
        state.output = json!("hi");
        state.end_time = Some(Utc::now());

        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: ActivityState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(state, decoded);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_value(WorkflowStatus::Canceled).unwrap(),
            json!("canceled")
        );
        assert_eq!(WorkflowStatus::Running.to_string(), "running");
    }
}
