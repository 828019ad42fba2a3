//! Workflow events and the event-log vocabulary
//!
//! Events form the append-only, per-workflow execution history. They are
//! assigned a strictly increasing `sequence_num` by the store at append time
//! and are immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Types of workflow events (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Workflow was started with the given input
    WorkflowStarted,

    /// Workflow completed successfully
    WorkflowCompleted,

    /// Workflow failed with an error
    WorkflowFailed,

    /// Workflow was canceled
    WorkflowCanceled,

    /// Activity was scheduled for execution
    ActivityScheduled,

    /// Activity execution started on a worker
    ActivityStarted,

    /// Activity completed successfully
    ActivityCompleted,

    /// Activity attempt failed
    ActivityFailed,

    /// Activity task was requeued for another attempt
    ActivityRetrying,

    /// Durable timer was scheduled
    TimerScheduled,

    /// Durable timer fired
    TimerFired,

    /// External signal was received
    SignalReceived,

    /// Agent planned its next step
    AgentStepPlanned,

    /// Agent invoked a tool
    AgentToolCalled,

    /// Agent received a tool result
    AgentToolResult,

    /// Agent produced a message
    AgentMessage,
}

impl EventType {
    /// Wire name of the event type, as used in the JSON `type` field and in
    /// SSE `event:` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::WorkflowCanceled => "workflow_canceled",
            Self::ActivityScheduled => "activity_scheduled",
            Self::ActivityStarted => "activity_started",
            Self::ActivityCompleted => "activity_completed",
            Self::ActivityFailed => "activity_failed",
            Self::ActivityRetrying => "activity_retrying",
            Self::TimerScheduled => "timer_scheduled",
            Self::TimerFired => "timer_fired",
            Self::SignalReceived => "signal_received",
            Self::AgentStepPlanned => "agent_step_planned",
            Self::AgentToolCalled => "agent_tool_called",
            Self::AgentToolResult => "agent_tool_result",
            Self::AgentMessage => "agent_message",
        }
    }

    /// Check if this event type terminates a workflow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted | Self::WorkflowFailed | Self::WorkflowCanceled
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry in a workflow's event log
///
/// `sequence_num` is zero until the event is appended; the store assigns the
/// next number in the workflow's sequence (starting at 1, gapless).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub workflow_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub sequence_num: i64,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    /// Create a new event with a generated ID and the current UTC timestamp
    pub fn new(
        workflow_id: impl Into<String>,
        event_type: EventType,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::now_v7()),
            workflow_id: workflow_id.into(),
            event_type,
            timestamp: Utc::now(),
            sequence_num: 0,
            data,
        }
    }

    /// Check if this event terminates its workflow
    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    /// Convenience accessor for a string field in the event data
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Serialize a typed payload into an event data map
///
/// Payloads that do not serialize to a JSON object yield an empty map.
pub fn event_data<T: Serialize>(payload: &T) -> Map<String, Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Data for `workflow_started` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStartedData {
    pub workflow_name: String,
    pub input: Value,
    pub task_queue: String,
}

/// Data for `workflow_completed` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCompletedData {
    pub output: Value,
}

/// Data for `workflow_failed` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFailedData {
    pub error: String,
}

/// Data for `activity_scheduled` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityScheduledData {
    pub activity_id: String,
    pub activity_name: String,
    pub input: Value,
}

/// Data for `activity_started` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStartedData {
    pub activity_id: String,
    pub activity_name: String,
}

/// Data for `activity_completed` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityCompletedData {
    pub activity_id: String,
    pub output: Value,
}

/// Data for `activity_failed` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityFailedData {
    pub activity_id: String,
    pub error: String,
    pub attempt: u32,
}

/// Data for `activity_retrying` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRetryingData {
    pub activity_id: String,
    pub attempt: u32,
    pub backoff_ms: u64,
}

/// Data for `timer_scheduled` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerScheduledData {
    pub timer_id: String,
    pub fire_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Data for `timer_fired` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerFiredData {
    pub timer_id: String,
}
