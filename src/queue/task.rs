//! Task payloads delivered through the queue
//!
//! Tasks are ephemeral: the queue owns delivery, while the authoritative
//! durable record of the work lives in the event log and activity states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of work a task carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Activity,
    Workflow,
}

/// A unit of work to be executed by a worker
///
/// `attempts` counts deliveries: the queue increments it on every dequeue,
/// including redeliveries after a visibility timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub activity_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub activity_name: String,
    pub input: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub enqueue_time: DateTime<Utc>,
    pub attempts: u32,
}

impl Task {
    /// Create a new task with a generated ID
    pub fn new(task_type: TaskType, workflow_id: impl Into<String>, input: Value) -> Self {
        Self {
            id: format!("task-{}", Uuid::now_v7()),
            task_type,
            workflow_id: workflow_id.into(),
            activity_id: String::new(),
            activity_name: String::new(),
            input,
            metadata: Map::new(),
            enqueue_time: Utc::now(),
            attempts: 0,
        }
    }

    /// Attach the activity identity this task executes
    pub fn with_activity(
        mut self,
        activity_id: impl Into<String>,
        activity_name: impl Into<String>,
    ) -> Self {
        self.activity_id = activity_id.into();
        self.activity_name = activity_name.into();
        self
    }
}
