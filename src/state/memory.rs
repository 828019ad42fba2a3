//! In-memory implementation of the store
//!
//! The reference adapter. All data lives behind a single `RwLock`, which
//! gives the per-workflow append serialization the contract requires: the
//! sequence assignment, the event insert, and the `last_event_seq` update
//! happen under one write lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::event::Event;
use super::store::{
    ActivityState, IdempotencyOutcome, Store, StoreError, TimerRecord, WorkflowState,
    WorkflowStatus,
};

#[derive(Default)]
struct Inner {
    workflows: HashMap<String, WorkflowState>,
    events: HashMap<String, Vec<Event>>,
    activities: HashMap<String, ActivityState>,
    idem_keys: HashMap<String, String>,
    timers: HashMap<String, HashMap<String, TimerRecord>>,
    status_index: HashMap<WorkflowStatus, Vec<String>>,
}

impl Inner {
    fn index_remove(&mut self, status: WorkflowStatus, workflow_id: &str) {
        if let Some(ids) = self.status_index.get_mut(&status) {
            ids.retain(|id| id != workflow_id);
        }
    }

    fn index_insert(&mut self, status: WorkflowStatus, workflow_id: &str) {
        let ids = self.status_index.entry(status).or_default();
        if !ids.iter().any(|id| id == workflow_id) {
            ids.push(workflow_id.to_string());
        }
    }
}

/// In-memory store
///
/// Primarily for tests and single-process deployments. Reads return owned
/// copies so callers can never alias store internals.
///
/// # Example
///
/// ```
/// use stride::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// ```
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of workflow records (for tests)
    pub fn workflow_count(&self) -> usize {
        self.inner.read().workflows.len()
    }

    /// Number of events across all workflows (for tests)
    pub fn event_count(&self) -> usize {
        self.inner.read().events.values().map(Vec::len).sum()
    }

    /// Up to `limit` events strictly after `since`, plus the next sequence to
    /// request (the last returned event's sequence, or `since` if none)
    pub fn get_events_window(
        &self,
        workflow_id: &str,
        since: i64,
        limit: usize,
    ) -> (Vec<Event>, i64) {
        let inner = self.inner.read();
        let Some(events) = inner.events.get(workflow_id) else {
            return (Vec::new(), since);
        };
        if limit == 0 {
            return (Vec::new(), since);
        }

        let mut window = Vec::with_capacity(limit);
        let mut next = since;
        for event in events {
            if event.sequence_num > since {
                next = event.sequence_num;
                window.push(event.clone());
                if window.len() >= limit {
                    break;
                }
            }
        }
        (window, next)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_workflow_state(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let previous_status = inner.workflows.get(&state.workflow_id).map(|w| w.status);
        if let Some(old_status) = previous_status {
            if old_status != state.status {
                inner.index_remove(old_status, &state.workflow_id);
            }
        }
        inner.index_insert(state.status, &state.workflow_id);
        inner
            .workflows
            .insert(state.workflow_id.clone(), state.clone());
        Ok(())
    }

    async fn get_workflow_state(&self, workflow_id: &str) -> Result<WorkflowState, StoreError> {
        self.inner
            .read()
            .workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))
    }

    async fn append_event(&self, mut event: Event) -> Result<Event, StoreError> {
        let mut inner = self.inner.write();
        let workflow_id = event.workflow_id.clone();
        let events = inner.events.entry(workflow_id.clone()).or_default();
        event.sequence_num = events.len() as i64 + 1;
        events.push(event.clone());

        let seq = event.sequence_num;
        if let Some(workflow) = inner.workflows.get_mut(&workflow_id) {
            workflow.last_event_seq = seq;
        }
        Ok(event)
    }

    async fn get_events(&self, workflow_id: &str) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .inner
            .read()
            .events
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_events_since(
        &self,
        workflow_id: &str,
        since: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.read();
        let Some(events) = inner.events.get(workflow_id) else {
            return Ok(Vec::new());
        };
        Ok(events
            .iter()
            .filter(|e| e.sequence_num > since)
            .cloned()
            .collect())
    }

    async fn save_activity_state(&self, state: &ActivityState) -> Result<(), StoreError> {
        self.inner
            .write()
            .activities
            .insert(state.activity_id.clone(), state.clone());
        Ok(())
    }

    async fn get_activity_state(&self, activity_id: &str) -> Result<ActivityState, StoreError> {
        self.inner
            .read()
            .activities
            .get(activity_id)
            .cloned()
            .ok_or_else(|| StoreError::ActivityNotFound(activity_id.to_string()))
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowState>, StoreError> {
        let inner = self.inner.read();
        let mut result: Vec<WorkflowState> = match status {
            Some(status) => inner
                .status_index
                .get(&status)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.workflows.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default(),
            None => inner.workflows.values().cloned().collect(),
        };

        result.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });
        Ok(result)
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(state) = inner.workflows.remove(workflow_id) {
            let status = state.status;
            inner.index_remove(status, workflow_id);
        }
        inner.events.remove(workflow_id);
        inner
            .activities
            .retain(|_, activity| activity.workflow_id != workflow_id);
        inner.timers.remove(workflow_id);
        Ok(())
    }

    async fn map_idempotency_key_to_workflow(
        &self,
        key: &str,
        workflow_id: &str,
    ) -> Result<IdempotencyOutcome, StoreError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.idem_keys.get(key) {
            return Ok(IdempotencyOutcome::Exists(existing.clone()));
        }
        inner
            .idem_keys
            .insert(key.to_string(), workflow_id.to_string());
        Ok(IdempotencyOutcome::Created)
    }

    async fn get_workflow_id_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().idem_keys.get(key).cloned())
    }

    async fn schedule_timer(
        &self,
        workflow_id: &str,
        timer_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let timers = inner.timers.entry(workflow_id.to_string()).or_default();
        if timers.contains_key(timer_id) {
            return Ok(());
        }
        timers.insert(
            timer_id.to_string(),
            TimerRecord {
                workflow_id: workflow_id.to_string(),
                timer_id: timer_id.to_string(),
                fire_at,
                fired: false,
            },
        );
        Ok(())
    }

    async fn list_due_timers(&self, now: DateTime<Utc>) -> Result<Vec<TimerRecord>, StoreError> {
        let inner = self.inner.read();
        let mut due: Vec<TimerRecord> = inner
            .timers
            .values()
            .flat_map(|timers| timers.values())
            .filter(|record| !record.fired && record.fire_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.fire_at.cmp(&b.fire_at));
        Ok(due)
    }

    async fn mark_timer_fired(
        &self,
        workflow_id: &str,
        timer_id: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let record = inner
            .timers
            .get_mut(workflow_id)
            .and_then(|timers| timers.get_mut(timer_id))
            .ok_or_else(|| StoreError::TimerNotFound {
                workflow_id: workflow_id.to_string(),
                timer_id: timer_id.to_string(),
            })?;

        if record.fired {
            return Ok(false);
        }
        record.fired = true;
        Ok(true)
    }
}
