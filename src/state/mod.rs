//! Event log and state persistence
//!
//! The store owns all durable records: the append-only per-workflow event
//! log, workflow and activity state, the idempotency key map, and durable
//! timers. Everything else in the engine coordinates through it.

mod event;
mod memory;
mod store;

pub use event::{
    event_data, ActivityCompletedData, ActivityFailedData, ActivityRetryingData,
    ActivityScheduledData, ActivityStartedData, Event, EventType, TimerFiredData,
    TimerScheduledData, WorkflowCompletedData, WorkflowFailedData, WorkflowStartedData,
};
pub use memory::InMemoryStore;
pub use store::{
    ActivityState, IdempotencyOutcome, Store, StoreError, TimerRecord, WorkflowState,
    WorkflowStatus,
};
