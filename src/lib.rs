//! # Stride
//!
//! A durable workflow orchestration engine for long-running, partially
//! failing compositions of external calls: LLM requests, tool invocations,
//! HTTP and database side effects.
//!
//! ## Features
//!
//! - **Event-sourced execution**: every state transition is persisted to an
//!   append-only per-workflow event log, so workflows can be resumed,
//!   inspected, and streamed after process crashes
//! - **Idempotent activities**: stable activity IDs plus cached results make
//!   duplicate deliveries and re-executed workflows safe
//! - **Automatic retries**: per-activity retry policies with exponential
//!   backoff and non-retryable error lists
//! - **Durable timers**: `sleep` survives restarts; a scanner fires due
//!   timers exactly once
//! - **Live event streams**: resumable, heartbeated SSE fan-out of the
//!   event log
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │   (starts/cancels workflows, drives workflow programs,      │
//! │    fires durable timers)                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                   │                          │
//!                   ▼                          ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │          Store           │   │            Queue             │
//! │  (event log, workflow /  │   │  (at-least-once task         │
//! │   activity state, timers,│   │   delivery with visibility   │
//! │   idempotency keys)      │   │   timeouts and DLQ)          │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                   ▲                          ▲
//!                   │                          │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Worker                              │
//! │   (executes activities with idempotency, timeout, retry,    │
//! │    and cancellation semantics)                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stride::prelude::*;
//!
//! let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
//! let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
//!
//! let activities = Arc::new(ActivityRegistry::new());
//! activities.register(
//!     "echo",
//!     Arc::new(ActivityFn::new(|_ctx, input| async move { Ok(input) })),
//!     ActivityInfo::default(),
//! )?;
//!
//! let workflows = Arc::new(WorkflowRegistry::new());
//! workflows.register(
//!     WorkflowBuilder::new("echo-flow")
//!         .activity("echo", serde_json::json!("hi"))
//!         .build(),
//! )?;
//!
//! let engine = Engine::new(EngineConfig::new(store.clone(), queue.clone(), workflows));
//! engine.start();
//!
//! let worker = Worker::new(queue, activities, store, WorkerConfig::default());
//! worker.start()?;
//!
//! let workflow_id = engine.start_workflow("echo-flow", serde_json::json!(null)).await?;
//! ```

pub mod activity;
pub mod engine;
pub mod queue;
pub mod reliability;
pub mod state;
pub mod stream;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        Activity, ActivityContext, ActivityError, ActivityFn, ActivityInfo, ActivityRegistry,
    };
    pub use crate::engine::{Engine, EngineConfig, StartWorkflowOptions, WorkflowContext};
    pub use crate::queue::{InMemoryQueue, Queue, QueueOptions, Task, TaskType};
    pub use crate::reliability::RetryPolicy;
    pub use crate::state::{
        Event, EventType, InMemoryStore, Store, StoreError, WorkflowState, WorkflowStatus,
    };
    pub use crate::stream::{stream_events, SseConfig};
    pub use crate::worker::{Worker, WorkerConfig};
    pub use crate::workflow::{
        Definition, Step, Workflow, WorkflowBuilder, WorkflowError, WorkflowFn, WorkflowFuture,
        WorkflowOptions, WorkflowRegistry,
    };
}

// Re-export key types at crate root
pub use activity::{
    Activity, ActivityContext, ActivityError, ActivityFn, ActivityInfo, ActivityRegistry,
};
pub use engine::{Engine, EngineConfig, EngineError, StartWorkflowOptions, WorkflowContext};
pub use queue::{InMemoryQueue, Queue, QueueError, QueueOptions, Task, TaskType};
pub use reliability::RetryPolicy;
pub use state::{
    ActivityState, Event, EventType, IdempotencyOutcome, InMemoryStore, Store, StoreError,
    TimerRecord, WorkflowState, WorkflowStatus,
};
pub use stream::{stream_events, SseConfig, SseError};
pub use worker::{Worker, WorkerConfig, WorkerError};
pub use workflow::{
    Definition, Step, Workflow, WorkflowBuilder, WorkflowError, WorkflowFn, WorkflowFuture,
    WorkflowOptions, WorkflowRegistry,
};
