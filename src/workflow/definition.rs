//! Workflow trait definition and registration metadata

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::WorkflowContext;
use crate::reliability::RetryPolicy;

/// Error type for workflow failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    /// Error message
    pub message: String,

    /// Error code for programmatic handling
    pub code: Option<String>,

    /// Whether this error is retryable
    pub retryable: bool,
}

impl WorkflowError {
    /// Create a new workflow error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

/// A deterministic program that orchestrates activities and timers
///
/// Workflow code must be deterministic with respect to the decisions it
/// makes: the engine re-executes it after a crash, and safety comes from
/// stable activity IDs plus cached activity results, not from replaying a
/// decision log. Anything non-deterministic belongs in an activity.
///
/// # Example
///
/// ```ignore
/// struct Greet;
///
/// #[async_trait]
/// impl Workflow for Greet {
///     async fn execute(
///         &self,
///         ctx: WorkflowContext,
///         input: Value,
///     ) -> Result<Value, WorkflowError> {
///         let future = ctx
///             .execute_activity_with_id("greet", input, "greet-1")
///             .await;
///         future.get().await
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Run the workflow with the given context and input
    async fn execute(&self, ctx: WorkflowContext, input: Value) -> Result<Value, WorkflowError>;
}

/// Function-based workflow implementation
///
/// # Example
///
/// ```ignore
/// let workflow = WorkflowFn::new(|ctx, input| async move {
///     ctx.execute_activity("step", input).await.get().await
/// });
/// ```
pub struct WorkflowFn<F> {
    f: F,
}

impl<F, Fut> WorkflowFn<F>
where
    F: Fn(WorkflowContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
{
    /// Wrap an async function as a workflow
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Workflow for WorkflowFn<F>
where
    F: Fn(WorkflowContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
{
    async fn execute(&self, ctx: WorkflowContext, input: Value) -> Result<Value, WorkflowError> {
        (self.f)(ctx, input).await
    }
}

/// Execution options for a workflow definition
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Queue that this workflow's activity tasks are sent to
    pub task_queue: String,

    /// Maximum wall-clock time for a single execution
    pub execution_timeout: Option<Duration>,

    /// Retry behavior applied when no activity-level policy is set
    pub retry_policy: RetryPolicy,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            task_queue: "default".to_string(),
            execution_timeout: None,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// A named workflow with its metadata and options
#[derive(Clone)]
pub struct Definition {
    pub name: String,
    pub description: String,
    pub version: String,
    pub workflow: Arc<dyn Workflow>,
    pub options: WorkflowOptions,
}

impl Definition {
    /// Create a definition with default options
    pub fn new(name: impl Into<String>, workflow: Arc<dyn Workflow>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: "1.0".to_string(),
            workflow,
            options: WorkflowOptions::default(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the options
    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }
}

impl std::fmt::Debug for Definition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("task_queue", &self.options.task_queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_builders() {
        let error = WorkflowError::new("boom").with_code("INTERNAL");
        assert_eq!(error.message, "boom");
        assert_eq!(error.code.as_deref(), Some("INTERNAL"));
        assert!(!error.retryable);

        let error = WorkflowError::retryable("try again");
        assert!(error.retryable);
    }

    #[test]
    fn test_workflow_error_round_trip() {
        let error = WorkflowError::new("boom").with_code("INTERNAL");
        let encoded = serde_json::to_string(&error).unwrap();
        let decoded: WorkflowError = serde_json::from_str(&encoded).unwrap();
        assert_eq!(error, decoded);
    }

    #[test]
    fn test_definition_defaults() {
        let workflow = Arc::new(WorkflowFn::new(|_ctx, input| async move { Ok(input) }));
        let def = Definition::new("order", workflow).with_description("order processing");

        assert_eq!(def.name, "order");
        assert_eq!(def.version, "1.0");
        assert_eq!(def.options.task_queue, "default");
        assert!(def.options.execution_timeout.is_none());
    }
}
