//! Activity trait definition

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ActivityContext;

/// Error type for activity failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether this error is retryable
    ///
    /// Non-retryable errors fail the activity without further attempts,
    /// regardless of how many attempts the retry policy allows.
    pub retryable: bool,

    /// Additional error details (for debugging)
    pub details: Option<Value>,
}

impl ActivityError {
    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// A unit of non-deterministic work executed by a worker
///
/// Activities interact with external systems (LLM calls, HTTP, databases)
/// and may fail and be retried. Input and output are opaque JSON values;
/// activities deserialize per their own schema.
///
/// Activities must be idempotent per activity ID: the worker caches a
/// completed result and duplicate deliveries return it without re-execution.
///
/// # Example
///
/// ```ignore
/// struct SendEmail;
///
/// #[async_trait]
/// impl Activity for SendEmail {
///     async fn execute(
///         &self,
///         ctx: ActivityContext,
///         input: Value,
///     ) -> Result<Value, ActivityError> {
///         // send email...
///         Ok(json!({"message_id": "m-1"}))
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Execute the activity
    ///
    /// The context provides attempt information, an event emitter for
    /// streaming sub-events, and cancellation detection.
    ///
    /// # Errors
    ///
    /// Return [`ActivityError::retryable`] for transient failures and
    /// [`ActivityError::non_retryable`] for permanent ones.
    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

/// Function-based activity implementation
///
/// # Example
///
/// ```ignore
/// let echo = ActivityFn::new(|_ctx, input| async move { Ok(input) });
/// registry.register("echo", Arc::new(echo), ActivityInfo::default())?;
/// ```
pub struct ActivityFn<F> {
    f: F,
}

impl<F, Fut> ActivityFn<F>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    /// Wrap an async function as an activity
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Activity for ActivityFn<F>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        (self.f)(ctx, input).await
    }
}
