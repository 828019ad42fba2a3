//! Fluent builder for step-based workflows
//!
//! Composes a workflow out of declarative steps without hand-writing a
//! `Workflow` impl. Steps thread the previous result forward the way a
//! shell pipeline does; `parallel` fans out and joins.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use serde_json::Value;

use super::definition::{Definition, Workflow, WorkflowError, WorkflowOptions};
use crate::engine::WorkflowContext;

/// A single step in a built workflow
#[derive(Debug, Clone)]
pub enum Step {
    /// Schedule an activity and wait for its result
    Activity {
        name: String,
        input: Value,
        activity_id: Option<String>,
        timeout: Option<Duration>,
    },

    /// Wait on a durable timer
    Sleep(Duration),

    /// Run steps one after another, threading the last result
    Sequence(Vec<Step>),

    /// Run steps concurrently and collect their results in order
    Parallel(Vec<Step>),
}

impl Step {
    /// Shorthand for an activity step
    pub fn activity(name: impl Into<String>, input: Value) -> Self {
        Self::Activity {
            name: name.into(),
            input,
            activity_id: None,
            timeout: None,
        }
    }

    /// Shorthand for an activity step with a stable ID
    pub fn activity_with_id(
        name: impl Into<String>,
        input: Value,
        activity_id: impl Into<String>,
    ) -> Self {
        Self::Activity {
            name: name.into(),
            input,
            activity_id: Some(activity_id.into()),
            timeout: None,
        }
    }
}

fn run_step(
    ctx: WorkflowContext,
    step: Step,
) -> BoxFuture<'static, Result<Value, WorkflowError>> {
    Box::pin(async move {
        match step {
            Step::Activity {
                name,
                input,
                activity_id,
                timeout,
            } => {
                let future = match activity_id {
                    Some(id) => ctx.execute_activity_with_id(&name, input, &id).await,
                    None => ctx.execute_activity(&name, input).await,
                };
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, future.get()).await {
                        Ok(result) => result,
                        Err(_) => Err(WorkflowError::new(format!(
                            "activity {name} timed out after {limit:?}"
                        ))),
                    },
                    None => future.get().await,
                }
            }
            Step::Sleep(duration) => {
                ctx.sleep(duration).await.get().await?;
                Ok(Value::Null)
            }
            Step::Sequence(steps) => {
                let mut last = Value::Null;
                for step in steps {
                    last = run_step(ctx.clone(), step).await?;
                }
                Ok(last)
            }
            Step::Parallel(steps) => {
                let branches = steps.into_iter().map(|step| run_step(ctx.clone(), step));
                let mut values = Vec::new();
                for result in join_all(branches).await {
                    match result {
                        Ok(value) => values.push(value),
                        Err(error) => {
                            return Err(WorkflowError::new(format!(
                                "parallel step failed: {error}"
                            )))
                        }
                    }
                }
                Ok(Value::Array(values))
            }
        }
    })
}

struct StepWorkflow {
    steps: Vec<Step>,
}

#[async_trait::async_trait]
impl Workflow for StepWorkflow {
    async fn execute(&self, ctx: WorkflowContext, _input: Value) -> Result<Value, WorkflowError> {
        let mut last = Value::Null;
        for step in &self.steps {
            last = run_step(ctx.clone(), step.clone()).await?;
        }
        Ok(last)
    }
}

/// Fluent workflow construction
///
/// # Example
///
/// ```ignore
/// let definition = WorkflowBuilder::new("enrich-order")
///     .activity("fetch", json!({"order": 1}))
///     .parallel(vec![
///         Step::activity("score", json!({})),
///         Step::activity("classify", json!({})),
///     ])
///     .sleep(Duration::from_secs(1))
///     .build();
/// ```
pub struct WorkflowBuilder {
    name: String,
    description: String,
    version: String,
    steps: Vec<Step>,
    options: WorkflowOptions,
}

impl WorkflowBuilder {
    /// Start building a workflow with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: "1.0".to_string(),
            steps: Vec::new(),
            options: WorkflowOptions::default(),
        }
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the task queue activities are dispatched to
    pub fn task_queue(mut self, queue: impl Into<String>) -> Self {
        self.options.task_queue = queue.into();
        self
    }

    /// Set the overall execution timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.execution_timeout = Some(timeout);
        self
    }

    /// Add an activity step
    pub fn activity(mut self, name: impl Into<String>, input: Value) -> Self {
        self.steps.push(Step::activity(name, input));
        self
    }

    /// Add an activity step with a stable activity ID
    pub fn activity_with_id(
        mut self,
        name: impl Into<String>,
        input: Value,
        activity_id: impl Into<String>,
    ) -> Self {
        self.steps.push(Step::activity_with_id(name, input, activity_id));
        self
    }

    /// Add an activity step with a wait timeout
    pub fn activity_with_timeout(
        mut self,
        name: impl Into<String>,
        input: Value,
        timeout: Duration,
    ) -> Self {
        self.steps.push(Step::Activity {
            name: name.into(),
            input,
            activity_id: None,
            timeout: Some(timeout),
        });
        self
    }

    /// Add a durable sleep step
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Sleep(duration));
        self
    }

    /// Add a parallel fan-out step
    pub fn parallel(mut self, steps: Vec<Step>) -> Self {
        self.steps.push(Step::Parallel(steps));
        self
    }

    /// Add a nested sequence step
    pub fn sequence(mut self, steps: Vec<Step>) -> Self {
        self.steps.push(Step::Sequence(steps));
        self
    }

    /// Build the final workflow definition
    pub fn build(self) -> Definition {
        Definition {
            name: self.name,
            description: self.description,
            version: self.version,
            workflow: Arc::new(StepWorkflow { steps: self.steps }),
            options: self.options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_metadata() {
        let def = WorkflowBuilder::new("enrich")
            .description("enrichment pipeline")
            .version("2.1")
            .task_queue("enrichment")
            .timeout(Duration::from_secs(600))
            .activity("fetch", json!({"id": 1}))
            .build();

        assert_eq!(def.name, "enrich");
        assert_eq!(def.description, "enrichment pipeline");
        assert_eq!(def.version, "2.1");
        assert_eq!(def.options.task_queue, "enrichment");
        assert_eq!(def.options.execution_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_step_shorthands() {
        let step = Step::activity_with_id("echo", json!("hi"), "a1");
        match step {
            Step::Activity {
                name, activity_id, ..
            } => {
                assert_eq!(name, "echo");
                assert_eq!(activity_id.as_deref(), Some("a1"));
            }
            _ => panic!("expected activity step"),
        }
    }
}
