//! Eventual results of scheduled activities and timers

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use super::definition::WorkflowError;

enum FutureState {
    Pending,
    Resolved(Value),
    Failed(WorkflowError),
}

struct FutureInner {
    id: String,
    state: Mutex<FutureState>,
    notify: Notify,
}

/// The eventual result of a scheduled activity or timer
///
/// Created Pending, transitions exactly once to Resolved or Failed, and
/// wakes every waiter on that transition. Clones share the same underlying
/// result.
#[derive(Clone)]
pub struct WorkflowFuture {
    inner: Arc<FutureInner>,
}

impl WorkflowFuture {
    /// Create a pending future for the given activity or timer ID
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FutureInner {
                id: id.into(),
                state: Mutex::new(FutureState::Pending),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a future that is already resolved
    pub fn resolved(id: impl Into<String>, value: Value) -> Self {
        let future = Self::new(id);
        future.resolve(value);
        future
    }

    /// Create a future that is already failed
    pub fn failed(id: impl Into<String>, error: WorkflowError) -> Self {
        let future = Self::new(id);
        future.fail(error);
        future
    }

    /// ID of the activity or timer this future tracks
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Non-blocking readiness check
    pub fn is_ready(&self) -> bool {
        !matches!(*self.inner.state.lock(), FutureState::Pending)
    }

    fn try_result(&self) -> Option<Result<Value, WorkflowError>> {
        match &*self.inner.state.lock() {
            FutureState::Pending => None,
            FutureState::Resolved(value) => Some(Ok(value.clone())),
            FutureState::Failed(error) => Some(Err(error.clone())),
        }
    }

    /// Wait until the future resolves or fails
    ///
    /// Cancellation is cooperative: the scheduling side fails pending futures
    /// when the workflow is canceled, and callers can additionally `select!`
    /// this against their own cancellation branch.
    pub async fn get(&self) -> Result<Value, WorkflowError> {
        loop {
            if let Some(result) = self.try_result() {
                return result;
            }

            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // The state may have transitioned between the check and the
            // waiter registration
            if let Some(result) = self.try_result() {
                return result;
            }
            notified.await;
        }
    }

    /// Resolve the future; the first transition wins
    pub(crate) fn resolve(&self, value: Value) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(*state, FutureState::Pending) {
            return false;
        }
        *state = FutureState::Resolved(value);
        drop(state);
        self.inner.notify.notify_waiters();
        true
    }

    /// Fail the future; the first transition wins
    pub(crate) fn fail(&self, error: WorkflowError) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(*state, FutureState::Pending) {
            return false;
        }
        *state = FutureState::Failed(error);
        drop(state);
        self.inner.notify.notify_waiters();
        true
    }
}

impl std::fmt::Debug for WorkflowFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowFuture")
            .field("id", &self.inner.id)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let future = WorkflowFuture::new("act-1");
        assert!(!future.is_ready());

        let waiter = future.clone();
        let handle = tokio::spawn(async move { waiter.get().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(future.resolve(json!("done")));

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, json!("done"));
        assert!(future.is_ready());
    }

    #[tokio::test]
    async fn test_fail_propagates_error() {
        let future = WorkflowFuture::new("act-1");
        assert!(future.fail(WorkflowError::new("boom")));

        let error = future.get().await.unwrap_err();
        assert_eq!(error.message, "boom");
    }

    #[tokio::test]
    async fn test_single_transition() {
        let future = WorkflowFuture::new("act-1");
        assert!(future.resolve(json!(1)));
        assert!(!future.resolve(json!(2)));
        assert!(!future.fail(WorkflowError::new("late")));

        assert_eq!(future.get().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_get_after_resolution() {
        let future = WorkflowFuture::resolved("act-1", json!(7));
        assert!(future.is_ready());
        assert_eq!(future.get().await.unwrap(), json!(7));
        // Repeated gets return the same value
        assert_eq!(future.get().await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_many_waiters_all_wake() {
        let future = WorkflowFuture::new("act-1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let waiter = future.clone();
            handles.push(tokio::spawn(async move { waiter.get().await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        future.resolve(json!("shared"));

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!("shared"));
        }
    }
}
