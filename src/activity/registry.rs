//! Activity registry
//!
//! Maps activity names to their executor, timeout, and retry policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::definition::Activity;
use crate::reliability::RetryPolicy;

/// Default activity timeout when none is configured
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Metadata attached to a registered activity
#[derive(Debug, Clone)]
pub struct ActivityInfo {
    /// Registered name; filled in at registration time
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Maximum execution time per attempt
    pub timeout: Duration,

    /// Retry behavior for failed attempts
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            timeout: DEFAULT_ACTIVITY_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ActivityInfo {
    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// A registered activity with its metadata
pub struct Registration {
    pub activity: Arc<dyn Activity>,
    pub info: ActivityInfo,
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Name missing on registration
    #[error("activity name cannot be empty")]
    EmptyName,

    /// Duplicate registration
    #[error("activity {0} already registered")]
    AlreadyRegistered(String),

    /// Lookup miss
    #[error("activity {0} not found")]
    NotFound(String),
}

/// Name-keyed activity dispatch table
pub struct ActivityRegistry {
    activities: RwLock<HashMap<String, Arc<Registration>>>,
}

impl ActivityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            activities: RwLock::new(HashMap::new()),
        }
    }

    /// Register an activity under a name
    ///
    /// A zero timeout falls back to the 30 second default.
    pub fn register(
        &self,
        name: &str,
        activity: Arc<dyn Activity>,
        mut info: ActivityInfo,
    ) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let mut activities = self.activities.write();
        if activities.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }

        info.name = name.to_string();
        if info.timeout == Duration::ZERO {
            info.timeout = DEFAULT_ACTIVITY_TIMEOUT;
        }

        activities.insert(name.to_string(), Arc::new(Registration { activity, info }));
        Ok(())
    }

    /// Look up an activity by name
    pub fn get(&self, name: &str) -> Result<Arc<Registration>, RegistryError> {
        self.activities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All registered activity names
    pub fn list(&self) -> Vec<String> {
        self.activities.read().keys().cloned().collect()
    }
}

impl Default for ActivityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activities", &self.list())
            .finish()
    }
}
