//! Workflow registry

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::definition::Definition;

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Name missing on registration
    #[error("workflow name cannot be empty")]
    EmptyName,

    /// Duplicate registration
    #[error("workflow {0} already registered")]
    AlreadyRegistered(String),

    /// Lookup miss
    #[error("workflow {0} not found")]
    NotFound(String),
}

/// Name-keyed table of workflow definitions
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Arc<Definition>>>,
}

impl WorkflowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Register a workflow definition under its name
    pub fn register(&self, definition: Definition) -> Result<(), RegistryError> {
        if definition.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let mut workflows = self.workflows.write();
        if workflows.contains_key(&definition.name) {
            return Err(RegistryError::AlreadyRegistered(definition.name));
        }
        workflows.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> Result<Arc<Definition>, RegistryError> {
        self.workflows
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All registered workflow names
    pub fn list(&self) -> Vec<String> {
        self.workflows.read().keys().cloned().collect()
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.list())
            .finish()
    }
}
