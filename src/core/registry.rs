//! Registry mapping task type names to factories.
//!
//! Hosts register one factory per task type; manifests then name types and
//! the registry builds the bodies. Nothing here inspects types at runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::{AppResult, SupervisorError};
use super::executor::TaskBody;
use crate::config::TaskConfig;

type Factory = Box<dyn Fn(&TaskConfig) -> AppResult<Arc<dyn TaskBody>> + Send + Sync>;

/// Task factories keyed by type name.
#[derive(Default)]
pub struct TaskRegistry {
    factories: HashMap<String, Factory>,
}

impl TaskRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `type_name`.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&TaskConfig) -> AppResult<Arc<dyn TaskBody>> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Box::new(factory));
        self
    }

    /// Whether a factory exists for `type_name`.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no factory is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build the body for `config`.
    ///
    /// # Errors
    ///
    /// `UnknownTaskType` when no factory matches, `TaskCreation` when the
    /// factory fails.
    pub fn instantiate(&self, config: &TaskConfig) -> Result<Arc<dyn TaskBody>, SupervisorError> {
        let factory = self
            .factories
            .get(&config.type_name)
            .ok_or_else(|| SupervisorError::UnknownTaskType(config.type_name.clone()))?;
        factory(config).map_err(|source| SupervisorError::TaskCreation {
            type_name: config.type_name.clone(),
            source,
        })
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("TaskRegistry").field("types", &names).finish()
    }
}
