//! Error types for supervisor operations.

use thiserror::Error;

/// Errors surfaced by the supervisor to its host.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The supervisor was used before `initialize` (or after `shutdown`).
    #[error("task supervisor is not initialized")]
    NotInitialized,
    /// `initialize` was called twice without a `shutdown` in between.
    #[error("task supervisor is already initialized")]
    AlreadyInitialized,
    /// No factory is registered for a task type.
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
    /// Configuration rejected with context.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A task factory failed to build its task body.
    #[error("failed to create task `{type_name}`: {source}")]
    TaskCreation {
        /// Task type being instantiated.
        type_name: String,
        /// Factory error.
        #[source]
        source: anyhow::Error,
    },
    /// The OS refused to start a thread.
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Returned by a task body whose runtime environment is gone.
///
/// The execution is not counted as a failure: the slot is dropped and the SLA
/// loop restores it later if the task is still registered.
#[derive(Debug, Error)]
#[error("task environment unavailable: {reason}")]
pub struct TaskUnavailable {
    /// Why the environment is unreachable.
    pub reason: String,
}

impl TaskUnavailable {
    /// Build the error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Application-facing result using anyhow for task bodies and factories.
pub type AppResult<T> = Result<T, anyhow::Error>;
