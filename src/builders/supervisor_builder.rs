//! Register every task of a manifest through a factory registry.

use tracing::info;

use crate::config::TaskManifest;
use crate::core::{Supervisor, SupervisorError, TaskHandle, TaskRegistry};

/// Validate `manifest`, build each task body through `registry` and register
/// it with `supervisor`, in manifest order.
///
/// Stops at the first failure; tasks registered before it stay registered
/// and their handles are lost, so callers normally treat the error as fatal
/// and shut the supervisor down.
///
/// # Errors
///
/// `InvalidConfig` for a manifest that fails validation, `UnknownTaskType` /
/// `TaskCreation` from the registry, and any error of
/// [`Supervisor::register_task`].
pub fn register_manifest(
    supervisor: &Supervisor,
    registry: &TaskRegistry,
    manifest: &TaskManifest,
) -> Result<Vec<TaskHandle>, SupervisorError> {
    manifest
        .validate()
        .map_err(|e| SupervisorError::InvalidConfig(format!("manifest invalid: {e}")))?;

    let mut handles = Vec::with_capacity(manifest.tasks.len());
    for config in &manifest.tasks {
        let body = registry.instantiate(config)?;
        let mut config = config.clone();
        config.sort_windows();
        handles.push(supervisor.register_task(body, config)?);
    }

    info!(tasks = handles.len(), "Manifest registered");
    Ok(handles)
}
