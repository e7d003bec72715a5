use crate::execution_store::JobParameters;
use crate::schema_target::SchemaTarget;
use anyhow::{bail, Result};
use serde::Serialize;

/// Identifies an execution started through a [`Launcher`]. Ids are only
/// unique within a schema target, so the target travels with the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExecutionHandle {
    pub target: String,
    pub execution_id: i64,
    pub job_name: String,
}

impl ExecutionHandle {
    pub fn new(target: impl Into<String>, execution_id: i64, job_name: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            execution_id,
            job_name: job_name.into(),
        }
    }
}

/// Dispatches the processes that actually run jobs.
///
/// `stop` delivers a signal; it does not wait for the execution to end.
pub trait Launcher: Send + Sync {
    /// Whether executions of `job_name` are dispatched by this launcher.
    fn manages(&self, job_name: &str) -> bool;

    fn start(
        &self,
        target: &SchemaTarget,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<ExecutionHandle>;

    fn stop(&self, handle: &ExecutionHandle) -> Result<()>;

    /// Starts a new execution of the same instance as `handle`.
    fn restart(
        &self,
        handle: &ExecutionHandle,
        parameters: &JobParameters,
    ) -> Result<ExecutionHandle>;

    fn abandon(&self, handle: &ExecutionHandle) -> Result<()>;
}

/// Launcher for deployments where executions are dispatched elsewhere.
/// Lifecycle changes are applied to the stored records only.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnmanagedLauncher;

impl Launcher for UnmanagedLauncher {
    fn manages(&self, _job_name: &str) -> bool {
        false
    }

    fn start(
        &self,
        _target: &SchemaTarget,
        job_name: &str,
        _parameters: &JobParameters,
    ) -> Result<ExecutionHandle> {
        bail!("No launcher is configured for job {}", job_name)
    }

    fn stop(&self, _handle: &ExecutionHandle) -> Result<()> {
        Ok(())
    }

    fn restart(
        &self,
        handle: &ExecutionHandle,
        _parameters: &JobParameters,
    ) -> Result<ExecutionHandle> {
        bail!("No launcher is configured for job {}", handle.job_name)
    }

    fn abandon(&self, _handle: &ExecutionHandle) -> Result<()> {
        Ok(())
    }
}
