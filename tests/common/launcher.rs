use anyhow::{anyhow, Result};
use chrono::Utc;
use execution_history::execution_store::{
    BatchStatus, ExecutionRepository, JobParameters, NewExecution,
};
use execution_history::lifecycle::{ExecutionHandle, Launcher};
use execution_history::{SchemaTarget, SqliteExecutionRepository};
use std::sync::{Arc, Mutex};

/// Launcher for the `import` job. Started executions are written to the
/// store as STARTED; stop signals are only recorded, so the executions keep
/// running until a test ends them.
#[allow(dead_code)]
pub struct RecordingLauncher {
    repository: Arc<SqliteExecutionRepository>,
    targets: Vec<SchemaTarget>,
    pub stops: Mutex<Vec<ExecutionHandle>>,
}

#[allow(dead_code)]
impl RecordingLauncher {
    pub fn new(repository: Arc<SqliteExecutionRepository>, targets: Vec<SchemaTarget>) -> Self {
        Self {
            repository,
            targets,
            stops: Mutex::new(Vec::new()),
        }
    }

    pub fn stopped(&self) -> Vec<ExecutionHandle> {
        self.stops.lock().unwrap().clone()
    }
}

impl Launcher for RecordingLauncher {
    fn manages(&self, job_name: &str) -> bool {
        job_name == "import"
    }

    fn start(
        &self,
        target: &SchemaTarget,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<ExecutionHandle> {
        let instance = self
            .repository
            .get_or_create_job_instance(target, job_name, parameters)?;
        let mut execution = NewExecution::starting(instance.id, parameters.clone());
        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());
        let id = self.repository.insert_execution(target, &execution)?;
        Ok(ExecutionHandle::new(target.name.clone(), id, job_name))
    }

    fn stop(&self, handle: &ExecutionHandle) -> Result<()> {
        self.stops.lock().unwrap().push(handle.clone());
        Ok(())
    }

    fn restart(
        &self,
        handle: &ExecutionHandle,
        parameters: &JobParameters,
    ) -> Result<ExecutionHandle> {
        let target = self
            .targets
            .iter()
            .find(|t| t.name == handle.target)
            .ok_or_else(|| anyhow!("unknown target {}", handle.target))?;
        self.start(target, &handle.job_name, parameters)
    }

    fn abandon(&self, _handle: &ExecutionHandle) -> Result<()> {
        Ok(())
    }
}
