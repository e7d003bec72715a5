//! Temporary execution history databases seeded through the public API.

use chrono::{DateTime, Utc};
use execution_history::execution_store::{
    BatchStatus, ExecutionRepository, JobParameter, JobParameters, NewExecution, ParameterValue,
};
use execution_history::lifecycle::{JobLifecycleService, Launcher, LifecycleSettings};
use execution_history::schema_target::{SchemaTarget, SchemaTargetResolver};
use execution_history::{
    SqliteClient, SqliteExecutionReader, SqliteExecutionRepository, UnmanagedLauncher,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// A database file in a temporary directory with the tables of both
/// built-in targets created.
#[allow(dead_code)]
pub struct TestHistory {
    _dir: TempDir,
    pub client: SqliteClient,
    pub reader: Arc<SqliteExecutionReader>,
    pub repository: Arc<SqliteExecutionRepository>,
    pub targets: Vec<SchemaTarget>,
}

#[allow(dead_code)]
impl TestHistory {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let client = SqliteClient::open(dir.path().join("history.db")).unwrap();
        let reader = Arc::new(SqliteExecutionReader::new(client.clone()));
        let repository = Arc::new(SqliteExecutionRepository::new(client.clone(), 2500));
        let targets = SchemaTarget::builtin();
        for target in &targets {
            repository.ensure_schema(target).unwrap();
        }
        Self {
            _dir: dir,
            client,
            reader,
            repository,
            targets,
        }
    }

    pub fn target(&self, name: &str) -> &SchemaTarget {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .unwrap_or_else(|| panic!("no target {}", name))
    }

    pub fn resolver(&self) -> Arc<SchemaTargetResolver> {
        Arc::new(
            SchemaTargetResolver::new(self.targets.clone(), HashMap::new())
                .unwrap()
                .with_probe(self.reader.clone()),
        )
    }

    pub fn service(&self, settings: LifecycleSettings) -> JobLifecycleService {
        self.service_with_launcher(Arc::new(UnmanagedLauncher), settings)
    }

    pub fn service_with_launcher(
        &self,
        launcher: Arc<dyn Launcher>,
        settings: LifecycleSettings,
    ) -> JobLifecycleService {
        JobLifecycleService::new(
            self.reader.clone(),
            self.repository.clone(),
            self.resolver(),
            launcher,
            settings,
        )
    }

    /// Inserts an execution of `job_name`, one instance per job name. Terminal
    /// executions get an end time.
    pub fn insert(
        &self,
        target: &str,
        id: Option<i64>,
        job_name: &str,
        status: BatchStatus,
    ) -> i64 {
        self.insert_started(target, id, job_name, status, None)
    }

    /// Like [`TestHistory::insert`], with an explicit start time.
    pub fn insert_started(
        &self,
        target: &str,
        id: Option<i64>,
        job_name: &str,
        status: BatchStatus,
        start_time: Option<DateTime<Utc>>,
    ) -> i64 {
        let target = self.target(target);
        let parameters = JobParameters::new().with(
            "job",
            JobParameter::identifying(ParameterValue::String(job_name.to_string())),
        );
        let instance = self
            .repository
            .get_or_create_job_instance(target, job_name, &parameters)
            .unwrap();
        let mut execution = NewExecution::starting(instance.id, parameters);
        execution.id = id;
        execution.status = status;
        execution.start_time = start_time;
        if status.is_terminal() {
            execution.end_time = Some(Utc::now());
        }
        self.repository.insert_execution(target, &execution).unwrap()
    }
}
