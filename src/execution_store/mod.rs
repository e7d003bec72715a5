//! Execution history storage.
//!
//! Reads go through [`ExecutionReader`], which is read-only by contract: its
//! mutating operations always fail with [`ReadOnlyViolation`]. Writes go
//! through the separate [`ExecutionRepository`]. Both wrap the same
//! [`SqliteClient`](crate::sqlite_persistence::SqliteClient).

mod models;
mod queries;
mod schema;
mod sqlite_execution_reader;
mod sqlite_execution_repository;

pub use models::*;
pub use schema::{tables_for, CURRENT_TABLES, LEGACY_TABLES};
pub use sqlite_execution_reader::SqliteExecutionReader;
pub use sqlite_execution_repository::{SqliteExecutionRepository, DEFAULT_MAX_VARCHAR_LENGTH};

use crate::schema_target::SchemaTarget;
use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Returned by every mutating operation of an [`ExecutionReader`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} is not supported: the execution reader is read only")]
pub struct ReadOnlyViolation {
    pub operation: &'static str,
}

/// An update matched no row: the record changed since it was read, or is gone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Execution {id} in schema target {target} was modified concurrently (expected version {expected_version})")]
pub struct StaleRecord {
    pub id: i64,
    pub target: String,
    pub expected_version: i64,
}

pub trait ExecutionReader: Send + Sync {
    /// Page of executions matching `filter`, newest first, starting at
    /// ordinal `start`.
    fn list_executions(
        &self,
        target: &SchemaTarget,
        filter: &ExecutionFilter,
        start: u64,
        count: u64,
        with_step_count: bool,
    ) -> Result<Vec<ExecutionRecord>>;

    fn count_executions(&self, target: &SchemaTarget, filter: &ExecutionFilter) -> Result<u64>;

    fn get_execution(&self, target: &SchemaTarget, execution_id: i64)
        -> Result<Option<ExecutionRecord>>;

    fn get_job_instance(&self, target: &SchemaTarget, instance_id: i64)
        -> Result<Option<JobInstance>>;

    /// Most recent instance of a job name.
    fn latest_job_instance(&self, target: &SchemaTarget, name: &str)
        -> Result<Option<JobInstance>>;

    fn executions_for_instance(
        &self,
        target: &SchemaTarget,
        instance_id: i64,
    ) -> Result<Vec<ExecutionRecord>>;

    fn last_execution_for_instance(
        &self,
        target: &SchemaTarget,
        instance_id: i64,
    ) -> Result<Option<ExecutionRecord>>;

    /// Executions that have not ended, optionally restricted to a job name.
    fn running_executions(
        &self,
        target: &SchemaTarget,
        name: Option<&str>,
    ) -> Result<Vec<ExecutionRecord>>;

    /// Distinct job names, sorted.
    fn job_names(&self, target: &SchemaTarget) -> Result<Vec<String>>;

    /// Job execution ids launched by each of the given task executions.
    fn execution_ids_for_tasks(
        &self,
        target: &SchemaTarget,
        task_execution_ids: &[i64],
    ) -> Result<BTreeMap<i64, BTreeSet<i64>>>;

    fn get_parameters(&self, target: &SchemaTarget, execution_id: i64) -> Result<JobParameters>;

    fn step_executions(&self, target: &SchemaTarget, execution_id: i64)
        -> Result<Vec<StepRecord>>;

    fn get_step_execution(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
        step_id: i64,
    ) -> Result<Option<StepRecord>>;

    fn step_names(&self, target: &SchemaTarget, execution_id: i64) -> Result<Vec<String>>;

    /// Steps whose job and step names match the patterns (`*` wildcard),
    /// newest first.
    fn find_step_executions(
        &self,
        target: &SchemaTarget,
        job_pattern: &str,
        step_pattern: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<StepRecord>>;

    fn count_step_executions(
        &self,
        target: &SchemaTarget,
        job_pattern: &str,
        step_pattern: &str,
    ) -> Result<u64>;

    fn count_steps_for_execution(&self, target: &SchemaTarget, execution_id: i64) -> Result<u64>;

    /// Stored execution context blob, undecoded.
    fn execution_context(&self, target: &SchemaTarget, execution_id: i64)
        -> Result<Option<Vec<u8>>>;

    /// Stored step context blob, undecoded.
    fn step_context(&self, target: &SchemaTarget, step_id: i64) -> Result<Option<Vec<u8>>>;

    fn save_execution(&self, _execution: &ExecutionRecord) -> Result<(), ReadOnlyViolation> {
        Err(ReadOnlyViolation {
            operation: "save_execution",
        })
    }

    fn synchronize_status(&self, _execution: &ExecutionRecord) -> Result<(), ReadOnlyViolation> {
        Err(ReadOnlyViolation {
            operation: "synchronize_status",
        })
    }

    fn update_execution(&self, _execution: &ExecutionRecord) -> Result<(), ReadOnlyViolation> {
        Err(ReadOnlyViolation {
            operation: "update_execution",
        })
    }
}

/// Write path for execution history.
pub trait ExecutionRepository: Send + Sync {
    /// Creates the target's missing tables and validates existing ones.
    /// Returns how many tables were created.
    fn ensure_schema(&self, target: &SchemaTarget) -> Result<usize>;

    /// Instance for a job name and its identifying parameters, created when
    /// it does not exist yet.
    fn get_or_create_job_instance(
        &self,
        target: &SchemaTarget,
        name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance>;

    /// Inserts an execution and its parameters, returning its id.
    fn insert_execution(&self, target: &SchemaTarget, execution: &NewExecution) -> Result<i64>;

    /// Persists status, times and exit status of an execution. Fails with
    /// [`StaleRecord`] unless `execution.version` matches the stored version.
    /// Returns the record as stored, with its new version.
    fn update_execution(
        &self,
        target: &SchemaTarget,
        execution: &ExecutionRecord,
    ) -> Result<ExecutionRecord>;

    fn insert_step(&self, target: &SchemaTarget, execution_id: i64, step: &NewStep)
        -> Result<i64>;

    fn update_step(&self, target: &SchemaTarget, step: &StepRecord) -> Result<StepRecord>;

    fn save_execution_context(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
        context: &Map<String, Value>,
    ) -> Result<()>;

    fn save_step_context(
        &self,
        target: &SchemaTarget,
        step_id: i64,
        context: &Map<String, Value>,
    ) -> Result<()>;

    fn link_task_execution(
        &self,
        target: &SchemaTarget,
        task_execution_id: i64,
        execution_id: i64,
    ) -> Result<()>;
}
