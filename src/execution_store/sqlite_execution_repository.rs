use super::models::*;
use super::schema::{
    tables_for, JOB_EXECUTION, JOB_EXECUTION_CONTEXT, JOB_EXECUTION_PARAMS, JOB_INSTANCE,
    JOB_LINK, STEP_EXECUTION, STEP_EXECUTION_CONTEXT,
};
use super::{ExecutionRepository, StaleRecord};
use crate::context_codec::ContextCodec;
use crate::schema_target::{SchemaLayout, SchemaTarget};
use crate::sqlite_persistence::SqliteClient;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info};

pub const DEFAULT_MAX_VARCHAR_LENGTH: usize = 2500;

/// Marker appended to a short context that was cut.
const TRUNCATION_MARKER: &str = " ...";

/// Writes execution history for every schema target through a shared client.
pub struct SqliteExecutionRepository {
    client: SqliteClient,
    codec: ContextCodec,
    max_varchar_length: usize,
}

impl SqliteExecutionRepository {
    pub fn new(client: SqliteClient, max_varchar_length: usize) -> Self {
        Self {
            client,
            codec: ContextCodec::default(),
            max_varchar_length,
        }
    }

    fn truncate(text: &str, max_chars: usize) -> String {
        text.chars().take(max_chars).collect()
    }

    /// Splits an encoded context into the short column value and, when it
    /// does not fit, the full text for the long column.
    fn split_context(&self, encoded: String) -> (String, Option<String>) {
        if encoded.chars().count() <= self.max_varchar_length {
            return (encoded, None);
        }
        let keep = self
            .max_varchar_length
            .saturating_sub(TRUNCATION_MARKER.len());
        let short = format!("{}{}", Self::truncate(&encoded, keep), TRUNCATION_MARKER);
        (short, Some(encoded))
    }

    fn identifying_flag(identifying: bool) -> &'static str {
        if identifying {
            "Y"
        } else {
            "N"
        }
    }

    fn insert_parameters(
        conn: &Connection,
        target: &SchemaTarget,
        execution_id: i64,
        parameters: &JobParameters,
    ) -> Result<()> {
        let table = target.job_table(JOB_EXECUTION_PARAMS);
        match target.layout {
            SchemaLayout::Legacy => {
                let mut stmt = conn.prepare(&format!(
                    "INSERT INTO {} (JOB_EXECUTION_ID, TYPE_CD, KEY_NAME, STRING_VAL, DATE_VAL, LONG_VAL, DOUBLE_VAL, IDENTIFYING)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    table
                ))?;
                for (name, parameter) in parameters.iter() {
                    let type_code = parameter
                        .value
                        .as_ref()
                        .map_or("STRING", ParameterValue::type_code);
                    let (string_val, date_val, long_val, double_val) = match &parameter.value {
                        None => (None, None, None, None),
                        Some(ParameterValue::String(s)) => (Some(s.clone()), None, None, None),
                        Some(ParameterValue::Long(v)) => (None, None, Some(*v), None),
                        Some(ParameterValue::Double(v)) => (None, None, None, Some(*v)),
                        Some(ParameterValue::Timestamp(ts)) => {
                            (None, Some(format_timestamp(ts)), None, None)
                        }
                    };
                    stmt.execute(params![
                        execution_id,
                        type_code,
                        name,
                        string_val,
                        date_val,
                        long_val,
                        double_val,
                        Self::identifying_flag(parameter.identifying),
                    ])?;
                }
            }
            SchemaLayout::Current => {
                let mut stmt = conn.prepare(&format!(
                    "INSERT INTO {} (JOB_EXECUTION_ID, PARAMETER_NAME, PARAMETER_TYPE, PARAMETER_VALUE, IDENTIFYING)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    table
                ))?;
                for (name, parameter) in parameters.iter() {
                    let type_name = parameter
                        .value
                        .as_ref()
                        .map(|v| v.type_name())
                        .unwrap_or("string");
                    stmt.execute(params![
                        execution_id,
                        name,
                        type_name,
                        parameter.value.as_ref().map(|v| v.to_text()),
                        Self::identifying_flag(parameter.identifying),
                    ])?;
                }
            }
        }
        Ok(())
    }

    fn save_context(
        &self,
        table: String,
        id_column: &str,
        id: i64,
        context: &Map<String, Value>,
    ) -> Result<()> {
        let encoded = self.codec.encode(context)?;
        let (short, long) = self.split_context(encoded);
        self.client.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, SHORT_CONTEXT, SERIALIZED_CONTEXT) VALUES (?1, ?2, ?3)
                     ON CONFLICT({}) DO UPDATE SET SHORT_CONTEXT = excluded.SHORT_CONTEXT,
                     SERIALIZED_CONTEXT = excluded.SERIALIZED_CONTEXT",
                    table, id_column, id_column
                ),
                params![id, short, long],
            )?;
            Ok(())
        })
    }
}

impl ExecutionRepository for SqliteExecutionRepository {
    fn ensure_schema(&self, target: &SchemaTarget) -> Result<usize> {
        let created = self.client.with_conn(|conn| {
            tables_for(target.layout)
                .ensure(conn, &target.prefixes())
                .with_context(|| format!("Schema check failed for target {}", target.name))
        })?;
        if created > 0 {
            info!(
                "Created {} tables for schema target {} ({} layout)",
                created,
                target.name,
                target.layout.as_str()
            );
        }
        Ok(created)
    }

    fn get_or_create_job_instance(
        &self,
        target: &SchemaTarget,
        name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance> {
        let job_key = parameters.identifying_key();
        let table = target.job_table(JOB_INSTANCE);
        self.client.with_transaction(|tx| {
            let existing = tx
                .query_row(
                    &format!(
                        "SELECT JOB_INSTANCE_ID, VERSION FROM {} WHERE JOB_NAME = ?1 AND JOB_KEY = ?2",
                        table
                    ),
                    params![name, job_key],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)),
                )
                .optional()?;
            let (id, version) = match existing {
                Some((id, version)) => (id, version.unwrap_or(0)),
                None => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {} (VERSION, JOB_NAME, JOB_KEY) VALUES (0, ?1, ?2)",
                            table
                        ),
                        params![name, job_key],
                    )?;
                    (tx.last_insert_rowid(), 0)
                }
            };
            Ok(JobInstance {
                id,
                name: name.to_string(),
                version,
                schema_target: target.name.clone(),
            })
        })
    }

    fn insert_execution(&self, target: &SchemaTarget, execution: &NewExecution) -> Result<i64> {
        let exit_message = Self::truncate(&execution.exit_message, self.max_varchar_length);
        let id = self.client.with_transaction(|tx| {
            tx.execute(
                &format!(
                    "INSERT INTO {} (JOB_EXECUTION_ID, VERSION, JOB_INSTANCE_ID, CREATE_TIME, START_TIME, END_TIME,
                     STATUS, EXIT_CODE, EXIT_MESSAGE, LAST_UPDATED)
                     VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    target.job_table(JOB_EXECUTION)
                ),
                params![
                    execution.id,
                    execution.instance_id,
                    format_timestamp(&execution.create_time),
                    execution.start_time.as_ref().map(format_timestamp),
                    execution.end_time.as_ref().map(format_timestamp),
                    execution.status.as_str(),
                    execution.exit_code,
                    exit_message,
                    format_timestamp(&execution.create_time),
                ],
            )?;
            let id = tx.last_insert_rowid();
            Self::insert_parameters(tx, target, id, &execution.parameters)?;
            Ok(id)
        })?;
        debug!("Inserted execution {} into schema target {}", id, target.name);
        Ok(id)
    }

    fn update_execution(
        &self,
        target: &SchemaTarget,
        execution: &ExecutionRecord,
    ) -> Result<ExecutionRecord> {
        let now = Utc::now();
        let exit_message = Self::truncate(&execution.exit_message, self.max_varchar_length);
        let updated = self.client.with_conn(|conn| {
            Ok(conn.execute(
                &format!(
                    "UPDATE {} SET START_TIME = ?1, END_TIME = ?2, STATUS = ?3, EXIT_CODE = ?4,
                     EXIT_MESSAGE = ?5, VERSION = VERSION + 1, LAST_UPDATED = ?6
                     WHERE JOB_EXECUTION_ID = ?7 AND VERSION = ?8",
                    target.job_table(JOB_EXECUTION)
                ),
                params![
                    execution.start_time.as_ref().map(format_timestamp),
                    execution.end_time.as_ref().map(format_timestamp),
                    execution.status.as_str(),
                    execution.exit_code,
                    exit_message,
                    format_timestamp(&now),
                    execution.id,
                    execution.version,
                ],
            )?)
        })?;
        if updated == 0 {
            return Err(StaleRecord {
                id: execution.id,
                target: target.name.clone(),
                expected_version: execution.version,
            }
            .into());
        }

        let mut stored = execution.clone();
        stored.exit_message = exit_message;
        stored.version += 1;
        stored.last_updated = parse_timestamp(&format_timestamp(&now));
        Ok(stored)
    }

    fn insert_step(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
        step: &NewStep,
    ) -> Result<i64> {
        let exit_message = Self::truncate(&step.exit_message, self.max_varchar_length);
        let now = format_timestamp(&Utc::now());
        self.client.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (STEP_EXECUTION_ID, VERSION, STEP_NAME, JOB_EXECUTION_ID, START_TIME, END_TIME,
                     STATUS, COMMIT_COUNT, READ_COUNT, FILTER_COUNT, WRITE_COUNT, READ_SKIP_COUNT,
                     WRITE_SKIP_COUNT, PROCESS_SKIP_COUNT, ROLLBACK_COUNT, EXIT_CODE, EXIT_MESSAGE, LAST_UPDATED)
                     VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    target.job_table(STEP_EXECUTION)
                ),
                params![
                    step.id,
                    step.name,
                    execution_id,
                    step.start_time.as_ref().map(format_timestamp),
                    step.end_time.as_ref().map(format_timestamp),
                    step.status.as_str(),
                    step.counts.commit_count,
                    step.counts.read_count,
                    step.counts.filter_count,
                    step.counts.write_count,
                    step.counts.read_skip_count,
                    step.counts.write_skip_count,
                    step.counts.process_skip_count,
                    step.counts.rollback_count,
                    step.exit_code,
                    exit_message,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn update_step(&self, target: &SchemaTarget, step: &StepRecord) -> Result<StepRecord> {
        let now = Utc::now();
        let exit_message = Self::truncate(&step.exit_message, self.max_varchar_length);
        let updated = self.client.with_conn(|conn| {
            Ok(conn.execute(
                &format!(
                    "UPDATE {} SET START_TIME = ?1, END_TIME = ?2, STATUS = ?3, COMMIT_COUNT = ?4,
                     READ_COUNT = ?5, FILTER_COUNT = ?6, WRITE_COUNT = ?7, READ_SKIP_COUNT = ?8,
                     WRITE_SKIP_COUNT = ?9, PROCESS_SKIP_COUNT = ?10, ROLLBACK_COUNT = ?11,
                     EXIT_CODE = ?12, EXIT_MESSAGE = ?13, VERSION = VERSION + 1, LAST_UPDATED = ?14
                     WHERE STEP_EXECUTION_ID = ?15 AND VERSION = ?16",
                    target.job_table(STEP_EXECUTION)
                ),
                params![
                    step.start_time.as_ref().map(format_timestamp),
                    step.end_time.as_ref().map(format_timestamp),
                    step.status.as_str(),
                    step.counts.commit_count,
                    step.counts.read_count,
                    step.counts.filter_count,
                    step.counts.write_count,
                    step.counts.read_skip_count,
                    step.counts.write_skip_count,
                    step.counts.process_skip_count,
                    step.counts.rollback_count,
                    step.exit_code,
                    exit_message,
                    format_timestamp(&now),
                    step.id,
                    step.version,
                ],
            )?)
        })?;
        if updated == 0 {
            return Err(StaleRecord {
                id: step.id,
                target: target.name.clone(),
                expected_version: step.version,
            }
            .into());
        }

        let mut stored = step.clone();
        stored.exit_message = exit_message;
        stored.version += 1;
        stored.last_updated = parse_timestamp(&format_timestamp(&now));
        Ok(stored)
    }

    fn save_execution_context(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
        context: &Map<String, Value>,
    ) -> Result<()> {
        self.save_context(
            target.job_table(JOB_EXECUTION_CONTEXT),
            "JOB_EXECUTION_ID",
            execution_id,
            context,
        )
    }

    fn save_step_context(
        &self,
        target: &SchemaTarget,
        step_id: i64,
        context: &Map<String, Value>,
    ) -> Result<()> {
        self.save_context(
            target.job_table(STEP_EXECUTION_CONTEXT),
            "STEP_EXECUTION_ID",
            step_id,
            context,
        )
    }

    fn link_task_execution(
        &self,
        target: &SchemaTarget,
        task_execution_id: i64,
        execution_id: i64,
    ) -> Result<()> {
        self.client.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (TASK_EXECUTION_ID, JOB_EXECUTION_ID) VALUES (?1, ?2)",
                    target.task_table(JOB_LINK)
                ),
                params![task_execution_id, execution_id],
            )?;
            Ok(())
        })
    }
}
