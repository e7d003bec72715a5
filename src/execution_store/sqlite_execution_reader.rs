use super::models::*;
use super::queries::{
    execution_fields, filter_sql, step_search_sql, FilterSql, EXECUTION_FIELD_COUNT,
    EXECUTION_SORT_KEY, STEP_FIELDS, STEP_SORT_KEY,
};
use super::schema::{
    JOB_EXECUTION_CONTEXT, JOB_EXECUTION_PARAMS, JOB_INSTANCE, JOB_LINK, STEP_EXECUTION,
    STEP_EXECUTION_CONTEXT,
};
use super::ExecutionReader;
use crate::paging::{Dialect, PageCursor, PagingQueryProvider};
use crate::schema_target::{SchemaLayout, SchemaTarget, TargetProbe};
use crate::sqlite_persistence::SqliteClient;
use anyhow::Result;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on ids bound into one `IN (...)` list.
const IN_CLAUSE_CHUNK: usize = 500;

/// Read-only view of the execution tables of every schema target.
pub struct SqliteExecutionReader {
    client: SqliteClient,
}

impl SqliteExecutionReader {
    pub fn new(client: SqliteClient) -> Self {
        Self { client }
    }

    fn parse_time(value: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
        value.as_deref().and_then(parse_timestamp)
    }

    fn row_to_execution(
        row: &rusqlite::Row,
        target: &str,
        with_step_count: bool,
    ) -> rusqlite::Result<ExecutionRecord> {
        let status: Option<String> = row.get(3)?;
        Ok(ExecutionRecord {
            id: row.get(0)?,
            start_time: Self::parse_time(row.get(1)?),
            end_time: Self::parse_time(row.get(2)?),
            status: BatchStatus::from_db(status.as_deref()),
            exit_code: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            exit_message: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            create_time: Self::parse_time(row.get(6)?),
            last_updated: Self::parse_time(row.get(7)?),
            version: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
            instance_id: row.get(9)?,
            name: row.get(10)?,
            step_count: if with_step_count {
                Some(row.get(EXECUTION_FIELD_COUNT)?)
            } else {
                None
            },
            parameters: JobParameters::new(),
            schema_target: target.to_string(),
        })
    }

    fn row_to_step(row: &rusqlite::Row, target: &str) -> rusqlite::Result<StepRecord> {
        let count = |idx: usize| -> rusqlite::Result<i64> {
            Ok(row.get::<_, Option<i64>>(idx)?.unwrap_or(0))
        };
        let status: Option<String> = row.get(5)?;
        Ok(StepRecord {
            id: row.get(0)?,
            execution_id: row.get(1)?,
            name: row.get(2)?,
            start_time: Self::parse_time(row.get(3)?),
            end_time: Self::parse_time(row.get(4)?),
            status: BatchStatus::from_db(status.as_deref()),
            counts: StepCounts {
                commit_count: count(6)?,
                read_count: count(7)?,
                filter_count: count(8)?,
                write_count: count(9)?,
                read_skip_count: count(12)?,
                write_skip_count: count(13)?,
                process_skip_count: count(14)?,
                rollback_count: count(15)?,
            },
            exit_code: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            exit_message: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            last_updated: Self::parse_time(row.get(16)?),
            version: row.get::<_, Option<i64>>(17)?.unwrap_or(0),
            schema_target: target.to_string(),
        })
    }

    fn row_to_instance(row: &rusqlite::Row, target: &str) -> rusqlite::Result<JobInstance> {
        Ok(JobInstance {
            id: row.get(0)?,
            name: row.get(1)?,
            version: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            schema_target: target.to_string(),
        })
    }

    /// Legacy rows keep each value kind in its own column; the type code
    /// picks the column. Unknown codes read the string column.
    fn row_to_legacy_parameter(
        row: &rusqlite::Row,
    ) -> rusqlite::Result<(i64, String, JobParameter)> {
        let type_code: String = row.get(2)?;
        let value = match type_code.to_ascii_uppercase().as_str() {
            "LONG" => row.get::<_, Option<i64>>(5)?.map(ParameterValue::Long),
            "DOUBLE" => row.get::<_, Option<f64>>(6)?.map(ParameterValue::Double),
            "DATE" => row.get::<_, Option<String>>(4)?.map(|text| {
                parse_timestamp(&text)
                    .map(ParameterValue::Timestamp)
                    .unwrap_or(ParameterValue::String(text))
            }),
            _ => row.get::<_, Option<String>>(3)?.map(ParameterValue::String),
        };
        Ok((
            row.get(0)?,
            row.get(1)?,
            JobParameter {
                value,
                identifying: Self::is_identifying(row.get(7)?),
            },
        ))
    }

    fn row_to_current_parameter(
        row: &rusqlite::Row,
    ) -> rusqlite::Result<(i64, String, JobParameter)> {
        let type_name: String = row.get(2)?;
        let value = row
            .get::<_, Option<String>>(3)?
            .map(|text| ParameterValue::from_text(&type_name, &text));
        Ok((
            row.get(0)?,
            row.get(1)?,
            JobParameter {
                value,
                identifying: Self::is_identifying(row.get(4)?),
            },
        ))
    }

    fn is_identifying(flag: Option<String>) -> bool {
        flag.map(|f| f.eq_ignore_ascii_case("Y")).unwrap_or(false)
    }

    fn load_parameters(
        conn: &Connection,
        target: &SchemaTarget,
        execution_ids: &[i64],
    ) -> Result<BTreeMap<i64, JobParameters>> {
        let mut by_execution: BTreeMap<i64, JobParameters> = BTreeMap::new();
        let table = target.job_table(JOB_EXECUTION_PARAMS);
        let columns = match target.layout {
            SchemaLayout::Legacy => {
                "JOB_EXECUTION_ID, KEY_NAME, TYPE_CD, STRING_VAL, DATE_VAL, LONG_VAL, DOUBLE_VAL, IDENTIFYING"
            }
            SchemaLayout::Current => {
                "JOB_EXECUTION_ID, PARAMETER_NAME, PARAMETER_TYPE, PARAMETER_VALUE, IDENTIFYING"
            }
        };
        let mapper: fn(&rusqlite::Row) -> rusqlite::Result<(i64, String, JobParameter)> =
            match target.layout {
                SchemaLayout::Legacy => Self::row_to_legacy_parameter,
                SchemaLayout::Current => Self::row_to_current_parameter,
            };

        for chunk in execution_ids.chunks(IN_CLAUSE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} WHERE JOB_EXECUTION_ID IN ({}) ORDER BY rowid",
                columns, table, placeholders
            ))?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), mapper)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (execution_id, name, parameter) in rows {
                by_execution
                    .entry(execution_id)
                    .or_default()
                    .insert(name, parameter);
            }
        }
        Ok(by_execution)
    }

    fn attach_parameters(
        conn: &Connection,
        target: &SchemaTarget,
        records: &mut [ExecutionRecord],
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let mut parameters = Self::load_parameters(conn, target, &ids)?;
        for record in records.iter_mut() {
            if let Some(p) = parameters.remove(&record.id) {
                record.parameters = p;
            }
        }
        Ok(())
    }

    /// Reads one page through the keyset queries of `provider`. A start
    /// ordinal past the end of the result yields an empty page.
    fn read_page<T, F>(
        conn: &Connection,
        provider: &PagingQueryProvider,
        filter: &FilterSql,
        start: u64,
        count: u64,
        map_row: F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(&rusqlite::Row) -> rusqlite::Result<T>,
    {
        if count == 0 {
            return Ok(Vec::new());
        }
        let cursor = match provider.jump_to_item_query(start) {
            None => PageCursor::first(),
            Some(sql) => {
                let key: Option<i64> = conn
                    .query_row(&sql, filter.param_refs().as_slice(), |row| row.get(0))
                    .optional()?;
                match key {
                    Some(key) => PageCursor::after(key, start),
                    None => return Ok(Vec::new()),
                }
            }
        };

        let mut params = filter.param_refs();
        let sql = match cursor.start_after.as_ref() {
            None => provider.first_page_query(count),
            Some(key) => {
                params.push(key);
                provider.remaining_pages_query(count)
            }
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params.as_slice(), map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count_matching(conn: &Connection, filter: &FilterSql) -> Result<u64> {
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                filter.from, filter.where_clause
            ),
            filter.param_refs().as_slice(),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every execution matching `filter`, newest first.
    fn query_executions(
        conn: &Connection,
        target: &SchemaTarget,
        filter: FilterSql,
        limit: Option<u64>,
    ) -> Result<Vec<ExecutionRecord>> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} DESC",
            execution_fields(target, false),
            filter.from,
            filter.where_clause,
            EXECUTION_SORT_KEY
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        let mut stmt = conn.prepare(&sql)?;
        let mut records = stmt
            .query_map(filter.param_refs().as_slice(), |row| {
                Self::row_to_execution(row, &target.name, false)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Self::attach_parameters(conn, target, &mut records)?;
        Ok(records)
    }

    fn context_blob(value: ValueRef<'_>) -> Option<Vec<u8>> {
        match value {
            ValueRef::Null => None,
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(bytes.to_vec()),
            ValueRef::Integer(v) => Some(v.to_string().into_bytes()),
            ValueRef::Real(v) => Some(v.to_string().into_bytes()),
        }
    }

    /// The long column holds the full context when the short one was
    /// truncated.
    fn read_context(
        conn: &Connection,
        table: &str,
        id_column: &str,
        id: i64,
    ) -> Result<Option<Vec<u8>>> {
        let blob = conn
            .query_row(
                &format!(
                    "SELECT SHORT_CONTEXT, SERIALIZED_CONTEXT FROM {} WHERE {} = ?1",
                    table, id_column
                ),
                params![id],
                |row| {
                    let short = Self::context_blob(row.get_ref(0)?);
                    let long = Self::context_blob(row.get_ref(1)?);
                    Ok(long.or(short))
                },
            )
            .optional()?;
        Ok(blob.flatten())
    }
}

impl ExecutionReader for SqliteExecutionReader {
    fn list_executions(
        &self,
        target: &SchemaTarget,
        filter: &ExecutionFilter,
        start: u64,
        count: u64,
        with_step_count: bool,
    ) -> Result<Vec<ExecutionRecord>> {
        let filter = filter_sql(target, filter);
        let provider = PagingQueryProvider::new(
            Dialect::Sqlite,
            execution_fields(target, with_step_count),
            filter.from.clone(),
            Some(filter.where_clause.clone()),
            EXECUTION_SORT_KEY,
        )?;
        self.client.with_conn(|conn| {
            let mut records = Self::read_page(conn, &provider, &filter, start, count, |row| {
                Self::row_to_execution(row, &target.name, with_step_count)
            })?;
            Self::attach_parameters(conn, target, &mut records)?;
            Ok(records)
        })
    }

    fn count_executions(&self, target: &SchemaTarget, filter: &ExecutionFilter) -> Result<u64> {
        let filter = filter_sql(target, filter);
        self.client
            .with_conn(|conn| Self::count_matching(conn, &filter))
    }

    fn get_execution(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
    ) -> Result<Option<ExecutionRecord>> {
        let mut filter = filter_sql(target, &ExecutionFilter::All);
        filter.where_clause.push_str(" AND E.JOB_EXECUTION_ID = ?");
        filter.params.push(Box::new(execution_id));
        self.client.with_conn(|conn| {
            Ok(Self::query_executions(conn, target, filter, Some(1))?
                .into_iter()
                .next())
        })
    }

    fn get_job_instance(
        &self,
        target: &SchemaTarget,
        instance_id: i64,
    ) -> Result<Option<JobInstance>> {
        self.client.with_conn(|conn| {
            let instance = conn
                .query_row(
                    &format!(
                        "SELECT JOB_INSTANCE_ID, JOB_NAME, VERSION FROM {} WHERE JOB_INSTANCE_ID = ?1",
                        target.job_table(JOB_INSTANCE)
                    ),
                    params![instance_id],
                    |row| Self::row_to_instance(row, &target.name),
                )
                .optional()?;
            Ok(instance)
        })
    }

    fn latest_job_instance(
        &self,
        target: &SchemaTarget,
        name: &str,
    ) -> Result<Option<JobInstance>> {
        self.client.with_conn(|conn| {
            let instance = conn
                .query_row(
                    &format!(
                        "SELECT JOB_INSTANCE_ID, JOB_NAME, VERSION FROM {} WHERE JOB_NAME = ?1
                         ORDER BY JOB_INSTANCE_ID DESC LIMIT 1",
                        target.job_table(JOB_INSTANCE)
                    ),
                    params![name],
                    |row| Self::row_to_instance(row, &target.name),
                )
                .optional()?;
            Ok(instance)
        })
    }

    fn executions_for_instance(
        &self,
        target: &SchemaTarget,
        instance_id: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        let filter = filter_sql(target, &ExecutionFilter::InstanceId(instance_id));
        self.client
            .with_conn(|conn| Self::query_executions(conn, target, filter, None))
    }

    fn last_execution_for_instance(
        &self,
        target: &SchemaTarget,
        instance_id: i64,
    ) -> Result<Option<ExecutionRecord>> {
        let filter = filter_sql(target, &ExecutionFilter::InstanceId(instance_id));
        self.client.with_conn(|conn| {
            Ok(Self::query_executions(conn, target, filter, Some(1))?
                .into_iter()
                .next())
        })
    }

    fn running_executions(
        &self,
        target: &SchemaTarget,
        name: Option<&str>,
    ) -> Result<Vec<ExecutionRecord>> {
        let mut filter = filter_sql(target, &ExecutionFilter::All);
        filter.where_clause.push_str(&format!(
            " AND E.END_TIME IS NULL AND E.STATUS IN ('{}', '{}', '{}')",
            BatchStatus::Starting.as_str(),
            BatchStatus::Started.as_str(),
            BatchStatus::Stopping.as_str()
        ));
        if let Some(name) = name {
            filter.where_clause.push_str(" AND I.JOB_NAME = ?");
            filter.params.push(Box::new(name.to_string()));
        }
        self.client
            .with_conn(|conn| Self::query_executions(conn, target, filter, None))
    }

    fn job_names(&self, target: &SchemaTarget) -> Result<Vec<String>> {
        self.client.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT JOB_NAME FROM {} ORDER BY JOB_NAME",
                target.job_table(JOB_INSTANCE)
            ))?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
    }

    fn execution_ids_for_tasks(
        &self,
        target: &SchemaTarget,
        task_execution_ids: &[i64],
    ) -> Result<BTreeMap<i64, BTreeSet<i64>>> {
        self.client.with_conn(|conn| {
            let mut result: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
            for chunk in task_execution_ids.chunks(IN_CLAUSE_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT TASK_EXECUTION_ID, JOB_EXECUTION_ID FROM {} WHERE TASK_EXECUTION_ID IN ({})",
                    target.task_table(JOB_LINK),
                    placeholders
                ))?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter()), |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for (task_id, execution_id) in rows {
                    result.entry(task_id).or_default().insert(execution_id);
                }
            }
            Ok(result)
        })
    }

    fn get_parameters(&self, target: &SchemaTarget, execution_id: i64) -> Result<JobParameters> {
        self.client.with_conn(|conn| {
            Ok(Self::load_parameters(conn, target, &[execution_id])?
                .remove(&execution_id)
                .unwrap_or_default())
        })
    }

    fn step_executions(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
    ) -> Result<Vec<StepRecord>> {
        self.client.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} S WHERE S.JOB_EXECUTION_ID = ?1 ORDER BY S.STEP_EXECUTION_ID",
                STEP_FIELDS,
                target.job_table(STEP_EXECUTION)
            ))?;
            let steps = stmt
                .query_map(params![execution_id], |row| {
                    Self::row_to_step(row, &target.name)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(steps)
        })
    }

    fn get_step_execution(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
        step_id: i64,
    ) -> Result<Option<StepRecord>> {
        self.client.with_conn(|conn| {
            let step = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM {} S WHERE S.JOB_EXECUTION_ID = ?1 AND S.STEP_EXECUTION_ID = ?2",
                        STEP_FIELDS,
                        target.job_table(STEP_EXECUTION)
                    ),
                    params![execution_id, step_id],
                    |row| Self::row_to_step(row, &target.name),
                )
                .optional()?;
            Ok(step)
        })
    }

    fn step_names(&self, target: &SchemaTarget, execution_id: i64) -> Result<Vec<String>> {
        self.client.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT STEP_NAME FROM {} WHERE JOB_EXECUTION_ID = ?1 ORDER BY STEP_NAME",
                target.job_table(STEP_EXECUTION)
            ))?;
            let names = stmt
                .query_map(params![execution_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
    }

    fn find_step_executions(
        &self,
        target: &SchemaTarget,
        job_pattern: &str,
        step_pattern: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<StepRecord>> {
        let filter = step_search_sql(target, job_pattern, step_pattern);
        let provider = PagingQueryProvider::new(
            Dialect::Sqlite,
            STEP_FIELDS,
            filter.from.clone(),
            Some(filter.where_clause.clone()),
            STEP_SORT_KEY,
        )?;
        self.client.with_conn(|conn| {
            Self::read_page(conn, &provider, &filter, start, count, |row| {
                Self::row_to_step(row, &target.name)
            })
        })
    }

    fn count_step_executions(
        &self,
        target: &SchemaTarget,
        job_pattern: &str,
        step_pattern: &str,
    ) -> Result<u64> {
        let filter = step_search_sql(target, job_pattern, step_pattern);
        self.client
            .with_conn(|conn| Self::count_matching(conn, &filter))
    }

    fn count_steps_for_execution(&self, target: &SchemaTarget, execution_id: i64) -> Result<u64> {
        self.client.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE JOB_EXECUTION_ID = ?1",
                    target.job_table(STEP_EXECUTION)
                ),
                params![execution_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn execution_context(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
    ) -> Result<Option<Vec<u8>>> {
        self.client.with_conn(|conn| {
            Self::read_context(
                conn,
                &target.job_table(JOB_EXECUTION_CONTEXT),
                "JOB_EXECUTION_ID",
                execution_id,
            )
        })
    }

    fn step_context(&self, target: &SchemaTarget, step_id: i64) -> Result<Option<Vec<u8>>> {
        self.client.with_conn(|conn| {
            Self::read_context(
                conn,
                &target.job_table(STEP_EXECUTION_CONTEXT),
                "STEP_EXECUTION_ID",
                step_id,
            )
        })
    }
}

impl TargetProbe for SqliteExecutionReader {
    fn has_job_name(&self, target: &SchemaTarget, name: &str) -> Result<bool> {
        self.client.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    &format!(
                        "SELECT 1 FROM {} WHERE JOB_NAME = ?1 LIMIT 1",
                        target.job_table(JOB_INSTANCE)
                    ),
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}
