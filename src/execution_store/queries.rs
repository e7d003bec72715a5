//! SQL fragments for execution and step reads.
//!
//! Table names come from the schema target, whose prefixes were validated
//! when configuration was loaded. Request values are always bound.

use super::models::{format_timestamp, like_pattern, ExecutionFilter};
use super::schema::{JOB_EXECUTION, JOB_INSTANCE, JOB_LINK, STEP_EXECUTION};
use crate::schema_target::SchemaTarget;

pub(super) type SqlParams = Vec<Box<dyn rusqlite::ToSql>>;

pub(super) const EXECUTION_SORT_KEY: &str = "E.JOB_EXECUTION_ID";
pub(super) const STEP_SORT_KEY: &str = "S.STEP_EXECUTION_ID";

/// Number of columns selected by [`execution_fields`] without step count.
/// The step count, when requested, is the column at this index.
pub(super) const EXECUTION_FIELD_COUNT: usize = 11;

const BASE_EXECUTION_FIELDS: &str = "E.JOB_EXECUTION_ID, E.START_TIME, E.END_TIME, E.STATUS, \
     E.EXIT_CODE, E.EXIT_MESSAGE, E.CREATE_TIME, E.LAST_UPDATED, E.VERSION, \
     I.JOB_INSTANCE_ID, I.JOB_NAME";

pub(super) const STEP_FIELDS: &str = "S.STEP_EXECUTION_ID, S.JOB_EXECUTION_ID, S.STEP_NAME, \
     S.START_TIME, S.END_TIME, S.STATUS, S.COMMIT_COUNT, S.READ_COUNT, S.FILTER_COUNT, \
     S.WRITE_COUNT, S.EXIT_CODE, S.EXIT_MESSAGE, S.READ_SKIP_COUNT, S.WRITE_SKIP_COUNT, \
     S.PROCESS_SKIP_COUNT, S.ROLLBACK_COUNT, S.LAST_UPDATED, S.VERSION";

pub(super) fn execution_fields(target: &SchemaTarget, with_step_count: bool) -> String {
    if with_step_count {
        format!(
            "{}, (SELECT COUNT(*) FROM {} S WHERE S.JOB_EXECUTION_ID = E.JOB_EXECUTION_ID) AS STEP_COUNT",
            BASE_EXECUTION_FIELDS,
            target.job_table(STEP_EXECUTION)
        )
    } else {
        BASE_EXECUTION_FIELDS.to_string()
    }
}

/// Predicate on a name column: `LIKE` when the pattern has a `*` wildcard,
/// equality otherwise.
pub(super) fn name_predicate(column: &str, pattern: &str) -> (String, String) {
    if pattern.contains('*') {
        (format!("{} LIKE ?", column), like_pattern(pattern))
    } else {
        (format!("{} = ?", column), pattern.to_string())
    }
}

/// Relation, predicate and bound values selecting the executions that match
/// a filter within one target.
pub(super) struct FilterSql {
    pub from: String,
    pub where_clause: String,
    pub params: SqlParams,
}

impl FilterSql {
    pub fn param_refs(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

pub(super) fn filter_sql(target: &SchemaTarget, filter: &ExecutionFilter) -> FilterSql {
    let mut from = format!(
        "{} E, {} I",
        target.job_table(JOB_EXECUTION),
        target.job_table(JOB_INSTANCE)
    );
    let mut where_clause = "E.JOB_INSTANCE_ID = I.JOB_INSTANCE_ID".to_string();
    let mut params: SqlParams = Vec::new();

    match filter {
        ExecutionFilter::All => {}
        ExecutionFilter::Name(pattern) => {
            let (predicate, value) = name_predicate("I.JOB_NAME", pattern);
            where_clause.push_str(&format!(" AND {}", predicate));
            params.push(Box::new(value));
        }
        ExecutionFilter::Status(status) => {
            where_clause.push_str(" AND E.STATUS = ?");
            params.push(Box::new(status.as_str()));
        }
        ExecutionFilter::NameAndStatus { name, status } => {
            let (predicate, value) = name_predicate("I.JOB_NAME", name);
            where_clause.push_str(&format!(" AND {} AND E.STATUS = ?", predicate));
            params.push(Box::new(value));
            params.push(Box::new(status.as_str()));
        }
        ExecutionFilter::DateRange { from: start, to: end } => {
            // julianday() compares RFC 3339 and space-separated rows alike.
            where_clause
                .push_str(" AND julianday(E.START_TIME) BETWEEN julianday(?) AND julianday(?)");
            params.push(Box::new(format_timestamp(start)));
            params.push(Box::new(format_timestamp(end)));
        }
        ExecutionFilter::InstanceId(instance_id) => {
            where_clause.push_str(" AND I.JOB_INSTANCE_ID = ?");
            params.push(Box::new(*instance_id));
        }
        ExecutionFilter::TaskExecutionId(task_execution_id) => {
            from.push_str(&format!(", {} L", target.task_table(JOB_LINK)));
            where_clause
                .push_str(" AND L.JOB_EXECUTION_ID = E.JOB_EXECUTION_ID AND L.TASK_EXECUTION_ID = ?");
            params.push(Box::new(*task_execution_id));
        }
    }

    FilterSql {
        from,
        where_clause,
        params,
    }
}

/// Relation joining steps to their job names, for step searches.
pub(super) fn step_search_sql(
    target: &SchemaTarget,
    job_pattern: &str,
    step_pattern: &str,
) -> FilterSql {
    let from = format!(
        "{} S, {} E, {} I",
        target.job_table(STEP_EXECUTION),
        target.job_table(JOB_EXECUTION),
        target.job_table(JOB_INSTANCE)
    );
    let (job_predicate, job_value) = name_predicate("I.JOB_NAME", job_pattern);
    let (step_predicate, step_value) = name_predicate("S.STEP_NAME", step_pattern);
    FilterSql {
        from,
        where_clause: format!(
            "S.JOB_EXECUTION_ID = E.JOB_EXECUTION_ID AND E.JOB_INSTANCE_ID = I.JOB_INSTANCE_ID AND {} AND {}",
            job_predicate, step_predicate
        ),
        params: vec![Box::new(job_value), Box::new(step_value)],
    }
}
