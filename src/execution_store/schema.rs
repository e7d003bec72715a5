//! Table layouts of the execution history.
//!
//! Both layouts share every table except the parameters table. Table names
//! are relative to the schema target's job or task prefix.

use crate::schema_target::SchemaLayout;
use crate::sqlite_column;
use crate::sqlite_persistence::{Column, ForeignKey, SqlType, Table, TablePrefix, TableSet};

pub const JOB_INSTANCE: &str = "JOB_INSTANCE";
pub const JOB_EXECUTION: &str = "JOB_EXECUTION";
pub const JOB_EXECUTION_PARAMS: &str = "JOB_EXECUTION_PARAMS";
pub const STEP_EXECUTION: &str = "STEP_EXECUTION";
pub const JOB_EXECUTION_CONTEXT: &str = "JOB_EXECUTION_CONTEXT";
pub const STEP_EXECUTION_CONTEXT: &str = "STEP_EXECUTION_CONTEXT";
/// Links task executions to the job executions they launched.
pub const JOB_LINK: &str = "JOB_LINK";

const JOB_EXECUTION_FK: ForeignKey = ForeignKey {
    foreign_table: JOB_EXECUTION,
    foreign_column: "JOB_EXECUTION_ID",
};

const JOB_INSTANCE_TABLE: Table = Table {
    name: JOB_INSTANCE,
    prefix: TablePrefix::Job,
    columns: &[
        sqlite_column!("JOB_INSTANCE_ID", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("VERSION", &SqlType::Integer),
        sqlite_column!("JOB_NAME", &SqlType::Text, non_null = true),
        sqlite_column!("JOB_KEY", &SqlType::Text, non_null = true),
    ],
    indices: &[("JOB_INSTANCE_NAME_IX", "JOB_NAME")],
    unique_constraints: &[&["JOB_NAME", "JOB_KEY"]],
};

const JOB_EXECUTION_TABLE: Table = Table {
    name: JOB_EXECUTION,
    prefix: TablePrefix::Job,
    columns: &[
        sqlite_column!("JOB_EXECUTION_ID", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("VERSION", &SqlType::Integer),
        sqlite_column!(
            "JOB_INSTANCE_ID",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: JOB_INSTANCE,
                foreign_column: "JOB_INSTANCE_ID",
            })
        ),
        sqlite_column!("CREATE_TIME", &SqlType::Text, non_null = true),
        sqlite_column!("START_TIME", &SqlType::Text),
        sqlite_column!("END_TIME", &SqlType::Text),
        sqlite_column!("STATUS", &SqlType::Text),
        sqlite_column!("EXIT_CODE", &SqlType::Text),
        sqlite_column!("EXIT_MESSAGE", &SqlType::Text),
        sqlite_column!("LAST_UPDATED", &SqlType::Text),
    ],
    indices: &[
        ("JOB_EXECUTION_INSTANCE_IX", "JOB_INSTANCE_ID"),
        ("JOB_EXECUTION_START_IX", "START_TIME"),
    ],
    unique_constraints: &[],
};

/// Legacy parameters: one typed column per value kind.
const LEGACY_PARAMS_TABLE: Table = Table {
    name: JOB_EXECUTION_PARAMS,
    prefix: TablePrefix::Job,
    columns: &[
        sqlite_column!(
            "JOB_EXECUTION_ID",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&JOB_EXECUTION_FK)
        ),
        sqlite_column!("TYPE_CD", &SqlType::Text, non_null = true),
        sqlite_column!("KEY_NAME", &SqlType::Text, non_null = true),
        sqlite_column!("STRING_VAL", &SqlType::Text),
        sqlite_column!("DATE_VAL", &SqlType::Text),
        sqlite_column!("LONG_VAL", &SqlType::Integer),
        sqlite_column!("DOUBLE_VAL", &SqlType::Real),
        sqlite_column!("IDENTIFYING", &SqlType::Text, non_null = true),
    ],
    indices: &[("JOB_EXECUTION_PARAMS_IX", "JOB_EXECUTION_ID")],
    unique_constraints: &[],
};

/// Current parameters: type name plus the value as text.
const CURRENT_PARAMS_TABLE: Table = Table {
    name: JOB_EXECUTION_PARAMS,
    prefix: TablePrefix::Job,
    columns: &[
        sqlite_column!(
            "JOB_EXECUTION_ID",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&JOB_EXECUTION_FK)
        ),
        sqlite_column!("PARAMETER_NAME", &SqlType::Text, non_null = true),
        sqlite_column!("PARAMETER_TYPE", &SqlType::Text, non_null = true),
        sqlite_column!("PARAMETER_VALUE", &SqlType::Text),
        sqlite_column!("IDENTIFYING", &SqlType::Text, non_null = true),
    ],
    indices: &[("JOB_EXECUTION_PARAMS_IX", "JOB_EXECUTION_ID")],
    unique_constraints: &[],
};

const STEP_EXECUTION_TABLE: Table = Table {
    name: STEP_EXECUTION,
    prefix: TablePrefix::Job,
    columns: &[
        sqlite_column!("STEP_EXECUTION_ID", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("VERSION", &SqlType::Integer, non_null = true),
        sqlite_column!("STEP_NAME", &SqlType::Text, non_null = true),
        sqlite_column!(
            "JOB_EXECUTION_ID",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&JOB_EXECUTION_FK)
        ),
        sqlite_column!("START_TIME", &SqlType::Text),
        sqlite_column!("END_TIME", &SqlType::Text),
        sqlite_column!("STATUS", &SqlType::Text),
        sqlite_column!("COMMIT_COUNT", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("READ_COUNT", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("FILTER_COUNT", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("WRITE_COUNT", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("READ_SKIP_COUNT", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("WRITE_SKIP_COUNT", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("PROCESS_SKIP_COUNT", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("ROLLBACK_COUNT", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("EXIT_CODE", &SqlType::Text),
        sqlite_column!("EXIT_MESSAGE", &SqlType::Text),
        sqlite_column!("LAST_UPDATED", &SqlType::Text),
    ],
    indices: &[("STEP_EXECUTION_JOB_IX", "JOB_EXECUTION_ID")],
    unique_constraints: &[],
};

const JOB_EXECUTION_CONTEXT_TABLE: Table = Table {
    name: JOB_EXECUTION_CONTEXT,
    prefix: TablePrefix::Job,
    columns: &[
        sqlite_column!(
            "JOB_EXECUTION_ID",
            &SqlType::Integer,
            is_primary_key = true,
            foreign_key = Some(&JOB_EXECUTION_FK)
        ),
        sqlite_column!("SHORT_CONTEXT", &SqlType::Text, non_null = true),
        sqlite_column!("SERIALIZED_CONTEXT", &SqlType::LongText),
    ],
    indices: &[],
    unique_constraints: &[],
};

const STEP_EXECUTION_CONTEXT_TABLE: Table = Table {
    name: STEP_EXECUTION_CONTEXT,
    prefix: TablePrefix::Job,
    columns: &[
        sqlite_column!(
            "STEP_EXECUTION_ID",
            &SqlType::Integer,
            is_primary_key = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: STEP_EXECUTION,
                foreign_column: "STEP_EXECUTION_ID",
            })
        ),
        sqlite_column!("SHORT_CONTEXT", &SqlType::Text, non_null = true),
        sqlite_column!("SERIALIZED_CONTEXT", &SqlType::LongText),
    ],
    indices: &[],
    unique_constraints: &[],
};

const JOB_LINK_TABLE: Table = Table {
    name: JOB_LINK,
    prefix: TablePrefix::Task,
    columns: &[
        sqlite_column!("TASK_EXECUTION_ID", &SqlType::Integer, non_null = true),
        sqlite_column!("JOB_EXECUTION_ID", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("JOB_LINK_TASK_IX", "TASK_EXECUTION_ID"),
        ("JOB_LINK_JOB_IX", "JOB_EXECUTION_ID"),
    ],
    unique_constraints: &[&["TASK_EXECUTION_ID", "JOB_EXECUTION_ID"]],
};

pub const LEGACY_TABLES: TableSet = TableSet {
    tables: &[
        JOB_INSTANCE_TABLE,
        JOB_EXECUTION_TABLE,
        LEGACY_PARAMS_TABLE,
        STEP_EXECUTION_TABLE,
        JOB_EXECUTION_CONTEXT_TABLE,
        STEP_EXECUTION_CONTEXT_TABLE,
        JOB_LINK_TABLE,
    ],
};

pub const CURRENT_TABLES: TableSet = TableSet {
    tables: &[
        JOB_INSTANCE_TABLE,
        JOB_EXECUTION_TABLE,
        CURRENT_PARAMS_TABLE,
        STEP_EXECUTION_TABLE,
        JOB_EXECUTION_CONTEXT_TABLE,
        STEP_EXECUTION_CONTEXT_TABLE,
        JOB_LINK_TABLE,
    ],
};

pub fn tables_for(layout: SchemaLayout) -> &'static TableSet {
    match layout {
        SchemaLayout::Legacy => &LEGACY_TABLES,
        SchemaLayout::Current => &CURRENT_TABLES,
    }
}
