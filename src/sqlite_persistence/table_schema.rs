use crate::paging::Dialect;
use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Only mutated when optional field assignments are passed
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    /// Unbounded text; rendered with the dialect's long text type.
    LongText,
}

impl SqlType {
    fn render(&self, dialect: Dialect) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::LongText => dialect.long_text_type(),
        }
    }
}

/// Which configured prefix a table name is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePrefix {
    Job,
    Task,
}

/// Prefixes of one physical table set.
#[derive(Debug, Clone, Copy)]
pub struct TablePrefixes<'a> {
    pub job: &'a str,
    pub task: &'a str,
}

impl TablePrefixes<'_> {
    fn get(&self, kind: TablePrefix) -> &str {
        match kind {
            TablePrefix::Job => self.job,
            TablePrefix::Task => self.task,
        }
    }
}

/// Reference to a table sharing the same prefix kind.
pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
    pub foreign_key: Option<&'static ForeignKey>,
}

/// A table whose physical name is its prefix followed by `name`.
pub struct Table {
    pub name: &'static str,
    pub prefix: TablePrefix,
    pub columns: &'static [Column],
    /// (index name suffix, indexed columns)
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    pub fn qualified_name(&self, prefixes: &TablePrefixes) -> String {
        format!("{}{}", prefixes.get(self.prefix), self.name)
    }

    pub fn exists(&self, conn: &Connection, prefixes: &TablePrefixes) -> Result<bool> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.qualified_name(prefixes)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn create(&self, conn: &Connection, prefixes: &TablePrefixes) -> Result<()> {
        let table_name = self.qualified_name(prefixes);
        let mut create_sql = format!("CREATE TABLE {} (", table_name);
        for (column_index, column) in self.columns.iter().enumerate() {
            if column_index > 0 {
                create_sql.push_str(", ");
            }
            create_sql.push_str(&format!(
                "{} {}",
                column.name,
                column.sql_type.render(Dialect::Sqlite)
            ));
            if column.is_primary_key {
                create_sql.push_str(" PRIMARY KEY");
            }
            if column.non_null {
                create_sql.push_str(" NOT NULL");
            }
            if let Some(default_value) = column.default_value {
                create_sql.push_str(&format!(" DEFAULT {}", default_value));
            }
            if let Some(foreign_key) = column.foreign_key {
                create_sql.push_str(&format!(
                    " REFERENCES {}{}({})",
                    prefixes.get(self.prefix),
                    foreign_key.foreign_table,
                    foreign_key.foreign_column,
                ));
            }
        }

        for unique_constraint in self.unique_constraints {
            create_sql.push_str(&format!(", UNIQUE ({})", unique_constraint.join(", ")));
        }
        create_sql.push_str(");");
        conn.execute(&create_sql, params![])?;

        for (index_suffix, column_names) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {}{} ON {}({});",
                    prefixes.get(self.prefix),
                    index_suffix,
                    table_name,
                    column_names
                ),
                params![],
            )?;
        }
        Ok(())
    }

    /// Checks that the existing table has exactly the expected columns, in
    /// order, with matching type, nullability and primary key.
    pub fn validate(&self, conn: &Connection, prefixes: &TablePrefixes) -> Result<()> {
        let table_name = self.qualified_name(prefixes);
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table_name))?;
        let actual_columns = stmt
            .query_map(params![], |row| {
                Ok(ActualColumn {
                    name: row.get(1)?,
                    sql_type: row.get(2)?,
                    non_null: row.get::<_, i32>(3)? == 1,
                    is_primary_key: row.get::<_, i32>(5)? >= 1,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}. Found column names: {}, expected: {}",
                table_name,
                actual_columns.len(),
                self.columns.len(),
                actual_columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if !actual.name.eq_ignore_ascii_case(expected.name) {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    table_name,
                    expected.name,
                    actual.name
                );
            }
            let expected_type = expected.sql_type.render(Dialect::Sqlite);
            if !actual.sql_type.eq_ignore_ascii_case(expected_type) {
                bail!(
                    "Table {} column {} type mismatch: expected {}, got {}",
                    table_name,
                    expected.name,
                    expected_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} column {} non-null mismatch: expected {}, got {}",
                    table_name,
                    expected.name,
                    expected.non_null,
                    actual.non_null
                );
            }
            if actual.is_primary_key != expected.is_primary_key {
                bail!(
                    "Table {} column {} primary key mismatch: expected {}, got {}",
                    table_name,
                    expected.name,
                    expected.is_primary_key,
                    actual.is_primary_key
                );
            }
        }
        Ok(())
    }
}

struct ActualColumn {
    name: String,
    sql_type: String,
    non_null: bool,
    is_primary_key: bool,
}

/// The tables making up one physical layout.
pub struct TableSet {
    pub tables: &'static [Table],
}

impl TableSet {
    /// Creates the tables that are missing and validates the ones that exist.
    /// Returns the number of tables created.
    pub fn ensure(&self, conn: &Connection, prefixes: &TablePrefixes) -> Result<usize> {
        let mut created = 0;
        for table in self.tables {
            if table.exists(conn, prefixes)? {
                table.validate(conn, prefixes)?;
            } else {
                table.create(conn, prefixes)?;
                created += 1;
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARENT: Table = Table {
        name: "PARENT",
        prefix: TablePrefix::Job,
        columns: &[
            sqlite_column!("ID", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("NAME", &SqlType::Text, non_null = true),
            sqlite_column!("BODY", &SqlType::LongText),
        ],
        indices: &[("PARENT_NAME_IX", "NAME")],
        unique_constraints: &[],
    };

    const LINK: Table = Table {
        name: "LINK",
        prefix: TablePrefix::Task,
        columns: &[
            sqlite_column!("A", &SqlType::Integer, non_null = true),
            sqlite_column!("B", &SqlType::Integer, non_null = true),
            sqlite_column!("W", &SqlType::Real, default_value = Some("0")),
        ],
        indices: &[],
        unique_constraints: &[&["A", "B"]],
    };

    const SET: TableSet = TableSet {
        tables: &[PARENT, LINK],
    };

    const PREFIXES: TablePrefixes<'static> = TablePrefixes {
        job: "X_",
        task: "Y_",
    };

    #[test]
    fn test_ensure_creates_prefixed_tables() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(SET.ensure(&conn, &PREFIXES).unwrap(), 2);
        assert!(PARENT.exists(&conn, &PREFIXES).unwrap());
        assert!(LINK.exists(&conn, &PREFIXES).unwrap());
        conn.execute("INSERT INTO Y_LINK (A, B) VALUES (1, 2)", [])
            .unwrap();
        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'X_PARENT_NAME_IX'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(index_count, 1);
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        SET.ensure(&conn, &PREFIXES).unwrap();
        assert_eq!(SET.ensure(&conn, &PREFIXES).unwrap(), 0);
    }

    #[test]
    fn test_prefixes_keep_table_sets_apart() {
        let conn = Connection::open_in_memory().unwrap();
        SET.ensure(&conn, &PREFIXES).unwrap();
        let other = TablePrefixes {
            job: "Z_",
            task: "Y2_",
        };
        assert!(!PARENT.exists(&conn, &other).unwrap());
        assert_eq!(SET.ensure(&conn, &other).unwrap(), 2);
    }

    #[test]
    fn test_validate_detects_column_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE X_PARENT (ID INTEGER PRIMARY KEY, NAME TEXT)", [])
            .unwrap();
        let err = PARENT.validate(&conn, &PREFIXES).unwrap_err();
        assert!(err.to_string().contains("has 2 columns, expected 3"));
    }

    #[test]
    fn test_validate_detects_nullability_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE X_PARENT (ID INTEGER PRIMARY KEY, NAME TEXT, BODY TEXT)",
            [],
        )
        .unwrap();
        let err = PARENT.validate(&conn, &PREFIXES).unwrap_err();
        assert!(err.to_string().contains("non-null mismatch"));
    }
}
