//! Keyset pagination queries.
//!
//! A [`PagingQueryProvider`] renders three statements for one base selection:
//! the first page, a scalar lookup of the sort key that precedes a given
//! ordinal, and the keyset-bounded continuation seeded by that scalar. Rows
//! are always ordered by the sort key, descending.
//!
//! Statements use `?` placeholders. The continuation adds exactly one
//! placeholder, after any placeholders of the where clause.

mod dialect;

pub use dialect::Dialect;

use anyhow::{bail, Result};

/// Alias given to the sort key in jump-to-item queries.
const SORT_KEY_ALIAS: &str = "SORT_KEY";

/// Position from which a page is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// Sort key of the row preceding the page; `None` reads from the top.
    pub start_after: Option<i64>,
    /// Ordinal of the first row of the page.
    pub ordinal: u64,
}

impl PageCursor {
    pub fn first() -> Self {
        Self {
            start_after: None,
            ordinal: 0,
        }
    }

    pub fn after(sort_key: i64, ordinal: u64) -> Self {
        Self {
            start_after: Some(sort_key),
            ordinal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PagingQueryProvider {
    dialect: Dialect,
    select_clause: String,
    from_clause: String,
    where_clause: Option<String>,
    sort_key: String,
}

impl PagingQueryProvider {
    pub fn new(
        dialect: Dialect,
        select_clause: impl Into<String>,
        from_clause: impl Into<String>,
        where_clause: Option<String>,
        sort_key: impl Into<String>,
    ) -> Result<Self> {
        let select_clause = select_clause.into();
        let from_clause = from_clause.into();
        let sort_key = sort_key.into();

        if select_clause.trim().is_empty() {
            bail!("Paging query requires a select clause");
        }
        if from_clause.trim().is_empty() {
            bail!("Paging query requires a from clause");
        }
        if sort_key.is_empty()
            || !sort_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            bail!("Invalid sort key: {:?}", sort_key);
        }
        let where_clause = where_clause.filter(|w| !w.trim().is_empty());

        Ok(Self {
            dialect,
            select_clause,
            from_clause,
            where_clause,
            sort_key,
        })
    }

    fn where_sql(&self, with_keyset: bool) -> String {
        match (&self.where_clause, with_keyset) {
            (Some(w), true) => format!(" WHERE ({}) AND {} < ?", w, self.sort_key),
            (Some(w), false) => format!(" WHERE {}", w),
            (None, true) => format!(" WHERE {} < ?", self.sort_key),
            (None, false) => String::new(),
        }
    }

    fn order_by(&self) -> String {
        format!(" ORDER BY {} DESC", self.sort_key)
    }

    fn page_query(&self, page_size: u64, with_keyset: bool) -> String {
        let filter = self.where_sql(with_keyset);
        match self.dialect {
            Dialect::Sqlite | Dialect::Postgres | Dialect::MySql => format!(
                "SELECT {} FROM {}{}{} LIMIT {}",
                self.select_clause,
                self.from_clause,
                filter,
                self.order_by(),
                page_size
            ),
            Dialect::Oracle => format!(
                "SELECT * FROM (SELECT {} FROM {}{}{}) WHERE ROWNUM <= {}",
                self.select_clause,
                self.from_clause,
                filter,
                self.order_by(),
                page_size
            ),
            Dialect::SqlServer => format!(
                "SELECT TOP {} {} FROM {}{}{}",
                page_size,
                self.select_clause,
                self.from_clause,
                filter,
                self.order_by()
            ),
        }
    }

    /// First page, no keyset bound.
    pub fn first_page_query(&self, page_size: u64) -> String {
        self.page_query(page_size, false)
    }

    /// Page bounded by the sort key returned from [`Self::jump_to_item_query`].
    pub fn remaining_pages_query(&self, page_size: u64) -> String {
        self.page_query(page_size, true)
    }

    /// Scalar query selecting the sort key of the row right before
    /// `start_ordinal`. Returns `None` when `start_ordinal` is 0: the first
    /// page needs no lookup.
    pub fn jump_to_item_query(&self, start_ordinal: u64) -> Option<String> {
        let offset = start_ordinal.checked_sub(1)?;
        let filter = self.where_sql(false);
        let sql = match self.dialect {
            Dialect::Sqlite | Dialect::MySql => format!(
                "SELECT {} AS {} FROM {}{}{} LIMIT {}, 1",
                self.sort_key,
                SORT_KEY_ALIAS,
                self.from_clause,
                filter,
                self.order_by(),
                offset
            ),
            Dialect::Postgres => format!(
                "SELECT {} AS {} FROM {}{}{} LIMIT 1 OFFSET {}",
                self.sort_key,
                SORT_KEY_ALIAS,
                self.from_clause,
                filter,
                self.order_by(),
                offset
            ),
            Dialect::Oracle => format!(
                "SELECT {alias} FROM (SELECT {alias}, ROWNUM AS TMP_ROW_NUM FROM (SELECT {key} AS {alias} FROM {from}{filter}{order})) WHERE TMP_ROW_NUM = {row}",
                alias = SORT_KEY_ALIAS,
                key = self.sort_key,
                from = self.from_clause,
                filter = filter,
                order = self.order_by(),
                row = offset + 1
            ),
            Dialect::SqlServer => format!(
                "SELECT {alias} FROM (SELECT {key} AS {alias}, ROW_NUMBER() OVER ({order}) AS ROW_NUMBER FROM {from}{filter}) AS TMP_SUB WHERE TMP_SUB.ROW_NUMBER = {row}",
                alias = SORT_KEY_ALIAS,
                key = self.sort_key,
                order = self.order_by().trim_start(),
                from = self.from_clause,
                filter = filter,
                row = offset + 1
            ),
        };
        Some(sql)
    }
}
