/// SQL flavours the paging queries can be rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
    Oracle,
    SqlServer,
}

impl Dialect {
    /// Column type used for unbounded text such as serialized contexts.
    pub fn long_text_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite | Dialect::Postgres => "TEXT",
            Dialect::MySql => "LONGTEXT",
            Dialect::Oracle => "CLOB",
            Dialect::SqlServer => "NVARCHAR(MAX)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_text_type() {
        assert_eq!(Dialect::Sqlite.long_text_type(), "TEXT");
        assert_eq!(Dialect::MySql.long_text_type(), "LONGTEXT");
        assert_eq!(Dialect::Oracle.long_text_type(), "CLOB");
        assert_eq!(Dialect::SqlServer.long_text_type(), "NVARCHAR(MAX)");
    }
}
