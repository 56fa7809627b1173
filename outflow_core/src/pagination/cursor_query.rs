use crate::protocol::{QueryDialect, SyncConfig};
use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier regex"));

/// Rewrites a model query so it resumes from a cursor value.
pub struct CursorQueryBuilder;

impl CursorQueryBuilder {
    /// `SELECT * FROM (<query>) AS subquery [WHERE "<field>" >= '<value>'] ORDER BY "<field>" ASC`
    pub fn build_cursor_query(
        query: &str,
        cursor_field: &str,
        current_value: Option<&str>,
        dialect: QueryDialect,
    ) -> Result<String> {
        let base = query.trim().trim_end_matches(';').trim_end();
        if base.is_empty() {
            return Err(Error::InvalidInput("query is empty".to_string()));
        }
        let field = quote_identifier(cursor_field, dialect)?;
        let mut out = format!("SELECT * FROM ({base}) AS subquery");
        if let Some(value) = current_value {
            out.push_str(&format!(" WHERE {field} >= '{}'", value.replace('\'', "''")));
        }
        out.push_str(&format!(" ORDER BY {field} ASC"));
        Ok(out)
    }

    /// Copy of `sync_config` whose query resumes from `current_cursor_field`.
    /// Configs without a cursor field are returned unchanged.
    pub fn build_cursor_sync_config(sync_config: &SyncConfig) -> Result<SyncConfig> {
        let Some(field) = sync_config.cursor_field.as_deref() else {
            return Ok(sync_config.clone());
        };
        let query = Self::build_cursor_query(
            &sync_config.model.query,
            field,
            sync_config.current_cursor_field.as_deref(),
            sync_config.source.query_dialect,
        )?;
        Ok(sync_config.with_query(query))
    }
}

fn quote_identifier(name: &str, dialect: QueryDialect) -> Result<String> {
    if !IDENTIFIER.is_match(name) {
        return Err(Error::InvalidInput(format!(
            "cursor field {name:?} is not a plain identifier"
        )));
    }
    Ok(match dialect {
        QueryDialect::Mysql | QueryDialect::BigQuery | QueryDialect::Databricks => {
            format!("`{name}`")
        }
        QueryDialect::SqlServer => format!("[{name}]"),
        _ => format!("\"{name}\""),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_only_orders() {
        let q = CursorQueryBuilder::build_cursor_query(
            "SELECT * FROM users;",
            "updated_at",
            None,
            QueryDialect::Postgres,
        )
        .unwrap();
        assert_eq!(
            q,
            r#"SELECT * FROM (SELECT * FROM users) AS subquery ORDER BY "updated_at" ASC"#
        );
    }

    #[test]
    fn resumes_from_value_and_escapes_quotes() {
        let q = CursorQueryBuilder::build_cursor_query(
            "SELECT * FROM users",
            "name",
            Some("O'Brien"),
            QueryDialect::Postgres,
        )
        .unwrap();
        assert_eq!(
            q,
            r#"SELECT * FROM (SELECT * FROM users) AS subquery WHERE "name" >= 'O''Brien' ORDER BY "name" ASC"#
        );
    }

    #[test]
    fn quotes_per_dialect() {
        let q = CursorQueryBuilder::build_cursor_query("SELECT 1", "ts", Some("1"), QueryDialect::Mysql)
            .unwrap();
        assert!(q.contains("WHERE `ts` >= '1'"));
        let q =
            CursorQueryBuilder::build_cursor_query("SELECT 1", "ts", None, QueryDialect::SqlServer)
                .unwrap();
        assert!(q.ends_with("ORDER BY [ts] ASC"));
    }

    #[test]
    fn rejects_non_identifier_cursor() {
        let err = CursorQueryBuilder::build_cursor_query(
            "SELECT 1",
            "ts; DROP TABLE x",
            None,
            QueryDialect::Postgres,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
