use crate::protocol::{QueryDialect, QueryType};
use crate::{Error, Result};

/// Builds "random sample" variants of a model query for previews.
pub struct RandomQueryBuilder;

impl RandomQueryBuilder {
    pub fn build_random_query(
        query: &str,
        query_type: QueryType,
        dialect: QueryDialect,
        limit: usize,
    ) -> Result<String> {
        if !query_type.is_sql() {
            return Err(Error::InvalidInput(format!(
                "random sampling is not supported for {query_type:?} queries"
            )));
        }
        if limit == 0 {
            return Err(Error::InvalidInput("sample limit must be > 0".to_string()));
        }
        let base = query.trim().trim_end_matches(';').trim_end();
        if base.is_empty() {
            return Err(Error::InvalidInput("query is empty".to_string()));
        }
        Ok(match dialect {
            QueryDialect::SqlServer => {
                format!("SELECT TOP {limit} * FROM ({base}) AS subquery ORDER BY NEWID()")
            }
            QueryDialect::Mysql | QueryDialect::BigQuery => {
                format!("SELECT * FROM ({base}) AS subquery ORDER BY RAND() LIMIT {limit}")
            }
            QueryDialect::Soql | QueryDialect::None => {
                return Err(Error::InvalidInput(format!(
                    "random sampling is not supported for the {dialect:?} dialect"
                )));
            }
            _ => format!("SELECT * FROM ({base}) AS subquery ORDER BY RANDOM() LIMIT {limit}"),
        })
    }
}
