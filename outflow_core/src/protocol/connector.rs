use crate::models::ConnectorId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Source,
    Destination,
}

/// SQL flavour a source speaks. Drives cursor and sampling query rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDialect {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
    Snowflake,
    BigQuery,
    Redshift,
    Databricks,
    SqlServer,
    /// Salesforce Object Query Language.
    Soql,
    /// The source does not accept queries (APIs, files).
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub name: String,
    pub connector_type: ConnectorType,
    /// Registry key of the client implementation, e.g. `sqlite` or `http`.
    pub connector_name: String,
    /// Opaque configuration blob handed to the client.
    #[serde(default)]
    pub connection_spec: Value,
    #[serde(default)]
    pub query_dialect: QueryDialect,
}

impl Connector {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("connector name is empty".to_string()));
        }
        if self.connector_name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "connector connector_name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    RawSql,
    Soql,
    /// Table selector; the query is a fully rendered `SELECT`.
    Table,
    /// Prompt for an AI/ML source.
    AiMl,
    /// Template with `{{ var }}` placeholders rendered by the paginator.
    Template,
}

impl QueryType {
    pub fn is_sql(&self) -> bool {
        matches!(self, QueryType::RawSql | QueryType::Table)
    }
}

/// A named query against a source plus the field that identifies a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub query: String,
    pub query_type: QueryType,
    pub primary_key: String,
}

impl Model {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::InvalidInput("model query is empty".to_string()));
        }
        if self.primary_key.trim().is_empty() {
            return Err(Error::InvalidInput("model primary_key is empty".to_string()));
        }
        Ok(())
    }
}
