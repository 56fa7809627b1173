//! SQLite source.
//!
//! Connection spec: `{"database": "/path/to/file.db"}`. The model query is
//! run as a subquery with `LIMIT`/`OFFSET` appended when the sync config asks
//! for a page.

use async_trait::async_trait;
use dashmap::DashMap;
use outflow_core::client::{ConnectionChecker, Discoverer, Reader};
use outflow_core::protocol::{
    Catalog, ConnectionStatus, ConnectorSpecification, RecordMessage, Stream, SyncConfig, SyncMode,
};
use outflow_core::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::instrument;

pub const CONNECTOR_NAME: &str = "sqlite";

#[derive(Debug, Deserialize)]
struct SqliteSpec {
    database: String,
}

impl SqliteSpec {
    fn parse(connection_spec: &Value) -> Result<Self> {
        let spec: Self = serde_json::from_value(connection_spec.clone())
            .map_err(|e| Error::InvalidInput(format!("sqlite connection spec: {e}")))?;
        if spec.database.trim().is_empty() {
            return Err(Error::InvalidInput(
                "sqlite connection spec: database is empty".to_string(),
            ));
        }
        Ok(spec)
    }
}

/// Read-only SQLite source. Pools are opened lazily and kept per database path.
#[derive(Default)]
pub struct SqliteSource {
    pools: DashMap<String, SqlitePool>,
}

impl SqliteSource {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pool(&self, connection_spec: &Value) -> Result<SqlitePool> {
        let spec = SqliteSpec::parse(connection_spec)?;
        if let Some(pool) = self.pools.get(&spec.database) {
            return Ok(pool.clone());
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", spec.database))
            .map_err(|e| Error::backend("sqlite source connect options", e))?
            .read_only(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("sqlite source connect", e))?;
        Ok(self
            .pools
            .entry(spec.database)
            .or_insert(pool)
            .value()
            .clone())
    }
}

fn paged_query(sync_config: &SyncConfig) -> String {
    let base = sync_config.model.query.trim().trim_end_matches(';').trim_end();
    match (sync_config.limit, sync_config.offset) {
        (None, None) => base.to_string(),
        (limit, offset) => {
            let limit = limit.map_or(-1, |l| l as i64);
            format!(
                "SELECT * FROM ({base}) AS page LIMIT {limit} OFFSET {}",
                offset.unwrap_or(0)
            )
        }
    }
}

fn row_to_map(row: &SqliteRow) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(i)
            .map_err(|e| Error::backend("sqlite source column", e))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" => json!(row.try_get::<i64, _>(i)?),
                "REAL" => json!(row.try_get::<f64, _>(i)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(i)?;
                    Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect())
                }
                _ => Value::String(row.try_get::<String, _>(i)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[async_trait]
impl ConnectionChecker for SqliteSource {
    #[instrument(level = "info", skip_all)]
    async fn check_connection(&self, connection_spec: &Value) -> Result<ConnectionStatus> {
        let pool = match self.pool(connection_spec).await {
            Ok(pool) => pool,
            Err(e @ Error::InvalidInput(_)) => return Err(e),
            Err(e) => return Ok(ConnectionStatus::failed(e.to_string())),
        };
        match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => Ok(ConnectionStatus::succeeded()),
            Err(e) => Ok(ConnectionStatus::failed(e.to_string())),
        }
    }
}

#[async_trait]
impl Discoverer for SqliteSource {
    #[instrument(level = "info", skip_all)]
    async fn discover(&self, connection_spec: &Value) -> Result<Catalog> {
        let pool = self.pool(connection_spec).await?;
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| Error::backend("sqlite source list tables", e))?;

        let mut streams = Vec::with_capacity(tables.len());
        for (table,) in tables {
            let columns: Vec<(String, String)> =
                sqlx::query_as("SELECT name, type FROM pragma_table_info(?)")
                    .bind(&table)
                    .fetch_all(&pool)
                    .await
                    .map_err(|e| Error::backend("sqlite source table info", e))?;
            let properties: Map<String, Value> = columns
                .into_iter()
                .map(|(name, ty)| (name, json!({"type": json_type(&ty)})))
                .collect();
            let mut stream = Stream::new(table);
            stream.json_schema = json!({"type": "object", "properties": properties});
            stream.supported_sync_modes = vec![SyncMode::FullRefresh, SyncMode::Incremental];
            streams.push(stream);
        }
        Ok(Catalog {
            streams,
            ..Catalog::default()
        })
    }

    fn connector_spec(&self) -> ConnectorSpecification {
        ConnectorSpecification {
            documentation_url: None,
            connection_specification: json!({
                "type": "object",
                "required": ["database"],
                "properties": {"database": {"type": "string"}},
            }),
            supports_normalization: false,
            supports_dbt: false,
            supported_destination_sync_modes: Vec::new(),
            stream_type: None,
        }
    }
}

fn json_type(sqlite_type: &str) -> &'static str {
    let t = sqlite_type.to_ascii_uppercase();
    if t.contains("INT") {
        "integer"
    } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") || t.contains("NUMERIC") {
        "number"
    } else if t.contains("BOOL") {
        "boolean"
    } else {
        "string"
    }
}

#[async_trait]
impl Reader for SqliteSource {
    #[instrument(level = "debug", skip_all, fields(sync_id = %sync_config.sync_id, limit = ?sync_config.limit, offset = ?sync_config.offset))]
    async fn read(&self, sync_config: &SyncConfig) -> Result<Vec<RecordMessage>> {
        let pool = self.pool(&sync_config.source.connection_spec).await?;
        let query = paged_query(sync_config);
        let rows = sqlx::query(&query)
            .fetch_all(&pool)
            .await
            .map_err(|e| Error::backend("sqlite source read", e))?;
        rows.iter()
            .map(|row| row_to_map(row).map(RecordMessage::new))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sync_config;
    use outflow_core::protocol::ConnectionStatusType;

    async fn seeded_db() -> String {
        let path = std::env::temp_dir().join(format!("outflow_src_{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&url).await.unwrap();
        sqlx::query("CREATE TABLE contacts (id INTEGER PRIMARY KEY, email TEXT, score REAL)")
            .execute(&pool)
            .await
            .unwrap();
        for i in 1..=5 {
            sqlx::query("INSERT INTO contacts (id, email, score) VALUES (?, ?, ?)")
                .bind(i)
                .bind(format!("u{i}@x.com"))
                .bind(i as f64 / 2.0)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
        path.display().to_string()
    }

    fn config(database: &str, query: &str) -> SyncConfig {
        sync_config(json!({"database": database}), json!({}), query)
    }

    #[tokio::test]
    async fn reads_a_page_with_typed_columns() {
        let db = seeded_db().await;
        let mut cfg = config(&db, "SELECT * FROM contacts ORDER BY id;");
        cfg.limit = Some(2);
        cfg.offset = Some(2);

        let records = SqliteSource::new().read(&cfg).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data["id"], json!(3));
        assert_eq!(records[0].data["email"], json!("u3@x.com"));
        assert_eq!(records[1].data["score"], json!(2.0));
    }

    #[tokio::test]
    async fn unpaged_read_returns_everything() {
        let db = seeded_db().await;
        let cfg = config(&db, "SELECT id FROM contacts");
        let records = SqliteSource::new().read(&cfg).await.unwrap();
        assert_eq!(records.len(), 5);
    }

    #[tokio::test]
    async fn discovers_tables_as_streams() {
        let db = seeded_db().await;
        let catalog = SqliteSource::new()
            .discover(&json!({"database": db}))
            .await
            .unwrap();
        let stream = catalog.find_stream("contacts").unwrap();
        assert_eq!(stream.json_schema["properties"]["score"]["type"], "number");
    }

    #[tokio::test]
    async fn check_reports_unreachable_database() {
        let missing = std::env::temp_dir().join(format!("outflow_missing_{}.db", uuid::Uuid::new_v4()));
        let status = SqliteSource::new()
            .check_connection(&json!({"database": missing.display().to_string()}))
            .await
            .unwrap();
        assert_eq!(status.status, ConnectionStatusType::Failed);

        let err = SqliteSource::new()
            .check_connection(&json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn bad_sql_is_a_backend_error() {
        let db = seeded_db().await;
        let cfg = config(&db, "SELECT * FROM nope");
        let err = SqliteSource::new().read(&cfg).await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }
}
