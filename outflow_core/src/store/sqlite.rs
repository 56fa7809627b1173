//! SQLite-backed SyncStore.
//!
//! Single-node deployments keep sync definitions, run history and record
//! fingerprints in one WAL-mode database file.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::models::{ListQuery, SyncId, SyncRecordId, SyncRunId, WorkspaceId};
use crate::store::traits::SyncStore;
use crate::sync_run::models::{
    RecordCounts, RunType, SyncDefinition, SyncRecord, SyncRecordAction, SyncRecordStatus,
    SyncRecordUpdate, SyncRun, SyncRunStatus,
};
use crate::{Error, Result};

/// SQLite's default host parameter limit is 999; stay well below it.
const MAX_IN_PARAMS: usize = 500;

#[derive(Clone)]
pub struct SqliteSyncStore {
    pool: SqlitePool,
}

impl SqliteSyncStore {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::backend("sqlite_sync_store mkdir", e))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| Error::backend("sqlite_sync_store connect options", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("sqlite_sync_store connect", e))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("sqlite_sync_store schema", e))?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS syncs (
  id TEXT PRIMARY KEY,
  workspace_id TEXT NOT NULL,
  definition_json TEXT NOT NULL,
  current_cursor_field TEXT NULL,
  workflow_id TEXT NULL,
  enabled INTEGER NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS syncs_workspace_idx ON syncs(workspace_id);

CREATE TABLE IF NOT EXISTS sync_runs (
  id TEXT PRIMARY KEY,
  sync_id TEXT NOT NULL,
  workspace_id TEXT NOT NULL,
  status TEXT NOT NULL,
  run_type TEXT NOT NULL,
  started_at TEXT NULL,
  finished_at TEXT NULL,
  total_rows INTEGER NOT NULL DEFAULT 0,
  successful_rows INTEGER NOT NULL DEFAULT 0,
  failed_rows INTEGER NOT NULL DEFAULT 0,
  workflow_run_id TEXT NULL,
  error TEXT NULL,
  cursor TEXT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS sync_runs_one_pending_idx
  ON sync_runs(sync_id, run_type) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS sync_runs_sync_created_idx ON sync_runs(sync_id, created_at DESC);

CREATE TABLE IF NOT EXISTS sync_records (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  sync_id TEXT NOT NULL,
  sync_run_id TEXT NOT NULL,
  primary_key TEXT NOT NULL,
  fingerprint TEXT NOT NULL,
  record TEXT NOT NULL,
  action TEXT NOT NULL,
  status TEXT NOT NULL,
  error TEXT NULL,
  logs TEXT NOT NULL DEFAULT '[]',
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS sync_records_run_pk_idx ON sync_records(sync_run_id, primary_key);
CREATE INDEX IF NOT EXISTS sync_records_sync_pk_idx ON sync_records(sync_id, primary_key, seq);
CREATE INDEX IF NOT EXISTS sync_records_run_status_idx ON sync_records(sync_run_id, status, seq);
"#;

const RUN_COLUMNS: &str = "id, sync_id, workspace_id, status, run_type, started_at, finished_at, \
     total_rows, successful_rows, failed_rows, workflow_run_id, error, cursor, created_at, updated_at";

const RECORD_COLUMNS: &str = "id, sync_id, sync_run_id, primary_key, fingerprint, record, action, \
     status, error, logs, created_at, updated_at";

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn upsert_sync(&self, sync: &SyncDefinition) -> Result<()> {
        sync.validate()?;
        let definition_json =
            serde_json::to_string(sync).map_err(|e| Error::backend("serialize sync", e))?;
        sqlx::query(
            r#"
INSERT INTO syncs
  (id, workspace_id, definition_json, current_cursor_field, workflow_id, enabled, created_at, updated_at)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(id) DO UPDATE SET
  workspace_id = excluded.workspace_id,
  definition_json = excluded.definition_json,
  current_cursor_field = excluded.current_cursor_field,
  workflow_id = excluded.workflow_id,
  enabled = excluded.enabled,
  updated_at = excluded.updated_at
"#,
        )
        .bind(sync.id.to_string())
        .bind(sync.workspace_id.to_string())
        .bind(definition_json)
        .bind(&sync.current_cursor_field)
        .bind(&sync.workflow_id)
        .bind(sync.enabled)
        .bind(fmt_dt(sync.created_at))
        .bind(fmt_dt(sync.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_sync(&self, sync_id: SyncId) -> Result<Option<SyncDefinition>> {
        let row = sqlx::query(
            r#"
SELECT definition_json, current_cursor_field, workflow_id, enabled, updated_at
FROM syncs WHERE id = ?1
"#,
        )
        .bind(sync_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_sync).transpose()
    }

    async fn list_syncs(&self, query: ListQuery) -> Result<Vec<SyncDefinition>> {
        let rows = sqlx::query(
            r#"
SELECT definition_json, current_cursor_field, workflow_id, enabled, updated_at
FROM syncs
ORDER BY created_at ASC, id ASC
LIMIT ?1 OFFSET ?2
"#,
        )
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sync).collect()
    }

    async fn update_sync_cursor(&self, sync_id: SyncId, cursor: &str) -> Result<()> {
        let res = sqlx::query(
            "UPDATE syncs SET current_cursor_field = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(sync_id.to_string())
        .bind(cursor)
        .bind(fmt_dt(Utc::now()))
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("sync {sync_id}")));
        }
        Ok(())
    }

    async fn set_sync_workflow_id(
        &self,
        sync_id: SyncId,
        workflow_id: Option<&str>,
    ) -> Result<()> {
        let res = sqlx::query("UPDATE syncs SET workflow_id = ?2 WHERE id = ?1")
            .bind(sync_id.to_string())
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("sync {sync_id}")));
        }
        Ok(())
    }

    async fn find_or_create_pending_run(&self, candidate: &SyncRun) -> Result<SyncRun> {
        if candidate.status != SyncRunStatus::Pending {
            return Err(Error::InvalidInput(
                "find_or_create_pending_run requires a pending candidate".to_string(),
            ));
        }
        sqlx::query(&format!(
            r#"
INSERT INTO sync_runs ({RUN_COLUMNS})
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
ON CONFLICT DO NOTHING
"#
        ))
        .bind(candidate.id.to_string())
        .bind(candidate.sync_id.to_string())
        .bind(candidate.workspace_id.to_string())
        .bind(candidate.status.as_str())
        .bind(candidate.run_type.as_str())
        .bind(candidate.started_at.map(fmt_dt))
        .bind(candidate.finished_at.map(fmt_dt))
        .bind(candidate.total_rows as i64)
        .bind(candidate.successful_rows as i64)
        .bind(candidate.failed_rows as i64)
        .bind(&candidate.workflow_run_id)
        .bind(&candidate.error)
        .bind(&candidate.cursor)
        .bind(fmt_dt(candidate.created_at))
        .bind(fmt_dt(candidate.updated_at))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            r#"
SELECT {RUN_COLUMNS} FROM sync_runs
WHERE sync_id = ?1 AND run_type = ?2 AND status = 'pending'
LIMIT 1
"#
        ))
        .bind(candidate.sync_id.to_string())
        .bind(candidate.run_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_run(&row),
            // The pending run we collided with moved on between the two
            // statements; report it instead of creating a second run.
            None => Err(Error::Conflict(format!(
                "pending run for sync {} changed concurrently",
                candidate.sync_id
            ))),
        }
    }

    async fn get_sync_run(&self, id: SyncRunId) -> Result<Option<SyncRun>> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn compare_and_set_sync_run(
        &self,
        run: &SyncRun,
        expected: SyncRunStatus,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE sync_runs SET
  status = ?3,
  started_at = ?4,
  finished_at = ?5,
  total_rows = ?6,
  successful_rows = ?7,
  failed_rows = ?8,
  workflow_run_id = ?9,
  error = ?10,
  cursor = ?11,
  updated_at = ?12
WHERE id = ?1 AND status = ?2
"#,
        )
        .bind(run.id.to_string())
        .bind(expected.as_str())
        .bind(run.status.as_str())
        .bind(run.started_at.map(fmt_dt))
        .bind(run.finished_at.map(fmt_dt))
        .bind(run.total_rows as i64)
        .bind(run.successful_rows as i64)
        .bind(run.failed_rows as i64)
        .bind(&run.workflow_run_id)
        .bind(&run.error)
        .bind(&run.cursor)
        .bind(fmt_dt(run.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_sync_runs(&self, sync_id: SyncId, query: ListQuery) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {RUN_COLUMNS} FROM sync_runs
WHERE sync_id = ?1
ORDER BY created_at DESC, rowid DESC
LIMIT ?2 OFFSET ?3
"#
        ))
        .bind(sync_id.to_string())
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }

    async fn active_sync_run(&self, sync_id: SyncId) -> Result<Option<SyncRun>> {
        let row = sqlx::query(&format!(
            r#"
SELECT {RUN_COLUMNS} FROM sync_runs
WHERE sync_id = ?1
  AND status NOT IN ('complete', 'partial_success', 'failed', 'canceled')
ORDER BY created_at DESC, rowid DESC
LIMIT 1
"#
        ))
        .bind(sync_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn latest_fingerprints(
        &self,
        sync_id: SyncId,
        current_run: SyncRunId,
        primary_keys: &[String],
    ) -> Result<HashMap<String, String>> {
        let mut out = HashMap::with_capacity(primary_keys.len());
        for chunk in primary_keys.chunks(MAX_IN_PARAMS) {
            let placeholders: Vec<String> = (0..chunk.len()).map(|i| format!("?{}", i + 3)).collect();
            let sql = format!(
                r#"
SELECT primary_key, fingerprint FROM sync_records
WHERE sync_id = ?1
  AND (status = 'success' OR (status = 'pending' AND sync_run_id = ?2))
  AND primary_key IN ({})
ORDER BY seq ASC
"#,
                placeholders.join(", ")
            );
            let mut q = sqlx::query(&sql)
                .bind(sync_id.to_string())
                .bind(current_run.to_string());
            for pk in chunk {
                q = q.bind(pk);
            }
            // Ascending order: later rows overwrite earlier ones.
            for row in q.fetch_all(&self.pool).await? {
                out.insert(row.get("primary_key"), row.get("fingerprint"));
            }
        }
        Ok(out)
    }

    async fn insert_sync_records(&self, records: &[SyncRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for r in records {
            let record_json = serde_json::to_string(&r.record)
                .map_err(|e| Error::backend("serialize sync record", e))?;
            let logs_json = serde_json::to_string(&r.logs)
                .map_err(|e| Error::backend("serialize sync record logs", e))?;
            sqlx::query(&format!(
                r#"
INSERT INTO sync_records ({RECORD_COLUMNS})
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT(sync_run_id, primary_key) DO UPDATE SET
  fingerprint = excluded.fingerprint,
  record = excluded.record,
  action = excluded.action,
  status = 'pending',
  error = NULL,
  updated_at = excluded.updated_at
"#
            ))
            .bind(r.id.to_string())
            .bind(r.sync_id.to_string())
            .bind(r.sync_run_id.to_string())
            .bind(&r.primary_key)
            .bind(&r.fingerprint)
            .bind(record_json)
            .bind(r.action.as_str())
            .bind(r.status.as_str())
            .bind(&r.error)
            .bind(logs_json)
            .bind(fmt_dt(r.created_at))
            .bind(fmt_dt(r.updated_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn pending_sync_records(
        &self,
        run_id: SyncRunId,
        limit: usize,
    ) -> Result<Vec<SyncRecord>> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {RECORD_COLUMNS} FROM sync_records
WHERE sync_run_id = ?1 AND status = 'pending'
ORDER BY seq ASC
LIMIT ?2
"#
        ))
        .bind(run_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn update_sync_records(&self, updates: &[SyncRecordUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let now = fmt_dt(Utc::now());
        let mut tx = self.pool.begin().await?;
        for u in updates {
            let logs_json = serde_json::to_string(&u.logs)
                .map_err(|e| Error::backend("serialize sync record logs", e))?;
            sqlx::query(
                "UPDATE sync_records SET status = ?2, error = ?3, logs = ?4, updated_at = ?5 WHERE id = ?1",
            )
            .bind(u.id.to_string())
            .bind(u.status.as_str())
            .bind(&u.error)
            .bind(logs_json)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count_sync_records(&self, run_id: SyncRunId) -> Result<RecordCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM sync_records WHERE sync_run_id = ?1 GROUP BY status",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut counts = RecordCounts::default();
        for row in rows {
            let n = row.get::<i64, _>("n").max(0) as u64;
            counts.total += n;
            match SyncRecordStatus::parse(row.get::<String, _>("status").as_str())? {
                SyncRecordStatus::Pending => counts.pending += n,
                SyncRecordStatus::Success => counts.success += n,
                SyncRecordStatus::Failed => counts.failed += n,
            }
        }
        Ok(counts)
    }

    async fn list_sync_records(
        &self,
        run_id: SyncRunId,
        query: ListQuery,
    ) -> Result<Vec<SyncRecord>> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {RECORD_COLUMNS} FROM sync_records
WHERE sync_run_id = ?1
ORDER BY seq ASC
LIMIT ?2 OFFSET ?3
"#
        ))
        .bind(run_id.to_string())
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_sync(row: &SqliteRow) -> Result<SyncDefinition> {
    let definition_json: String = row.get("definition_json");
    let mut sync: SyncDefinition = serde_json::from_str(&definition_json)
        .map_err(|e| Error::backend("decode sync definition", e))?;
    // Columns written by the engine win over the stored definition.
    sync.current_cursor_field = row.get("current_cursor_field");
    sync.workflow_id = row.get("workflow_id");
    sync.enabled = row.get::<i64, _>("enabled") != 0;
    sync.updated_at = parse_dt(row.get::<String, _>("updated_at").as_str())?;
    Ok(sync)
}

fn row_to_run(row: &SqliteRow) -> Result<SyncRun> {
    let started_at: Option<String> = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");
    Ok(SyncRun {
        id: parse_id::<SyncRunId>(row, "id")?,
        sync_id: parse_id::<SyncId>(row, "sync_id")?,
        workspace_id: parse_id::<WorkspaceId>(row, "workspace_id")?,
        status: SyncRunStatus::parse(row.get::<String, _>("status").as_str())?,
        run_type: RunType::parse(row.get::<String, _>("run_type").as_str())?,
        started_at: started_at.as_deref().map(parse_dt).transpose()?,
        finished_at: finished_at.as_deref().map(parse_dt).transpose()?,
        total_rows: row.get::<i64, _>("total_rows").max(0) as u64,
        successful_rows: row.get::<i64, _>("successful_rows").max(0) as u64,
        failed_rows: row.get::<i64, _>("failed_rows").max(0) as u64,
        workflow_run_id: row.get("workflow_run_id"),
        error: row.get("error"),
        cursor: row.get("cursor"),
        created_at: parse_dt(row.get::<String, _>("created_at").as_str())?,
        updated_at: parse_dt(row.get::<String, _>("updated_at").as_str())?,
    })
}

fn row_to_record(row: &SqliteRow) -> Result<SyncRecord> {
    let record_json: String = row.get("record");
    let logs_json: String = row.get("logs");
    Ok(SyncRecord {
        id: parse_id::<SyncRecordId>(row, "id")?,
        sync_id: parse_id::<SyncId>(row, "sync_id")?,
        sync_run_id: parse_id::<SyncRunId>(row, "sync_run_id")?,
        primary_key: row.get("primary_key"),
        fingerprint: row.get("fingerprint"),
        record: serde_json::from_str(&record_json)
            .map_err(|e| Error::backend("decode sync record", e))?,
        action: SyncRecordAction::parse(row.get::<String, _>("action").as_str())?,
        status: SyncRecordStatus::parse(row.get::<String, _>("status").as_str())?,
        error: row.get("error"),
        logs: serde_json::from_str(&logs_json)
            .map_err(|e| Error::backend("decode sync record logs", e))?,
        created_at: parse_dt(row.get::<String, _>("created_at").as_str())?,
        updated_at: parse_dt(row.get::<String, _>("updated_at").as_str())?,
    })
}

fn parse_id<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(column);
    raw.parse::<T>()
        .map_err(|e| Error::backend(format!("parse {column}"), e))
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    // Fixed precision keeps lexicographic order equal to time order.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::backend("parse datetime", e))
}
