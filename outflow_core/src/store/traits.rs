use crate::models::{ListQuery, SyncId, SyncRunId};
use crate::sync_run::models::{
    RecordCounts, SyncDefinition, SyncRecord, SyncRecordUpdate, SyncRun, SyncRunStatus,
};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Storage the engine needs for syncs, their runs, and per-record change state.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn upsert_sync(&self, sync: &SyncDefinition) -> Result<()>;
    async fn get_sync(&self, sync_id: SyncId) -> Result<Option<SyncDefinition>>;
    async fn list_syncs(&self, query: ListQuery) -> Result<Vec<SyncDefinition>>;
    async fn update_sync_cursor(&self, sync_id: SyncId, cursor: &str) -> Result<()>;
    async fn set_sync_workflow_id(&self, sync_id: SyncId, workflow_id: Option<&str>)
    -> Result<()>;

    /// Return the pending run for `(candidate.sync_id, candidate.run_type)`,
    /// inserting `candidate` when there is none. Atomic with respect to
    /// concurrent callers.
    async fn find_or_create_pending_run(&self, candidate: &SyncRun) -> Result<SyncRun>;
    async fn get_sync_run(&self, id: SyncRunId) -> Result<Option<SyncRun>>;
    /// Persist `run` only if the stored status still equals `expected`.
    /// Returns whether the write happened.
    async fn compare_and_set_sync_run(&self, run: &SyncRun, expected: SyncRunStatus)
    -> Result<bool>;
    /// Newest first.
    async fn list_sync_runs(&self, sync_id: SyncId, query: ListQuery) -> Result<Vec<SyncRun>>;
    /// Most recent non-terminal run of the sync, if any.
    async fn active_sync_run(&self, sync_id: SyncId) -> Result<Option<SyncRun>>;

    /// Latest fingerprint per primary key across the sync's runs, counting
    /// only delivered records and records still pending in `current_run`.
    /// Failed or abandoned records are ignored so they are re-sent.
    async fn latest_fingerprints(
        &self,
        sync_id: SyncId,
        current_run: SyncRunId,
        primary_keys: &[String],
    ) -> Result<HashMap<String, String>>;
    /// Insert a batch atomically. A record for the same `(sync_run_id,
    /// primary_key)` is replaced and reset to pending.
    async fn insert_sync_records(&self, records: &[SyncRecord]) -> Result<()>;
    /// Oldest pending records of the run, up to `limit`.
    async fn pending_sync_records(&self, run_id: SyncRunId, limit: usize)
    -> Result<Vec<SyncRecord>>;
    async fn update_sync_records(&self, updates: &[SyncRecordUpdate]) -> Result<()>;
    async fn count_sync_records(&self, run_id: SyncRunId) -> Result<RecordCounts>;
    async fn list_sync_records(&self, run_id: SyncRunId, query: ListQuery)
    -> Result<Vec<SyncRecord>>;
}
