use crate::models::{ListQuery, SyncId, SyncRunId};
use crate::store::traits::SyncStore;
use crate::sync_run::models::{
    RecordCounts, SyncDefinition, SyncRecord, SyncRecordStatus, SyncRecordUpdate, SyncRun,
    SyncRunStatus,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    syncs: HashMap<SyncId, SyncDefinition>,
    runs: Vec<SyncRun>,
    /// Insertion order doubles as recency.
    records: Vec<SyncRecord>,
}

/// In-memory SyncStore for local development and unit tests.
#[derive(Clone, Default)]
pub struct MemorySyncStore {
    state: Arc<Mutex<State>>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record across all runs (primarily for tests).
    pub async fn all_records(&self) -> Vec<SyncRecord> {
        self.state.lock().await.records.clone()
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn upsert_sync(&self, sync: &SyncDefinition) -> Result<()> {
        sync.validate()?;
        self.state.lock().await.syncs.insert(sync.id, sync.clone());
        Ok(())
    }

    async fn get_sync(&self, sync_id: SyncId) -> Result<Option<SyncDefinition>> {
        Ok(self.state.lock().await.syncs.get(&sync_id).cloned())
    }

    async fn list_syncs(&self, query: ListQuery) -> Result<Vec<SyncDefinition>> {
        let state = self.state.lock().await;
        let mut syncs: Vec<SyncDefinition> = state.syncs.values().cloned().collect();
        syncs.sort_by_key(|s| (s.created_at, s.id));
        Ok(syncs
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn update_sync_cursor(&self, sync_id: SyncId, cursor: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let sync = state
            .syncs
            .get_mut(&sync_id)
            .ok_or_else(|| Error::NotFound(format!("sync {sync_id}")))?;
        sync.current_cursor_field = Some(cursor.to_string());
        sync.updated_at = Utc::now();
        Ok(())
    }

    async fn set_sync_workflow_id(
        &self,
        sync_id: SyncId,
        workflow_id: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let sync = state
            .syncs
            .get_mut(&sync_id)
            .ok_or_else(|| Error::NotFound(format!("sync {sync_id}")))?;
        sync.workflow_id = workflow_id.map(str::to_string);
        Ok(())
    }

    async fn find_or_create_pending_run(&self, candidate: &SyncRun) -> Result<SyncRun> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.runs.iter().find(|r| {
            r.sync_id == candidate.sync_id
                && r.run_type == candidate.run_type
                && r.status == SyncRunStatus::Pending
        }) {
            return Ok(existing.clone());
        }
        state.runs.push(candidate.clone());
        Ok(candidate.clone())
    }

    async fn get_sync_run(&self, id: SyncRunId) -> Result<Option<SyncRun>> {
        Ok(self
            .state
            .lock()
            .await
            .runs
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn compare_and_set_sync_run(
        &self,
        run: &SyncRun,
        expected: SyncRunStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let stored = state
            .runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or_else(|| Error::NotFound(format!("sync run {}", run.id)))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = run.clone();
        Ok(true)
    }

    async fn list_sync_runs(&self, sync_id: SyncId, query: ListQuery) -> Result<Vec<SyncRun>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .rev()
            .filter(|r| r.sync_id == sync_id)
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn active_sync_run(&self, sync_id: SyncId) -> Result<Option<SyncRun>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .rev()
            .find(|r| r.sync_id == sync_id && !r.status.is_terminal())
            .cloned())
    }

    async fn latest_fingerprints(
        &self,
        sync_id: SyncId,
        current_run: SyncRunId,
        primary_keys: &[String],
    ) -> Result<HashMap<String, String>> {
        let state = self.state.lock().await;
        let mut out = HashMap::new();
        for r in state.records.iter() {
            if r.sync_id != sync_id {
                continue;
            }
            let counts = match r.status {
                SyncRecordStatus::Success => true,
                SyncRecordStatus::Pending => r.sync_run_id == current_run,
                SyncRecordStatus::Failed => false,
            };
            if !counts {
                continue;
            }
            if primary_keys.contains(&r.primary_key) {
                out.insert(r.primary_key.clone(), r.fingerprint.clone());
            }
        }
        Ok(out)
    }

    async fn insert_sync_records(&self, records: &[SyncRecord]) -> Result<()> {
        let mut state = self.state.lock().await;
        for record in records {
            match state.records.iter_mut().find(|r| {
                r.sync_run_id == record.sync_run_id && r.primary_key == record.primary_key
            }) {
                Some(existing) => {
                    existing.fingerprint = record.fingerprint.clone();
                    existing.record = record.record.clone();
                    existing.action = record.action;
                    existing.status = SyncRecordStatus::Pending;
                    existing.error = None;
                    existing.updated_at = record.updated_at;
                }
                None => state.records.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn pending_sync_records(
        &self,
        run_id: SyncRunId,
        limit: usize,
    ) -> Result<Vec<SyncRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.sync_run_id == run_id && r.status == SyncRecordStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_sync_records(&self, updates: &[SyncRecordUpdate]) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        for update in updates {
            let record = state
                .records
                .iter_mut()
                .find(|r| r.id == update.id)
                .ok_or_else(|| Error::NotFound(format!("sync record {}", update.id)))?;
            record.status = update.status;
            record.error = update.error.clone();
            record.logs = update.logs.clone();
            record.updated_at = now;
        }
        Ok(())
    }

    async fn count_sync_records(&self, run_id: SyncRunId) -> Result<RecordCounts> {
        let state = self.state.lock().await;
        let mut counts = RecordCounts::default();
        for r in state.records.iter().filter(|r| r.sync_run_id == run_id) {
            counts.total += 1;
            match r.status {
                SyncRecordStatus::Pending => counts.pending += 1,
                SyncRecordStatus::Success => counts.success += 1,
                SyncRecordStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn list_sync_records(
        &self,
        run_id: SyncRunId,
        query: ListQuery,
    ) -> Result<Vec<SyncRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.sync_run_id == run_id)
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }
}
