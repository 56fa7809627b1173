//! Extraction: page through a source and persist per-record change state.

pub mod fingerprint;
pub mod full_refresh;
pub mod incremental_delta;

pub use fingerprint::{canonical_json, fingerprint, primary_key_value, sha256_hex};
pub use full_refresh::FullRefresh;
pub use incremental_delta::IncrementalDelta;

use crate::activities::context::ActivityContext;
use crate::client::{ClientRegistry, GuardedSource};
use crate::models::SyncRunId;
use crate::pagination::{Batch, BatchQuery, PaginationVariables, Paginator};
use crate::protocol::{QueryType, RecordMessage, SyncConfig, SyncMode};
use crate::store::SyncStore;
use crate::sync_run::models::{SyncDefinition, SyncRecord, SyncRun};
use crate::sync_run::state_machine::{SyncRunEvent, Transition, transition};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// What an extraction did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractSummary {
    pub sync_run_id: SyncRunId,
    pub batches: u64,
    pub records_read: u64,
    pub records_written: u64,
    /// The run was past `started` and nothing was done.
    pub skipped: bool,
    pub cancelled: bool,
    /// Read error recorded on the run.
    pub error: Option<String>,
    pub cursor: Option<String>,
}

impl ExtractSummary {
    fn new(sync_run_id: SyncRunId) -> Self {
        Self {
            sync_run_id,
            batches: 0,
            records_read: 0,
            records_written: 0,
            skipped: false,
            cancelled: false,
            error: None,
            cursor: None,
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn read(&self, sync_run_id: SyncRunId, ctx: &dyn ActivityContext)
    -> Result<ExtractSummary>;
}

/// Turns one page of source records into the SyncRecords to persist.
#[async_trait]
pub trait ExtractStrategy: Send + Sync {
    async fn plan_batch(
        &self,
        store: &dyn SyncStore,
        sync: &SyncDefinition,
        run: &SyncRun,
        records: Vec<RecordMessage>,
    ) -> Result<Vec<SyncRecord>>;
}

/// Drives a strategy chosen from the sync's `sync_mode` through the pager.
pub struct SyncExtractor {
    store: Arc<dyn SyncStore>,
    clients: Arc<ClientRegistry>,
    batch_size: usize,
}

impl SyncExtractor {
    pub fn new(
        store: Arc<dyn SyncStore>,
        clients: Arc<ClientRegistry>,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be > 0".to_string()));
        }
        Ok(Self {
            store,
            clients,
            batch_size,
        })
    }

    fn strategy(mode: SyncMode) -> &'static dyn ExtractStrategy {
        match mode {
            SyncMode::FullRefresh => &FullRefresh,
            SyncMode::Incremental => &IncrementalDelta,
        }
    }
}

#[async_trait]
impl Extractor for SyncExtractor {
    #[tracing::instrument(level = "info", skip(self, ctx))]
    async fn read(
        &self,
        sync_run_id: SyncRunId,
        ctx: &dyn ActivityContext,
    ) -> Result<ExtractSummary> {
        let store = self.store.as_ref();
        let mut summary = ExtractSummary::new(sync_run_id);

        let run = store
            .get_sync_run(sync_run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync run {sync_run_id}")))?;
        if !run.status.may_start() {
            tracing::warn!(
                %sync_run_id,
                status = run.status.as_str(),
                "sync run cannot start extraction; skipping"
            );
            summary.skipped = true;
            return Ok(summary);
        }

        let sync = store
            .get_sync(run.sync_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync {}", run.sync_id)))?;
        let client = self.clients.source(&sync.source.connector_name).await?;
        let mut sync_config = SyncConfig::for_sync(&sync, Some(run.id))?;
        let tracks_cursor =
            sync.sync_mode == SyncMode::Incremental && sync.cursor_field.is_some();
        // A full refresh re-reads the whole model; the cursor only orders the pages.
        if sync.sync_mode == SyncMode::FullRefresh {
            sync_config.current_cursor_field = None;
        }

        let Transition::Applied(run) = transition(store, &run, SyncRunEvent::Start, |r| {
            r.error = None;
            r.cursor = None;
        })
        .await?
        else {
            summary.skipped = true;
            return Ok(summary);
        };
        let Transition::Applied(mut run) =
            transition(store, &run, SyncRunEvent::Query, |_| {}).await?
        else {
            summary.skipped = true;
            return Ok(summary);
        };

        let strategy = Self::strategy(sync.sync_mode);
        let source = GuardedSource::new(sync.source.connector_name.clone(), client);
        let mut pager = Pager::new(source, sync_config, self.batch_size)?;

        while let Some(batch) = pager.next_batch().await {
            summary.batches += 1;
            summary.records_read += batch.records.len() as u64;
            let records = strategy.plan_batch(store, &sync, &run, batch.records).await?;
            store.insert_sync_records(&records).await?;
            summary.records_written += records.len() as u64;

            if tracks_cursor {
                if let Some(cursor) = &batch.cursor {
                    let mut advanced = run.clone();
                    advanced.cursor = Some(cursor.clone());
                    advanced.updated_at = Utc::now();
                    if store.compare_and_set_sync_run(&advanced, run.status).await? {
                        run = advanced;
                    } else {
                        tracing::warn!(
                            %sync_run_id,
                            "sync run changed during extraction; cursor not recorded"
                        );
                    }
                    summary.cursor = Some(cursor.clone());
                }
            }

            tracing::debug!(
                batch = batch.index,
                offset = batch.offset,
                written = records.len(),
                "extracted batch"
            );
            ctx.heartbeat(json!({
                "batch": batch.index,
                "offset": batch.offset,
                "records_written": summary.records_written,
            }));
            if ctx.is_cancelled() {
                tracing::info!(%sync_run_id, batch = batch.index, "extraction cancelled");
                summary.cancelled = true;
                break;
            }
        }

        if let Some(err) = pager.error() {
            // Left in `querying` with the error attached; the reporter fails it.
            let mut errored = run.clone();
            errored.error = Some(err.to_string());
            errored.updated_at = Utc::now();
            store.compare_and_set_sync_run(&errored, run.status).await?;
            summary.error = Some(err.to_string());
            tracing::warn!(%sync_run_id, error = %err, "extraction stopped on read error");
            return Ok(summary);
        }

        let event = if summary.cancelled {
            SyncRunEvent::Cancel
        } else {
            SyncRunEvent::Queue
        };
        transition(store, &run, event, |_| {}).await?;
        tracing::info!(
            %sync_run_id,
            batches = summary.batches,
            read = summary.records_read,
            written = summary.records_written,
            "extraction finished"
        );
        Ok(summary)
    }
}

/// SQL sources page with [`BatchQuery`], templated queries with [`Paginator`].
enum Pager {
    Sql(BatchQuery),
    Template(Paginator),
}

impl Pager {
    fn new(source: GuardedSource, sync_config: SyncConfig, batch_size: usize) -> Result<Self> {
        if sync_config.model.query_type == QueryType::Template {
            let variables = match sync_config.source.connection_spec.get("pagination") {
                Some(v) => serde_json::from_value::<PaginationVariables>(v.clone())
                    .map_err(|e| Error::InvalidInput(format!("pagination variables: {e}")))?,
                None => PaginationVariables::default(),
            };
            return Ok(Pager::Template(Paginator::new(
                source,
                sync_config,
                variables,
                batch_size,
            )?));
        }
        Ok(Pager::Sql(BatchQuery::new(source, sync_config, batch_size)?))
    }

    async fn next_batch(&mut self) -> Option<Batch> {
        match self {
            Pager::Sql(q) => q.next_batch().await,
            Pager::Template(p) => p.next_batch().await,
        }
    }

    fn error(&self) -> Option<&str> {
        match self {
            Pager::Sql(q) => q.error(),
            Pager::Template(p) => p.error(),
        }
    }
}

/// Records keyed by primary key. Rows without a key are dropped; for repeated
/// keys the last row wins while keeping the first row's position.
pub(crate) fn keyed_records(
    primary_key: &str,
    records: Vec<RecordMessage>,
) -> Vec<(String, Map<String, Value>)> {
    let mut out: Vec<(String, Map<String, Value>)> = Vec::with_capacity(records.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());
    for record in records {
        let Some(pk) = primary_key_value(&record.data, primary_key) else {
            tracing::warn!(primary_key, "record without primary key skipped");
            continue;
        };
        match index.get(&pk) {
            Some(&i) => out[i].1 = record.data,
            None => {
                index.insert(pk.clone(), out.len());
                out.push((pk, record.data));
            }
        }
    }
    out
}
