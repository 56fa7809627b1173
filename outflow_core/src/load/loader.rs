use crate::activities::context::ActivityContext;
use crate::client::{ClientRegistry, DestinationClient, GuardedDestination, RateLimitedWriter};
use crate::models::SyncRunId;
use crate::protocol::{LogMessage, ProtocolMessage, SyncConfig, SyncMode, TrackingMessage};
use crate::store::SyncStore;
use crate::sync_run::models::{
    SyncRecord, SyncRecordAction, SyncRecordStatus, SyncRecordUpdate, SyncRunStatus,
};
use crate::sync_run::state_machine::{SyncRunEvent, Transition, transition};
use crate::{Error, Result};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Drains a run's pending SyncRecords into the destination.
pub struct Loader {
    store: Arc<dyn SyncStore>,
    clients: Arc<ClientRegistry>,
    chunk_size: usize,
}

impl Loader {
    pub fn new(
        store: Arc<dyn SyncStore>,
        clients: Arc<ClientRegistry>,
        chunk_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("load chunk_size must be > 0".to_string()));
        }
        Ok(Self {
            store,
            clients,
            chunk_size,
        })
    }

    /// Deliver every pending record of the run and return aggregate counts.
    ///
    /// Runs that cannot progress (not queued/running) are left untouched and
    /// yield an empty tracking message.
    #[tracing::instrument(level = "info", skip(self, ctx))]
    pub async fn write(
        &self,
        sync_run_id: SyncRunId,
        ctx: &dyn ActivityContext,
    ) -> Result<TrackingMessage> {
        let store = self.store.as_ref();
        let run = store
            .get_sync_run(sync_run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync run {sync_run_id}")))?;
        if !run.status.may_progress() {
            tracing::warn!(
                %sync_run_id,
                status = run.status.as_str(),
                "sync run is not ready to load; skipping"
            );
            return Ok(TrackingMessage::default());
        }

        let sync = store
            .get_sync(run.sync_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync {}", run.sync_id)))?;
        let client = self.clients.destination(&sync.destination.connector_name).await?;
        let sync_config = SyncConfig::for_sync(&sync, Some(run.id))?;
        let writer: Arc<dyn DestinationClient> =
            match sync.catalog.rate_limit_for(&sync_config.stream) {
                Some(limit) => {
                    tracing::debug!(?limit, "destination writes are rate limited");
                    Arc::new(RateLimitedWriter::new(client, limit))
                }
                None => client,
            };
        let destination = GuardedDestination::new(sync.destination.connector_name.clone(), writer);

        let first_entry = run.status == SyncRunStatus::Queued;
        let Transition::Applied(run) =
            transition(store, &run, SyncRunEvent::Progress, |_| {}).await?
        else {
            return Ok(TrackingMessage::default());
        };
        if first_entry && sync.sync_mode == SyncMode::FullRefresh {
            clear_destination(&destination, &sync_config).await?;
        }

        let batch_size = sync_config.stream.effective_batch_size();
        let mut tracking = TrackingMessage::default();
        let mut chunks = 0u64;
        let mut cancelled = false;
        loop {
            let pending = store.pending_sync_records(run.id, self.chunk_size).await?;
            if pending.is_empty() {
                break;
            }
            chunks += 1;

            let mut by_action: BTreeMap<SyncRecordAction, Vec<SyncRecord>> = BTreeMap::new();
            for record in pending {
                by_action.entry(record.action).or_default().push(record);
            }
            for (action, records) in by_action {
                for batch in records.chunks(batch_size) {
                    let (updates, outcome) =
                        write_batch(&destination, &sync_config, action, batch).await;
                    store.update_sync_records(&updates).await?;
                    tracking.merge(outcome);
                }
            }

            ctx.heartbeat(json!({
                "chunk": chunks,
                "success": tracking.success,
                "failed": tracking.failed,
            }));
            if ctx.is_cancelled() {
                tracing::info!(%sync_run_id, chunk = chunks, "load cancelled");
                cancelled = true;
                break;
            }
        }

        if cancelled {
            transition(store, &run, SyncRunEvent::Cancel, |_| {}).await?;
        }
        tracking.meta = json!({
            "sync_run_id": run.id,
            "chunks": chunks,
            "cancelled": cancelled,
        });
        tracing::info!(
            %sync_run_id,
            success = tracking.success,
            failed = tracking.failed,
            "load finished"
        );
        Ok(tracking)
    }
}

async fn clear_destination(destination: &GuardedDestination, sync_config: &SyncConfig) -> Result<()> {
    match destination.clear_all_records(sync_config).await {
        ProtocolMessage::Control(control) if control.succeeded() => {
            tracing::info!(destination = destination.name(), "destination cleared for full refresh");
            Ok(())
        }
        ProtocolMessage::Control(control) => Err(Error::FullRefreshFailed(format!(
            "destination {} refused to clear records: {}",
            destination.name(),
            control.meta
        ))),
        ProtocolMessage::Log(log) => Err(Error::FullRefreshFailed(log.message)),
        other => Err(Error::FullRefreshFailed(format!(
            "unexpected {} message from clear_all_records",
            other.message_type().as_str()
        ))),
    }
}

/// Send one destination call and derive per-record outcomes. A batch with
/// any failed row marks every record of the batch failed.
async fn write_batch(
    destination: &GuardedDestination,
    sync_config: &SyncConfig,
    action: SyncRecordAction,
    batch: &[SyncRecord],
) -> (Vec<SyncRecordUpdate>, TrackingMessage) {
    let payloads: Vec<Value> = batch.iter().map(|r| r.record.clone()).collect();
    let (status, error, logs) = match destination.write(sync_config, &payloads, action).await {
        ProtocolMessage::Tracking(t) if t.failed == 0 => (SyncRecordStatus::Success, None, t.logs),
        ProtocolMessage::Tracking(t) => {
            let error = t
                .first_error()
                .map(|l| l.message.clone())
                .unwrap_or_else(|| {
                    format!("destination reported {} failed of {}", t.failed, batch.len())
                });
            (SyncRecordStatus::Failed, Some(error), t.logs)
        }
        ProtocolMessage::Log(log) => (SyncRecordStatus::Failed, Some(log.message.clone()), vec![log]),
        other => {
            let message = format!(
                "unexpected {} message from write",
                other.message_type().as_str()
            );
            (
                SyncRecordStatus::Failed,
                Some(message.clone()),
                vec![LogMessage::error(message)],
            )
        }
    };

    let count = batch.len() as u64;
    let mut outcome = TrackingMessage::default();
    match status {
        SyncRecordStatus::Success => outcome.success = count,
        _ => {
            outcome.failed = count;
            outcome.logs = logs.iter().filter(|l| l.level.is_error()).cloned().collect();
        }
    }
    let updates = batch
        .iter()
        .map(|r| SyncRecordUpdate {
            id: r.id,
            status,
            error: error.clone(),
            logs: logs.clone(),
        })
        .collect();
    (updates, outcome)
}
