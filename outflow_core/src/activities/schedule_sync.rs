use crate::activities::context::ActivityContext;
use crate::activities::{Activity, ActivityOptions, RetryPolicy, decode_input, encode_output};
use crate::models::SyncId;
use crate::store::SyncStore;
use crate::sync_run::models::SyncDefinition;
use crate::workflow::{SyncWorkflowInput, WorkflowEngine};
use crate::{Error, ErrorKind, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const SCHEDULE_SYNC: &str = "schedule_sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSyncInput {
    pub sync_id: SyncId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSyncOutput {
    pub workflow_id: String,
    pub cron: Option<String>,
    /// Run id of the immediate workflow, when one was started.
    pub workflow_run_id: Option<String>,
}

/// `{source}-{destination}-syncid-{id}-{unix_timestamp}`
pub fn workflow_id_for(sync: &SyncDefinition, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-syncid-{}-{}",
        sync.source.name,
        sync.destination.name,
        sync.id,
        now.timestamp()
    )
}

/// (Re)register a sync's cron workflow and kick off a first run.
pub struct ScheduleSyncActivity {
    store: Arc<dyn SyncStore>,
    engine: Arc<dyn WorkflowEngine>,
}

impl ScheduleSyncActivity {
    pub fn new(store: Arc<dyn SyncStore>, engine: Arc<dyn WorkflowEngine>) -> Self {
        Self { store, engine }
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn schedule(&self, sync_id: SyncId, now: DateTime<Utc>) -> Result<ScheduleSyncOutput> {
        let sync = self
            .store
            .get_sync(sync_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync {sync_id}")))?;

        if let Some(previous) = &sync.workflow_id {
            if let Err(e) = self.engine.terminate_workflow(previous).await {
                tracing::warn!(%sync_id, workflow_id = %previous, error = %e, "failed to terminate previous workflow");
            }
        }

        let workflow_id = workflow_id_for(&sync, now);
        let cron = sync.schedule.cron_expression()?;
        // Persisted first so a retry terminates what this attempt registers.
        self.store
            .set_sync_workflow_id(sync.id, Some(&workflow_id))
            .await?;
        let input = SyncWorkflowInput::general(sync.id);
        if let Some(cron) = &cron {
            self.engine
                .start_cron_workflow(&workflow_id, cron, input)
                .await?;
        }

        let workflow_run_id = match self.store.active_sync_run(sync.id).await? {
            Some(active) => {
                tracing::info!(
                    %sync_id,
                    sync_run_id = %active.id,
                    status = active.status.as_str(),
                    "sync already has an active run; not starting one now"
                );
                None
            }
            None => Some(
                self.engine
                    .start_workflow(&format!("{workflow_id}-immediate"), input)
                    .await?,
            ),
        };

        tracing::info!(%sync_id, workflow_id, ?cron, "sync scheduled");
        Ok(ScheduleSyncOutput {
            workflow_id,
            cron,
            workflow_run_id,
        })
    }
}

#[async_trait]
impl Activity for ScheduleSyncActivity {
    fn name(&self) -> &'static str {
        SCHEDULE_SYNC
    }

    fn options(&self) -> ActivityOptions {
        ActivityOptions {
            retry: RetryPolicy::default().non_retryable(&[ErrorKind::NotFound]),
            ..ActivityOptions::default()
        }
    }

    async fn execute(&self, _ctx: &dyn ActivityContext, input: Value) -> Result<Value> {
        let input: ScheduleSyncInput = decode_input(SCHEDULE_SYNC, input)?;
        let output = self.schedule(input.sync_id, Utc::now()).await?;
        encode_output(SCHEDULE_SYNC, &output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_run::models::{RunType, SyncSchedule};
    use crate::test_support::{Harness, RecordingEngine, sample_sync};
    use chrono::TimeZone;

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).single().unwrap()
    }

    async fn harness(schedule: SyncSchedule) -> (Harness, Arc<RecordingEngine>, ScheduleSyncActivity) {
        let mut sync = sample_sync();
        sync.schedule = schedule;
        let h = Harness::new(sync).await;
        let engine = Arc::new(RecordingEngine::default());
        let activity = ScheduleSyncActivity::new(h.store.clone(), engine.clone());
        (h, engine, activity)
    }

    #[tokio::test]
    async fn registers_cron_and_starts_first_run() {
        let (h, engine, activity) = harness(SyncSchedule::Cron {
            expression: "*/30 * * * *".into(),
        })
        .await;

        let out = activity.schedule(h.sync_id, at(1_700_000_000)).await.unwrap();
        assert_eq!(
            out.workflow_id,
            format!("warehouse-crm-syncid-{}-1700000000", h.sync_id)
        );
        assert_eq!(out.cron.as_deref(), Some("*/30 * * * *"));
        assert!(out.workflow_run_id.is_some());
        assert_eq!(engine.cron_ids(), vec![out.workflow_id.clone()]);
        assert_eq!(engine.started(), vec![format!("{}-immediate", out.workflow_id)]);

        let stored = h.store.get_sync(h.sync_id).await.unwrap().unwrap();
        assert_eq!(stored.workflow_id.as_deref(), Some(out.workflow_id.as_str()));
    }

    #[tokio::test]
    async fn rescheduling_terminates_previous_workflow() {
        let (h, engine, activity) = harness(SyncSchedule::Cron {
            expression: "@hourly".into(),
        })
        .await;
        let first = activity.schedule(h.sync_id, at(1_700_000_000)).await.unwrap();
        let second = activity.schedule(h.sync_id, at(1_700_000_600)).await.unwrap();

        assert_ne!(first.workflow_id, second.workflow_id);
        assert_eq!(engine.terminated(), vec![first.workflow_id]);
        assert_eq!(engine.cron_ids(), vec![second.workflow_id]);
    }

    #[tokio::test]
    async fn active_run_skips_immediate_start() {
        let (h, engine, activity) = harness(SyncSchedule::Cron {
            expression: "@daily".into(),
        })
        .await;
        h.create_run(RunType::General).await;

        let out = activity.schedule(h.sync_id, at(1_700_000_000)).await.unwrap();
        assert!(out.workflow_run_id.is_none());
        assert!(engine.started().is_empty());
        assert_eq!(engine.cron_ids().len(), 1);
    }

    #[tokio::test]
    async fn manual_sync_only_runs_once() {
        let (h, engine, activity) = harness(SyncSchedule::Manual).await;
        let out = activity.schedule(h.sync_id, at(1_700_000_000)).await.unwrap();
        assert!(out.cron.is_none());
        assert!(engine.cron_ids().is_empty());
        assert_eq!(engine.started().len(), 1);
    }

    #[tokio::test]
    async fn unknown_sync_is_not_found() {
        let (_h, _engine, activity) = harness(SyncSchedule::Manual).await;
        let err = activity.schedule(SyncId::new(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
