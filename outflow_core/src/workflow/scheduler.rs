use crate::activities::schedule_sync::{SCHEDULE_SYNC, ScheduleSyncInput};
use crate::activities::terminate_workflow::{TERMINATE_WORKFLOW, TerminateWorkflowInput};
use crate::activities::{ActivityExecutor, WorkflowContext, encode_output};
use crate::models::ListQuery;
use crate::store::SyncStore;
use crate::workflow::engine::{WorkflowEngine, WorkflowKind};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one [`SyncScheduler::tick`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scheduled: u64,
    pub terminated: u64,
}

/// Keeps the engine's cron workflows in line with the stored syncs.
///
/// Enabled syncs with a cron schedule and no live workflow get ScheduleSync;
/// cron workflows no enabled sync points at get TerminateWorkflow.
pub struct SyncScheduler {
    store: Arc<dyn SyncStore>,
    engine: Arc<dyn WorkflowEngine>,
    executor: Arc<dyn ActivityExecutor>,
    poll_interval: Duration,
}

impl SyncScheduler {
    #[tracing::instrument(level = "debug", skip(store, engine, executor))]
    pub fn new(
        store: Arc<dyn SyncStore>,
        engine: Arc<dyn WorkflowEngine>,
        executor: Arc<dyn ActivityExecutor>,
        poll_interval: Duration,
    ) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(Error::InvalidInput("poll_interval must be > 0".to_string()));
        }
        Ok(Self {
            store,
            engine,
            executor,
            poll_interval,
        })
    }

    /// Tick until `shutdown` fires.
    #[tracing::instrument(level = "info", skip(self, shutdown))]
    pub async fn run_loop(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("sync scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            // Best-effort tick; errors are logged but do not stop scheduling.
            if let Err(e) = self.tick(&shutdown).await {
                tracing::warn!(error = %e, "sync scheduler tick failed");
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, shutdown))]
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<TickReport> {
        let mut report = TickReport::default();
        let live: HashSet<String> = self
            .engine
            .list_workflows()
            .await
            .into_iter()
            .filter(|w| matches!(w.kind, WorkflowKind::Cron { .. }))
            .map(|w| w.workflow_id)
            .collect();
        let mut wanted: HashSet<String> = HashSet::new();

        let ctx = WorkflowContext {
            workflow_id: "sync-scheduler".to_string(),
            run_id: ulid::Ulid::new().to_string(),
            cancel: shutdown.child_token(),
        };

        // Page through syncs to avoid unbounded memory usage.
        let mut offset = 0usize;
        let limit = 200usize;
        loop {
            let batch = self.store.list_syncs(ListQuery { limit, offset }).await?;
            if batch.is_empty() {
                break;
            }
            for sync in batch {
                if !sync.enabled {
                    continue;
                }
                let cron = match sync.schedule.cron_expression() {
                    Ok(Some(cron)) => cron,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(sync_id = %sync.id, error = %e, "sync has an invalid schedule");
                        continue;
                    }
                };
                if let Some(id) = sync.workflow_id.as_ref().filter(|id| live.contains(*id)) {
                    wanted.insert(id.clone());
                    continue;
                }

                let input = encode_output(SCHEDULE_SYNC, &ScheduleSyncInput { sync_id: sync.id })?;
                match self.executor.execute(SCHEDULE_SYNC, input, &ctx).await {
                    Ok(out) => {
                        if let Some(id) = out.get("workflow_id").and_then(|v| v.as_str()) {
                            wanted.insert(id.to_string());
                        }
                        tracing::info!(sync_id = %sync.id, %cron, "sync scheduled");
                        report.scheduled += 1;
                    }
                    Err(e) => {
                        tracing::warn!(sync_id = %sync.id, error = %e, "failed to schedule sync");
                    }
                }
            }
            offset += limit;
        }

        for workflow_id in live.difference(&wanted) {
            let input = encode_output(
                TERMINATE_WORKFLOW,
                &TerminateWorkflowInput {
                    workflow_id: workflow_id.clone(),
                },
            )?;
            match self.executor.execute(TERMINATE_WORKFLOW, input, &ctx).await {
                Ok(_) => report.terminated += 1,
                Err(e) => tracing::warn!(workflow_id, error = %e, "failed to terminate stale workflow"),
            }
        }
        Ok(report)
    }
}
