use crate::activities::context::ActivityContext;
use crate::activities::{Activity, ActivityOptions, RetryPolicy, decode_input, encode_output};
use crate::models::SyncRunId;
use crate::store::SyncStore;
use crate::sync_run::models::{SyncRun, SyncRunStatus};
use crate::sync_run::state_machine::{SyncRunEvent, Transition, transition};
use crate::{Error, ErrorKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const REPORT: &str = "reporter";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportInput {
    pub sync_run_id: SyncRunId,
    /// Failure from an earlier step of the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
}

/// Final accounting for a run: record counts plus its terminal status.
pub struct Reporter {
    store: Arc<dyn SyncStore>,
}

impl Reporter {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(level = "info", skip(self, input), fields(sync_run_id = %input.sync_run_id))]
    pub async fn report(&self, input: ReportInput) -> Result<SyncRun> {
        let store = self.store.as_ref();
        let run = store
            .get_sync_run(input.sync_run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync run {}", input.sync_run_id)))?;
        if run.status.is_terminal() {
            tracing::debug!(status = run.status.as_str(), "sync run already finalized");
            return Ok(run);
        }

        let counts = store.count_sync_records(run.id).await?;
        let error = input.error.or_else(|| run.error.clone());
        let (event, error) = if input.cancelled {
            (SyncRunEvent::Cancel, error)
        } else if error.is_some() {
            (SyncRunEvent::Fail, error)
        } else if !matches!(run.status, SyncRunStatus::Queued | SyncRunStatus::Running) {
            (
                SyncRunEvent::Fail,
                Some(format!("sync run stopped while {}", run.status.as_str())),
            )
        } else if counts.failed > 0 && counts.success == 0 {
            (
                SyncRunEvent::Fail,
                Some(format!("all {} records failed to sync", counts.failed)),
            )
        } else if counts.failed > 0 {
            (SyncRunEvent::PartialComplete, None)
        } else {
            (SyncRunEvent::Complete, None)
        };

        let outcome = transition(store, &run, event, |r| {
            r.total_rows = counts.total;
            r.successful_rows = counts.success;
            r.failed_rows = counts.failed;
            if error.is_some() {
                r.error = error.clone();
            }
        })
        .await?;
        match outcome {
            Transition::Applied(run) => {
                // Only a fully delivered run moves the sync's cursor forward;
                // anything else resumes from the last committed value.
                if run.status == SyncRunStatus::Complete {
                    if let Some(cursor) = &run.cursor {
                        store.update_sync_cursor(run.sync_id, cursor).await?;
                    }
                }
                tracing::info!(
                    status = run.status.as_str(),
                    total = run.total_rows,
                    successful = run.successful_rows,
                    failed = run.failed_rows,
                    "sync run finalized"
                );
                Ok(run)
            }
            Transition::Skipped { .. } => store
                .get_sync_run(run.id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("sync run {}", run.id))),
        }
    }
}

pub struct ReporterActivity {
    reporter: Arc<Reporter>,
}

impl ReporterActivity {
    pub fn new(reporter: Arc<Reporter>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl Activity for ReporterActivity {
    fn name(&self) -> &'static str {
        REPORT
    }

    fn options(&self) -> ActivityOptions {
        ActivityOptions {
            retry: RetryPolicy::default().non_retryable(&[ErrorKind::NotFound]),
            ..ActivityOptions::default()
        }
    }

    async fn execute(&self, _ctx: &dyn ActivityContext, input: Value) -> Result<Value> {
        let input: ReportInput = decode_input(REPORT, input)?;
        let run = self.reporter.report(input).await?;
        encode_output(REPORT, &run)
    }
}
