use crate::activities::create_sync_run::{CREATE_SYNC_RUN, CreateSyncRunInput};
use crate::activities::extractor::{EXTRACT, SyncRunInput};
use crate::activities::loader::LOAD;
use crate::activities::reporter::{REPORT, ReportInput};
use crate::activities::{ActivityExecutor, WorkflowContext, decode_output, encode_output};
use crate::models::SyncId;
use crate::sync_run::models::{RunType, SyncRun};
use crate::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWorkflowInput {
    pub sync_id: SyncId,
    #[serde(default)]
    pub run_type: RunType,
}

impl SyncWorkflowInput {
    pub fn general(sync_id: SyncId) -> Self {
        Self {
            sync_id,
            run_type: RunType::General,
        }
    }
}

/// CreateSyncRun -> Extract -> Load -> Report.
///
/// Each step resumes from persisted run state, so a retried or restarted
/// workflow picks up where the previous attempt stopped. Extract and load
/// failures are handed to the reporter instead of aborting the workflow.
pub struct SyncWorkflow {
    executor: Arc<dyn ActivityExecutor>,
}

impl SyncWorkflow {
    pub fn new(executor: Arc<dyn ActivityExecutor>) -> Self {
        Self { executor }
    }

    #[tracing::instrument(
        level = "info",
        skip(self, ctx),
        fields(workflow_id = %ctx.workflow_id, run_id = %ctx.run_id, sync_id = %input.sync_id)
    )]
    pub async fn run(&self, ctx: &WorkflowContext, input: SyncWorkflowInput) -> Result<SyncRun> {
        let create = CreateSyncRunInput {
            sync_id: input.sync_id,
            run_type: input.run_type,
            workflow_run_id: Some(ctx.run_id.clone()),
        };
        let created = self
            .executor
            .execute(CREATE_SYNC_RUN, encode_output(CREATE_SYNC_RUN, &create)?, ctx)
            .await?;
        let run: SyncRun = decode_output(CREATE_SYNC_RUN, created)?;

        let step_input = encode_output(
            EXTRACT,
            &SyncRunInput {
                sync_run_id: run.id,
            },
        )?;
        let mut error = None;
        for step in [EXTRACT, LOAD] {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.executor.execute(step, step_input.clone(), ctx).await {
                tracing::warn!(step, sync_run_id = %run.id, error = %e, "sync workflow step failed");
                if e.kind() != ErrorKind::Cancelled {
                    error = Some(e.to_string());
                }
                break;
            }
        }

        let report = ReportInput {
            sync_run_id: run.id,
            error,
            cancelled: ctx.cancel.is_cancelled(),
        };
        let reported = self
            .executor
            .execute(REPORT, encode_output(REPORT, &report)?, ctx)
            .await?;
        decode_output(REPORT, reported)
    }
}
