use crate::activities::WorkflowContext;
use crate::schedule::CronExpr;
use crate::workflow::engine::{WorkflowEngine, WorkflowInfo, WorkflowKind};
use crate::workflow::sync_workflow::{SyncWorkflow, SyncWorkflowInput};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

struct Registration {
    info: WorkflowInfo,
    token: Ulid,
    cancel: CancellationToken,
}

/// Tokio-task workflow engine for a single worker process.
///
/// Registrations live in memory; the worker's scheduler re-registers cron
/// workflows from the store after a restart.
pub struct LocalWorkflowEngine {
    workflow: Arc<SyncWorkflow>,
    workflows: Arc<DashMap<String, Registration>>,
    shutdown: CancellationToken,
}

impl LocalWorkflowEngine {
    pub fn new(workflow: Arc<SyncWorkflow>) -> Self {
        Self {
            workflow,
            workflows: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel every registered workflow. In-flight runs stop at their next
    /// batch boundary and are marked canceled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.workflows.clear();
    }

    fn register(&self, workflow_id: &str, info: WorkflowInfo) -> Result<(Ulid, CancellationToken)> {
        match self.workflows.entry(workflow_id.to_string()) {
            Entry::Occupied(_) => Err(Error::Conflict(format!(
                "workflow {workflow_id} is already registered"
            ))),
            Entry::Vacant(slot) => {
                let token = Ulid::new();
                let cancel = self.shutdown.child_token();
                slot.insert(Registration {
                    info,
                    token,
                    cancel: cancel.clone(),
                });
                Ok((token, cancel))
            }
        }
    }
}

async fn fire(
    workflow: &SyncWorkflow,
    workflow_id: &str,
    run_id: String,
    cancel: &CancellationToken,
    input: SyncWorkflowInput,
) {
    let ctx = WorkflowContext {
        workflow_id: workflow_id.to_string(),
        run_id,
        cancel: cancel.child_token(),
    };
    match workflow.run(&ctx, input).await {
        Ok(run) => tracing::info!(
            workflow_id,
            sync_run_id = %run.id,
            status = run.status.as_str(),
            "sync workflow finished"
        ),
        Err(e) => tracing::warn!(workflow_id, error = %e, "sync workflow failed"),
    }
}

#[async_trait]
impl WorkflowEngine for LocalWorkflowEngine {
    #[tracing::instrument(level = "info", skip(self, input), fields(sync_id = %input.sync_id))]
    async fn start_cron_workflow(
        &self,
        workflow_id: &str,
        cron: &str,
        input: SyncWorkflowInput,
    ) -> Result<()> {
        let expr = CronExpr::parse(cron)?;
        let info = WorkflowInfo {
            workflow_id: workflow_id.to_string(),
            sync_id: input.sync_id,
            kind: WorkflowKind::Cron {
                expression: expr.as_str().to_string(),
            },
            registered_at: Utc::now(),
        };
        let (_, cancel) = self.register(workflow_id, info)?;

        let workflow = Arc::clone(&self.workflow);
        let workflow_id = workflow_id.to_string();
        tokio::spawn(async move {
            let mut after = Utc::now();
            loop {
                let next = match expr.next_after(after) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::error!(workflow_id, error = %e, "cron has no upcoming tick");
                        return;
                    }
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(workflow_id, "cron workflow stopped");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
                fire(&workflow, &workflow_id, Ulid::new().to_string(), &cancel, input).await;
                after = next.max(Utc::now());
            }
        });
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self, input), fields(sync_id = %input.sync_id))]
    async fn start_workflow(&self, workflow_id: &str, input: SyncWorkflowInput) -> Result<String> {
        let info = WorkflowInfo {
            workflow_id: workflow_id.to_string(),
            sync_id: input.sync_id,
            kind: WorkflowKind::OneShot,
            registered_at: Utc::now(),
        };
        let (token, cancel) = self.register(workflow_id, info)?;
        let run_id = token.to_string();

        let workflow = Arc::clone(&self.workflow);
        let workflows = Arc::clone(&self.workflows);
        let workflow_id = workflow_id.to_string();
        let task_run_id = run_id.clone();
        tokio::spawn(async move {
            fire(&workflow, &workflow_id, task_run_id, &cancel, input).await;
            workflows.remove_if(&workflow_id, |_, r| r.token == token);
        });
        Ok(run_id)
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn terminate_workflow(&self, workflow_id: &str) -> Result<()> {
        let (_, registration) = self
            .workflows
            .remove(workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?;
        registration.cancel.cancel();
        tracing::info!(workflow_id, "workflow terminated");
        Ok(())
    }

    async fn list_workflows(&self) -> Vec<WorkflowInfo> {
        let mut out: Vec<WorkflowInfo> = self.workflows.iter().map(|e| e.info.clone()).collect();
        out.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SyncStore;
    use crate::sync_run::models::SyncRunStatus;
    use crate::test_support::{Harness, sample_sync};
    use serde_json::json;

    fn engine(h: &Harness) -> LocalWorkflowEngine {
        LocalWorkflowEngine::new(Arc::new(SyncWorkflow::new(h.executor())))
    }

    #[tokio::test]
    async fn cron_workflows_register_and_terminate() {
        let h = Harness::new(sample_sync()).await;
        let engine = engine(&h);
        let input = SyncWorkflowInput::general(h.sync_id);

        engine.start_cron_workflow("wf-1", "0 3 * * *", input).await.unwrap();
        let err = engine.start_cron_workflow("wf-1", "0 3 * * *", input).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let listed = engine.list_workflows().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].kind,
            WorkflowKind::Cron {
                expression: "0 3 * * *".into()
            }
        );

        engine.terminate_workflow("wf-1").await.unwrap();
        assert!(engine.list_workflows().await.is_empty());
        let err = engine.terminate_workflow("wf-1").await.unwrap_err();
        assert!(matches!(err, Error::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected() {
        let h = Harness::new(sample_sync()).await;
        let err = engine(&h)
            .start_cron_workflow("wf-1", "every monday", SyncWorkflowInput::general(h.sync_id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn one_shot_workflow_runs_and_unregisters() {
        let h = Harness::new(sample_sync()).await;
        h.source.set_rows(vec![json!({"id": 1, "email": "a@x.com"})]);
        let engine = engine(&h);

        let run_id = engine
            .start_workflow("wf-now", SyncWorkflowInput::general(h.sync_id))
            .await
            .unwrap();
        for _ in 0..200 {
            if engine.list_workflows().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(engine.list_workflows().await.is_empty());

        let runs = h.store.list_sync_runs(h.sync_id, Default::default()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, SyncRunStatus::Complete);
        assert_eq!(runs[0].workflow_run_id.as_deref(), Some(run_id.as_str()));
    }
}
