use crate::Result;
use crate::models::SyncId;
use crate::workflow::sync_workflow::SyncWorkflowInput;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowKind {
    Cron { expression: String },
    OneShot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow_id: String,
    pub sync_id: SyncId,
    pub kind: WorkflowKind,
    pub registered_at: DateTime<Utc>,
}

/// Host for long-lived sync workflows.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Run the sync workflow on every tick of `cron`.
    async fn start_cron_workflow(
        &self,
        workflow_id: &str,
        cron: &str,
        input: SyncWorkflowInput,
    ) -> Result<()>;

    /// Run the sync workflow once, now. Returns the workflow run id.
    async fn start_workflow(&self, workflow_id: &str, input: SyncWorkflowInput) -> Result<String>;

    /// Errors with `WorkflowNotFound` when no such workflow is registered.
    async fn terminate_workflow(&self, workflow_id: &str) -> Result<()>;

    async fn list_workflows(&self) -> Vec<WorkflowInfo>;
}
