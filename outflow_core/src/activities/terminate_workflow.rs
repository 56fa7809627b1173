use crate::activities::context::ActivityContext;
use crate::activities::{Activity, ActivityOptions, RetryPolicy, decode_input};
use crate::workflow::WorkflowEngine;
use crate::{ErrorKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub const TERMINATE_WORKFLOW: &str = "terminate_workflow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateWorkflowInput {
    pub workflow_id: String,
}

pub struct TerminateWorkflowActivity {
    engine: Arc<dyn WorkflowEngine>,
}

impl TerminateWorkflowActivity {
    pub fn new(engine: Arc<dyn WorkflowEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Activity for TerminateWorkflowActivity {
    fn name(&self) -> &'static str {
        TERMINATE_WORKFLOW
    }

    fn options(&self) -> ActivityOptions {
        ActivityOptions {
            retry: RetryPolicy::default().non_retryable(&[ErrorKind::WorkflowNotFound]),
            start_to_close_timeout: Some(Duration::from_secs(60)),
            heartbeat_timeout: None,
        }
    }

    async fn execute(&self, _ctx: &dyn ActivityContext, input: Value) -> Result<Value> {
        let input: TerminateWorkflowInput = decode_input(TERMINATE_WORKFLOW, input)?;
        self.engine.terminate_workflow(&input.workflow_id).await?;
        Ok(json!({"workflow_id": input.workflow_id, "terminated": true}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::activities::NoopActivityContext;
    use crate::test_support::RecordingEngine;

    #[tokio::test]
    async fn missing_workflow_is_reported() {
        let engine = Arc::new(RecordingEngine::default());
        let activity = TerminateWorkflowActivity::new(engine.clone());
        let err = activity
            .execute(&NoopActivityContext, json!({"workflow_id": "gone"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorkflowNotFound(_)));
        assert!(!activity.options().retry.is_retryable(err.kind()));

        engine.register_cron("wf-1");
        let out = activity
            .execute(&NoopActivityContext, json!({"workflow_id": "wf-1"}))
            .await
            .unwrap();
        assert_eq!(out["terminated"], true);
        assert_eq!(engine.terminated(), vec!["wf-1".to_string()]);
    }
}
