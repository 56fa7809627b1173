use crate::activities::context::LocalActivityContext;
use crate::activities::{Activity, ActivityOptions};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identity and cancellation scope of the workflow invoking an activity.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub run_id: String,
    pub cancel: CancellationToken,
}

impl WorkflowContext {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Runs named activities with the engine's retry, timeout and heartbeat rules.
#[async_trait]
pub trait ActivityExecutor: Send + Sync {
    async fn execute(&self, name: &str, input: Value, workflow: &WorkflowContext) -> Result<Value>;
}

/// In-process executor. Activities can be registered after construction so
/// ones that need the workflow engine can be added once it exists.
pub struct LocalActivityExecutor {
    activities: DashMap<&'static str, Arc<dyn Activity>>,
}

impl Default for LocalActivityExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalActivityExecutor {
    pub fn new() -> Self {
        Self {
            activities: DashMap::new(),
        }
    }

    pub fn register(&self, activity: Arc<dyn Activity>) {
        tracing::debug!(activity = activity.name(), "activity registered");
        self.activities.insert(activity.name(), activity);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.activities.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    async fn attempt(
        &self,
        activity: &dyn Activity,
        options: &ActivityOptions,
        ctx: &LocalActivityContext,
        input: Value,
    ) -> Result<Value> {
        let name = activity.name();
        let deadline = async {
            match options.start_to_close_timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };
        let watchdog = async {
            match options.heartbeat_timeout {
                Some(limit) => {
                    let every = (limit / 4).max(Duration::from_millis(10));
                    loop {
                        tokio::time::sleep(every).await;
                        if ctx.since_last_heartbeat() > limit {
                            return limit;
                        }
                    }
                }
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            res = activity.execute(ctx, input) => res,
            limit = deadline => Err(Error::Timeout(format!(
                "{name} exceeded start-to-close timeout of {limit:?}"
            ))),
            limit = watchdog => Err(Error::Timeout(format!(
                "{name} missed heartbeats for {limit:?}"
            ))),
        };
        if result.is_err() {
            // Stop anything the abandoned attempt spawned.
            ctx.cancel();
        }
        result
    }
}

#[async_trait]
impl ActivityExecutor for LocalActivityExecutor {
    #[tracing::instrument(level = "info", skip(self, input, workflow), fields(workflow_id = %workflow.workflow_id))]
    async fn execute(&self, name: &str, input: Value, workflow: &WorkflowContext) -> Result<Value> {
        let activity = self
            .activities
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::NotFound(format!("activity {name}")))?;
        let options = activity.options();
        let max_attempts = options.retry.maximum_attempts.max(1);

        let mut attempt = 1u32;
        loop {
            let ctx = LocalActivityContext::new(activity.name(), attempt, workflow.cancel.child_token());
            let err = match self.attempt(activity.as_ref(), &options, &ctx, input.clone()).await {
                Ok(output) => {
                    tracing::debug!(activity = name, attempt, "activity completed");
                    return Ok(output);
                }
                Err(e) => e,
            };

            let retryable = options.retry.is_retryable(err.kind()) && !workflow.cancel.is_cancelled();
            if !retryable || attempt >= max_attempts {
                tracing::warn!(activity = name, attempt, error = %err, "activity failed");
                return Err(err);
            }

            let delay = options.retry.delay_after(attempt);
            tracing::warn!(
                activity = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "activity attempt failed; retrying"
            );
            tokio::select! {
                _ = workflow.cancel.cancelled() => {
                    return Err(Error::Cancelled(format!("{name} cancelled while waiting to retry")));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
