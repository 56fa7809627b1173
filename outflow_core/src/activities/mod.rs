//! Orchestration activities and the executor that hosts them.
//!
//! Activities exchange `serde_json::Value` with their host so any workflow
//! engine can drive them; [`LocalActivityExecutor`] is the in-process host.

pub mod context;
pub mod create_sync_run;
pub mod executor;
pub mod extractor;
pub mod loader;
pub mod reporter;
pub mod schedule_sync;
pub mod terminate_workflow;

pub use context::{ActivityContext, LocalActivityContext, NoopActivityContext};
pub use create_sync_run::{CreateSyncRunActivity, CreateSyncRunInput};
pub use executor::{ActivityExecutor, LocalActivityExecutor, WorkflowContext};
pub use extractor::{ExtractorActivity, SyncRunInput};
pub use loader::LoaderActivity;
pub use reporter::{ReportInput, Reporter, ReporterActivity};
pub use schedule_sync::{ScheduleSyncActivity, ScheduleSyncInput, ScheduleSyncOutput};
pub use terminate_workflow::{TerminateWorkflowActivity, TerminateWorkflowInput};

use crate::{Error, ErrorKind, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    /// Total attempts including the first one.
    pub maximum_attempts: u32,
    pub non_retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 1.0,
            maximum_attempts: 3,
            non_retryable: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn non_retryable(mut self, kinds: &[ErrorKind]) -> Self {
        self.non_retryable.extend_from_slice(kinds);
        self
    }

    /// Invalid input and cancellation never retry, whatever the policy says.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        !matches!(kind, ErrorKind::InvalidInput | ErrorKind::Cancelled)
            && !self.non_retryable.contains(&kind)
    }

    /// Delay before attempt `attempt + 1`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_coefficient.max(1.0).powi(exp);
        self.initial_interval.mul_f64(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityOptions {
    pub retry: RetryPolicy,
    pub start_to_close_timeout: Option<Duration>,
    pub heartbeat_timeout: Option<Duration>,
}

/// One retryable unit of work.
#[async_trait]
pub trait Activity: Send + Sync {
    fn name(&self) -> &'static str;

    fn options(&self) -> ActivityOptions;

    async fn execute(&self, ctx: &dyn ActivityContext, input: Value) -> Result<Value>;
}

pub(crate) fn decode_input<T: DeserializeOwned>(activity: &str, input: Value) -> Result<T> {
    serde_json::from_value(input)
        .map_err(|e| Error::InvalidInput(format!("{activity} input: {e}")))
}

pub(crate) fn decode_output<T: DeserializeOwned>(activity: &str, output: Value) -> Result<T> {
    serde_json::from_value(output).map_err(|e| Error::json(format!("{activity} output"), e))
}

pub(crate) fn encode_output<T: Serialize>(activity: &str, output: &T) -> Result<Value> {
    serde_json::to_value(output).map_err(|e| Error::json(format!("{activity} output"), e))
}
