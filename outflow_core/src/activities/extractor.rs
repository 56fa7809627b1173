use crate::activities::context::ActivityContext;
use crate::activities::{Activity, ActivityOptions, RetryPolicy, decode_input, encode_output};
use crate::extract::Extractor;
use crate::models::SyncRunId;
use crate::{ErrorKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const EXTRACT: &str = "extractor";

/// Input shared by the activities that act on one SyncRun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunInput {
    pub sync_run_id: SyncRunId,
}

pub struct ExtractorActivity {
    extractor: Arc<dyn Extractor>,
    retry: RetryPolicy,
}

impl ExtractorActivity {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self {
            extractor,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the default retry schedule (configurable per deployment).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Activity for ExtractorActivity {
    fn name(&self) -> &'static str {
        EXTRACT
    }

    fn options(&self) -> ActivityOptions {
        ActivityOptions {
            retry: self.retry.clone().non_retryable(&[ErrorKind::NotFound]),
            start_to_close_timeout: Some(Duration::from_secs(172_800)),
            heartbeat_timeout: Some(Duration::from_secs(1_200)),
        }
    }

    async fn execute(&self, ctx: &dyn ActivityContext, input: Value) -> Result<Value> {
        let input: SyncRunInput = decode_input(EXTRACT, input)?;
        let summary = self.extractor.read(input.sync_run_id, ctx).await?;
        encode_output(EXTRACT, &summary)
    }
}
