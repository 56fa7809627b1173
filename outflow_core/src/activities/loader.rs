use crate::activities::context::ActivityContext;
use crate::activities::extractor::SyncRunInput;
use crate::activities::{Activity, ActivityOptions, RetryPolicy, decode_input, encode_output};
use crate::load::Loader;
use crate::{ErrorKind, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const LOAD: &str = "loader";

pub struct LoaderActivity {
    loader: Arc<Loader>,
}

impl LoaderActivity {
    pub fn new(loader: Arc<Loader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl Activity for LoaderActivity {
    fn name(&self) -> &'static str {
        LOAD
    }

    fn options(&self) -> ActivityOptions {
        ActivityOptions {
            retry: RetryPolicy::default()
                .non_retryable(&[ErrorKind::FullRefreshFailed, ErrorKind::NotFound]),
            start_to_close_timeout: Some(Duration::from_secs(172_800)),
            heartbeat_timeout: Some(Duration::from_secs(420)),
        }
    }

    async fn execute(&self, ctx: &dyn ActivityContext, input: Value) -> Result<Value> {
        let input: SyncRunInput = decode_input(LOAD, input)?;
        let tracking = self.loader.write(input.sync_run_id, ctx).await?;
        encode_output(LOAD, &tracking)
    }
}
