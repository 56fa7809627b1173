use crate::activities::context::ActivityContext;
use crate::activities::{Activity, ActivityOptions, RetryPolicy, decode_input, encode_output};
use crate::models::SyncId;
use crate::store::SyncStore;
use crate::sync_run::models::{RunType, SyncRun};
use crate::{Error, ErrorKind, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const CREATE_SYNC_RUN: &str = "create_sync_run";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSyncRunInput {
    pub sync_id: SyncId,
    #[serde(default)]
    pub run_type: RunType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<String>,
}

/// Find-or-create the pending SyncRun for a sync. Retries and duplicate
/// triggers land on the same pending run.
pub struct CreateSyncRunActivity {
    store: Arc<dyn SyncStore>,
}

impl CreateSyncRunActivity {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn create(&self, input: CreateSyncRunInput) -> Result<SyncRun> {
        let sync = self
            .store
            .get_sync(input.sync_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync {}", input.sync_id)))?;
        let candidate = SyncRun::pending(&sync, input.run_type, input.workflow_run_id, Utc::now());
        let run = self.store.find_or_create_pending_run(&candidate).await?;
        if run.id == candidate.id {
            tracing::info!(sync_id = %sync.id, sync_run_id = %run.id, "sync run created");
        } else {
            tracing::info!(sync_id = %sync.id, sync_run_id = %run.id, "reusing pending sync run");
        }
        Ok(run)
    }
}

#[async_trait]
impl Activity for CreateSyncRunActivity {
    fn name(&self) -> &'static str {
        CREATE_SYNC_RUN
    }

    fn options(&self) -> ActivityOptions {
        ActivityOptions {
            retry: RetryPolicy::default().non_retryable(&[ErrorKind::NotFound]),
            ..ActivityOptions::default()
        }
    }

    async fn execute(&self, _ctx: &dyn ActivityContext, input: Value) -> Result<Value> {
        let input: CreateSyncRunInput = decode_input(CREATE_SYNC_RUN, input)?;
        let run = self.create(input).await?;
        encode_output(CREATE_SYNC_RUN, &run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::NoopActivityContext;
    use crate::store::MemorySyncStore;
    use crate::sync_run::models::SyncRunStatus;
    use crate::test_support::sample_sync;
    use serde_json::json;

    #[tokio::test]
    async fn duplicate_triggers_share_the_pending_run() {
        let store = Arc::new(MemorySyncStore::new());
        let sync = sample_sync();
        store.upsert_sync(&sync).await.unwrap();
        let activity = CreateSyncRunActivity::new(store.clone());

        let input = json!({"sync_id": sync.id});
        let first: SyncRun = serde_json::from_value(
            activity.execute(&NoopActivityContext, input.clone()).await.unwrap(),
        )
        .unwrap();
        let second: SyncRun =
            serde_json::from_value(activity.execute(&NoopActivityContext, input).await.unwrap())
                .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.status, SyncRunStatus::Pending);
        assert_eq!(first.run_type, RunType::General);

        let test_run = activity
            .create(CreateSyncRunInput {
                sync_id: sync.id,
                run_type: RunType::Test,
                workflow_run_id: Some("wf-run".into()),
            })
            .await
            .unwrap();
        assert_ne!(test_run.id, first.id);
        assert_eq!(test_run.workflow_run_id.as_deref(), Some("wf-run"));
    }

    #[tokio::test]
    async fn unknown_sync_is_not_found() {
        let activity = CreateSyncRunActivity::new(Arc::new(MemorySyncStore::new()));
        let err = activity
            .execute(&NoopActivityContext, json!({"sync_id": SyncId::new()}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_input_is_invalid() {
        let activity = CreateSyncRunActivity::new(Arc::new(MemorySyncStore::new()));
        let err = activity
            .execute(&NoopActivityContext, json!({"sync": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
