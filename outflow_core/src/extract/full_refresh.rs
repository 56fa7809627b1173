use crate::extract::{ExtractStrategy, fingerprint, keyed_records};
use crate::protocol::RecordMessage;
use crate::store::SyncStore;
use crate::sync_run::models::{SyncDefinition, SyncRecord, SyncRecordAction, SyncRun};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

/// Re-sends the whole result set every run. Every row becomes a
/// `destination_insert`; the loader clears the destination first.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullRefresh;

#[async_trait]
impl ExtractStrategy for FullRefresh {
    async fn plan_batch(
        &self,
        _store: &dyn SyncStore,
        sync: &SyncDefinition,
        run: &SyncRun,
        records: Vec<RecordMessage>,
    ) -> Result<Vec<SyncRecord>> {
        let now = Utc::now();
        Ok(keyed_records(&sync.model.primary_key, records)
            .into_iter()
            .map(|(pk, data)| {
                let fp = fingerprint(&data);
                SyncRecord::pending(
                    sync.id,
                    run.id,
                    pk,
                    fp,
                    Value::Object(data),
                    SyncRecordAction::DestinationInsert,
                    now,
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::activities::context::NoopActivityContext;
    use crate::extract::Extractor;
    use crate::protocol::SyncMode;
    use crate::store::SyncStore;
    use crate::sync_run::models::{RunType, SyncRecordAction, SyncRunStatus};
    use crate::test_support::{Harness, sample_sync};
    use serde_json::json;

    #[tokio::test]
    async fn every_row_is_an_insert_every_run() {
        let mut sync = sample_sync();
        sync.sync_mode = SyncMode::FullRefresh;
        let h = Harness::new(sync).await;
        h.source.set_rows(vec![json!({"id": 1}), json!({"id": 2})]);

        for _ in 0..2 {
            let run = h.create_run(RunType::General).await;
            let summary = h.extractor().read(run.id, &NoopActivityContext).await.unwrap();
            assert_eq!(summary.records_written, 2);
            let stored = h.store.get_sync_run(run.id).await.unwrap().unwrap();
            assert_eq!(stored.status, SyncRunStatus::Queued);
            h.finish_run(run.id).await;
        }

        let records = h.store.all_records().await;
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.action == SyncRecordAction::DestinationInsert));
    }
}
