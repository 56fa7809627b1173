use crate::extract::{ExtractStrategy, fingerprint, keyed_records};
use crate::protocol::RecordMessage;
use crate::store::SyncStore;
use crate::sync_run::models::{SyncDefinition, SyncRecord, SyncRecordAction, SyncRun};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

/// Sends only rows that are new or changed since they were last delivered,
/// judged by fingerprint.
#[derive(Debug, Default, Clone, Copy)]
pub struct IncrementalDelta;

#[async_trait]
impl ExtractStrategy for IncrementalDelta {
    async fn plan_batch(
        &self,
        store: &dyn SyncStore,
        sync: &SyncDefinition,
        run: &SyncRun,
        records: Vec<RecordMessage>,
    ) -> Result<Vec<SyncRecord>> {
        let keyed = keyed_records(&sync.model.primary_key, records);
        let keys: Vec<String> = keyed.iter().map(|(pk, _)| pk.clone()).collect();
        let previous = store.latest_fingerprints(sync.id, run.id, &keys).await?;

        let now = Utc::now();
        let mut out = Vec::with_capacity(keyed.len());
        let mut unchanged = 0usize;
        for (pk, data) in keyed {
            let fp = fingerprint(&data);
            let action = match previous.get(&pk) {
                None => SyncRecordAction::DestinationInsert,
                Some(prev) if *prev != fp => SyncRecordAction::DestinationUpdate,
                Some(_) => {
                    unchanged += 1;
                    continue;
                }
            };
            out.push(SyncRecord::pending(
                sync.id,
                run.id,
                pk,
                fp,
                Value::Object(data),
                action,
                now,
            ));
        }
        tracing::debug!(changed = out.len(), unchanged, "planned incremental batch");
        Ok(out)
    }
}
