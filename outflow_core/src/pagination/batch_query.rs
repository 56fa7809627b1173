use crate::client::GuardedSource;
use crate::pagination::cursor_query::CursorQueryBuilder;
use crate::pagination::{Batch, PageState, split_read};
use crate::protocol::SyncConfig;
use crate::Result;

/// Offset/cursor loop over a SQL-style source.
///
/// Each call to [`BatchQuery::next_batch`] issues one `Read` with `limit` and
/// `offset` set; with a cursor field the query is wrapped by
/// [`CursorQueryBuilder`] so it resumes from the last seen value.
pub struct BatchQuery {
    client: GuardedSource,
    sync_config: SyncConfig,
    state: PageState,
}

impl BatchQuery {
    pub fn new(client: GuardedSource, sync_config: SyncConfig, batch_size: usize) -> Result<Self> {
        let state = PageState::new(batch_size, &sync_config)?;
        Ok(Self {
            client,
            sync_config,
            state,
        })
    }

    #[tracing::instrument(level = "debug", skip(self), fields(sync_id = %self.sync_config.sync_id, batch = self.state.batches + 1))]
    pub async fn next_batch(&mut self) -> Option<Batch> {
        if self.state.done {
            return None;
        }
        let mut cfg = self.sync_config.clone();
        cfg.limit = Some(self.state.batch_size);
        cfg.offset = Some(self.state.offset);
        cfg.current_cursor_field = self.state.last_cursor.clone();
        let cfg = match CursorQueryBuilder::build_cursor_sync_config(&cfg) {
            Ok(cfg) => cfg,
            Err(e) => {
                self.state.fail(e.to_string());
                return None;
            }
        };
        let outcome = split_read(self.client.read(&cfg).await);
        self.state.accept(outcome)
    }

    /// Error that ended the loop, if a read failed.
    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn last_cursor(&self) -> Option<&str> {
        self.state.last_cursor.as_deref()
    }

    pub fn batches(&self) -> u64 {
        self.state.batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::test_support::{TableSource, sample_sync};
    use serde_json::json;
    use std::sync::Arc;

    fn config(cursor_field: Option<&str>) -> SyncConfig {
        let mut sync = sample_sync();
        sync.cursor_field = cursor_field.map(str::to_string);
        SyncConfig::for_sync(&sync, None).unwrap()
    }

    fn ids(batch: &Batch) -> Vec<i64> {
        batch
            .records
            .iter()
            .map(|r| r.data["id"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn zero_batch_size_fails_before_reading() {
        let source = Arc::new(TableSource::new(vec![json!({"id": 1})]));
        let err = BatchQuery::new(GuardedSource::new("t", source.clone()), config(None), 0)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(source.reads(), 0);
    }

    #[tokio::test]
    async fn pages_by_offset_until_empty() {
        let rows = (1..=5).map(|i| json!({"id": i})).collect();
        let source = Arc::new(TableSource::new(rows));
        let mut q = BatchQuery::new(GuardedSource::new("t", source.clone()), config(None), 2).unwrap();

        let mut seen = Vec::new();
        while let Some(batch) = q.next_batch().await {
            seen.push((batch.offset, ids(&batch)));
        }
        assert_eq!(
            seen,
            vec![(0, vec![1, 2]), (2, vec![3, 4]), (4, vec![5])]
        );
        assert_eq!(source.reads(), 4);
        assert!(q.error().is_none());
    }

    #[tokio::test]
    async fn cursor_mode_walks_forward_and_stops_when_stagnant() {
        let rows = (1..=5).map(|i| json!({"id": i, "seq": i})).collect();
        let source = Arc::new(TableSource::new(rows));
        let mut q =
            BatchQuery::new(GuardedSource::new("t", source.clone()), config(Some("seq")), 2).unwrap();

        let mut seen = std::collections::BTreeSet::new();
        while let Some(batch) = q.next_batch().await {
            assert_eq!(batch.offset, 0);
            seen.extend(ids(&batch));
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(q.last_cursor(), Some("5"));
        assert!(source.queries()[1].contains(r#"WHERE "seq" >= '2'"#));
    }

    #[tokio::test]
    async fn stagnant_cursor_stops_within_one_extra_read() {
        let rows = vec![json!({"id": 1, "seq": 7}), json!({"id": 2, "seq": 7})];
        let source = Arc::new(TableSource::new(rows));
        source.ignore_paging();
        let mut q =
            BatchQuery::new(GuardedSource::new("t", source.clone()), config(Some("seq")), 2).unwrap();

        let mut batches = 0;
        while q.next_batch().await.is_some() {
            batches += 1;
            assert!(batches <= 2, "loop did not terminate");
        }
        assert_eq!(batches, 2);
        assert_eq!(source.reads(), 2);
    }

    #[tokio::test]
    async fn read_error_ends_loop_and_is_reported() {
        let rows = (1..=4).map(|i| json!({"id": i})).collect();
        let source = Arc::new(TableSource::new(rows));
        source.fail_on_read(2, "warehouse timeout");
        let mut q = BatchQuery::new(GuardedSource::new("t", source.clone()), config(None), 2).unwrap();

        assert_eq!(ids(&q.next_batch().await.unwrap()), vec![1, 2]);
        assert!(q.next_batch().await.is_none());
        assert!(q.next_batch().await.is_none());
        assert!(q.error().unwrap().contains("warehouse timeout"));
        assert_eq!(source.reads(), 2);
    }
}
