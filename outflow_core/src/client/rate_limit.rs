use crate::client::traits::{ConnectionChecker, DestinationClient, Discoverer, Writer};
use crate::protocol::{
    Catalog, ConnectionStatus, ConnectorSpecification, ControlMessage, RateLimit, SyncConfig,
    TrackingMessage,
};
use crate::sync_run::models::SyncRecordAction;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Writer decorator enforcing a destination's request budget.
///
/// Call starts are spaced `unit_seconds / value` apart and at most
/// `concurrency` calls are in flight.
pub struct RateLimitedWriter {
    inner: Arc<dyn DestinationClient>,
    limit: RateLimit,
    permits: Semaphore,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimitedWriter {
    pub fn new(inner: Arc<dyn DestinationClient>, limit: RateLimit) -> Self {
        Self {
            inner,
            permits: Semaphore::new(limit.concurrency.max(1)),
            limit,
            next_slot: Mutex::new(None),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Reserve the next call slot and sleep until it opens.
    async fn wait_for_slot(&self) {
        let interval = self.limit.min_interval();
        let start = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(start + interval);
            start
        };
        tokio::time::sleep_until(start).await;
    }
}

#[async_trait]
impl ConnectionChecker for RateLimitedWriter {
    async fn check_connection(&self, connection_spec: &Value) -> Result<ConnectionStatus> {
        self.inner.check_connection(connection_spec).await
    }
}

#[async_trait]
impl Discoverer for RateLimitedWriter {
    async fn discover(&self, connection_spec: &Value) -> Result<Catalog> {
        self.inner.discover(connection_spec).await
    }

    fn connector_spec(&self) -> ConnectorSpecification {
        self.inner.connector_spec()
    }
}

#[async_trait]
impl Writer for RateLimitedWriter {
    async fn write(
        &self,
        sync_config: &SyncConfig,
        records: &[Value],
        action: SyncRecordAction,
    ) -> Result<TrackingMessage> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::backend("rate limiter closed", e))?;
        self.wait_for_slot().await;
        self.inner.write(sync_config, records, action).await
    }

    async fn clear_all_records(&self, sync_config: &SyncConfig) -> Result<ControlMessage> {
        self.inner.clear_all_records(sync_config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingDestination, sample_sync};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn spaces_calls_by_unit_over_value() {
        let dest = Arc::new(RecordingDestination::new());
        // 2 calls per minute -> 30s apart.
        let limited = RateLimitedWriter::new(
            dest.clone(),
            RateLimit {
                value: 2,
                unit_seconds: 60,
                concurrency: 1,
            },
        );
        let cfg = SyncConfig::for_sync(&sample_sync(), None).unwrap();

        let t0 = Instant::now();
        for i in 0..3 {
            limited
                .write(&cfg, &[json!({"id": i})], SyncRecordAction::DestinationInsert)
                .await
                .unwrap();
        }
        assert_eq!(t0.elapsed(), Duration::from_secs(60));
        assert_eq!(dest.writes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_is_immediate() {
        let dest = Arc::new(RecordingDestination::new());
        let limited = RateLimitedWriter::new(
            dest,
            RateLimit {
                value: 1,
                unit_seconds: 3600,
                concurrency: 1,
            },
        );
        let cfg = SyncConfig::for_sync(&sample_sync(), None).unwrap();
        let t0 = Instant::now();
        limited
            .write(&cfg, &[json!({"id": 1})], SyncRecordAction::DestinationInsert)
            .await
            .unwrap();
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }
}
