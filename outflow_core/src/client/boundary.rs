use crate::client::traits::{DestinationClient, SourceClient};
use crate::protocol::{
    ConnectionStatus, ConnectorSpecification, LogMessage, ProtocolMessage, SyncConfig,
};
use crate::sync_run::models::SyncRecordAction;
use serde_json::Value;
use std::sync::Arc;

fn failed_status(name: &str, operation: &str, err: &crate::Error) -> ProtocolMessage {
    tracing::warn!(client = name, operation, error = %err, "connector call failed");
    ProtocolMessage::ConnectionStatus(ConnectionStatus::failed(err.to_string()))
}

fn error_log(name: &str, operation: &str, err: &crate::Error) -> ProtocolMessage {
    tracing::warn!(client = name, operation, error = %err, "connector call failed");
    ProtocolMessage::Log(LogMessage::from_error(name, err))
}

/// Source client as seen by the engine: every call yields protocol messages.
#[derive(Clone)]
pub struct GuardedSource {
    name: String,
    client: Arc<dyn SourceClient>,
}

impl GuardedSource {
    pub fn new(name: impl Into<String>, client: Arc<dyn SourceClient>) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connector_spec(&self) -> ConnectorSpecification {
        self.client.connector_spec()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(client = %self.name))]
    pub async fn check_connection(&self, connection_spec: &Value) -> ProtocolMessage {
        match self.client.check_connection(connection_spec).await {
            Ok(status) => ProtocolMessage::ConnectionStatus(status),
            Err(e) => failed_status(&self.name, "check_connection", &e),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(client = %self.name))]
    pub async fn discover(&self, connection_spec: &Value) -> ProtocolMessage {
        match self.client.discover(connection_spec).await {
            Ok(catalog) => ProtocolMessage::Catalog(catalog),
            Err(e) => error_log(&self.name, "discover", &e),
        }
    }

    /// Records on success, a single error log otherwise.
    #[tracing::instrument(level = "debug", skip_all, fields(client = %self.name, limit = ?sync_config.limit, offset = ?sync_config.offset))]
    pub async fn read(&self, sync_config: &SyncConfig) -> Vec<ProtocolMessage> {
        match self.client.read(sync_config).await {
            Ok(records) => records.into_iter().map(ProtocolMessage::Record).collect(),
            Err(e) => vec![error_log(&self.name, "read", &e)],
        }
    }
}

/// Destination client as seen by the engine.
#[derive(Clone)]
pub struct GuardedDestination {
    name: String,
    client: Arc<dyn DestinationClient>,
}

impl GuardedDestination {
    pub fn new(name: impl Into<String>, client: Arc<dyn DestinationClient>) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "debug", skip_all, fields(client = %self.name))]
    pub async fn check_connection(&self, connection_spec: &Value) -> ProtocolMessage {
        match self.client.check_connection(connection_spec).await {
            Ok(status) => ProtocolMessage::ConnectionStatus(status),
            Err(e) => failed_status(&self.name, "check_connection", &e),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(client = %self.name))]
    pub async fn discover(&self, connection_spec: &Value) -> ProtocolMessage {
        match self.client.discover(connection_spec).await {
            Ok(catalog) => ProtocolMessage::Catalog(catalog),
            Err(e) => error_log(&self.name, "discover", &e),
        }
    }

    /// A tracking message on success, an error log otherwise.
    #[tracing::instrument(level = "debug", skip_all, fields(client = %self.name, records = records.len(), action = action.as_str()))]
    pub async fn write(
        &self,
        sync_config: &SyncConfig,
        records: &[Value],
        action: SyncRecordAction,
    ) -> ProtocolMessage {
        match self.client.write(sync_config, records, action).await {
            Ok(tracking) => ProtocolMessage::Tracking(tracking),
            Err(e) => error_log(&self.name, "write", &e),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(client = %self.name))]
    pub async fn clear_all_records(&self, sync_config: &SyncConfig) -> ProtocolMessage {
        match self.client.clear_all_records(sync_config).await {
            Ok(control) => ProtocolMessage::Control(control),
            Err(e) => error_log(&self.name, "clear_all_records", &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConnectionStatusType;
    use crate::test_support::{RecordingDestination, TableSource, sample_sync};
    use serde_json::json;

    #[tokio::test]
    async fn read_failure_becomes_error_log() {
        let source = Arc::new(TableSource::new(vec![json!({"id": 1})]));
        source.fail_reads("connection reset");
        let guarded = GuardedSource::new("table", source);
        let cfg = SyncConfig::for_sync(&sample_sync(), None).unwrap();

        let out = guarded.read(&cfg).await;
        assert_eq!(out.len(), 1);
        let log = out[0].as_error_log().unwrap();
        assert!(log.message.contains("connection reset"));
        assert_eq!(log.name.as_deref(), Some("table"));
    }

    #[tokio::test]
    async fn check_failure_becomes_failed_status() {
        let source = Arc::new(TableSource::new(vec![]));
        source.fail_reads("bad credentials");
        let guarded = GuardedSource::new("table", source);
        match guarded.check_connection(&json!({})).await {
            ProtocolMessage::ConnectionStatus(s) => {
                assert_eq!(s.status, ConnectionStatusType::Failed);
                assert!(s.message.unwrap().contains("bad credentials"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsupported_clear_becomes_error_log() {
        let dest = Arc::new(RecordingDestination::without_clear());
        let guarded = GuardedDestination::new("recording", dest);
        let cfg = SyncConfig::for_sync(&sample_sync(), None).unwrap();
        assert!(guarded.clear_all_records(&cfg).await.as_error_log().is_some());
    }
}
