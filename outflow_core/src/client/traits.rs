use crate::protocol::{
    Catalog, ConnectionStatus, ConnectorSpecification, ControlMessage, RecordMessage, SyncConfig,
    TrackingMessage,
};
use crate::sync_run::models::SyncRecordAction;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait ConnectionChecker: Send + Sync {
    async fn check_connection(&self, connection_spec: &Value) -> Result<ConnectionStatus>;
}

#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self, connection_spec: &Value) -> Result<Catalog>;

    /// Describes the connection spec the client accepts.
    fn connector_spec(&self) -> ConnectorSpecification {
        ConnectorSpecification {
            documentation_url: None,
            connection_specification: Value::Object(Default::default()),
            supports_normalization: false,
            supports_dbt: false,
            supported_destination_sync_modes: Vec::new(),
            stream_type: None,
        }
    }
}

#[async_trait]
pub trait Reader: Send + Sync {
    /// Execute `sync_config.model.query`, honouring `limit`/`offset` when set.
    async fn read(&self, sync_config: &SyncConfig) -> Result<Vec<RecordMessage>>;
}

#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(
        &self,
        sync_config: &SyncConfig,
        records: &[Value],
        action: SyncRecordAction,
    ) -> Result<TrackingMessage>;

    /// Remove every record of the stream ahead of a full refresh.
    async fn clear_all_records(&self, sync_config: &SyncConfig) -> Result<ControlMessage> {
        Err(Error::InvalidInput(format!(
            "destination {} does not support clearing records",
            sync_config.destination.connector_name
        )))
    }
}

pub trait SourceClient: ConnectionChecker + Discoverer + Reader {}
impl<T: ConnectionChecker + Discoverer + Reader> SourceClient for T {}

pub trait DestinationClient: ConnectionChecker + Discoverer + Writer {}
impl<T: ConnectionChecker + Discoverer + Writer> DestinationClient for T {}
