use outflow_core::models::{ConnectorId, SyncId};
use outflow_core::protocol::{
    Connector, ConnectorType, DestinationSyncMode, Model, QueryDialect, QueryType, Stream,
    SyncConfig, SyncMode,
};
use serde_json::Value;

/// `contacts` sync config between the given source and destination specs.
pub(crate) fn sync_config(source_spec: Value, destination_spec: Value, query: &str) -> SyncConfig {
    SyncConfig {
        source: Connector {
            id: ConnectorId::new(),
            name: "local".to_string(),
            connector_type: ConnectorType::Source,
            connector_name: "sqlite".to_string(),
            connection_spec: source_spec,
            query_dialect: QueryDialect::Sqlite,
        },
        destination: Connector {
            id: ConnectorId::new(),
            name: "hook".to_string(),
            connector_type: ConnectorType::Destination,
            connector_name: "http".to_string(),
            connection_spec: destination_spec,
            query_dialect: QueryDialect::None,
        },
        model: Model {
            name: "contacts".to_string(),
            query: query.to_string(),
            query_type: QueryType::RawSql,
            primary_key: "id".to_string(),
        },
        stream: Stream::new("contacts"),
        sync_mode: SyncMode::FullRefresh,
        destination_sync_mode: DestinationSyncMode::Upsert,
        cursor_field: None,
        current_cursor_field: None,
        limit: None,
        offset: None,
        sync_id: SyncId::new(),
        sync_run_id: None,
    }
}
