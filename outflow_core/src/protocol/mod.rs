//! Connector protocol: the message envelope every client speaks, and the
//! catalog/stream description of a destination.

pub mod catalog;
pub mod connector;
pub mod message;
pub mod sync_config;

pub use catalog::{Catalog, DestinationSyncMode, RateLimit, RateLimitUnit, SchemaMode, Stream, SyncMode};
pub use connector::{Connector, ConnectorType, Model, QueryDialect, QueryType};
pub use message::{
    ConnectionStatus, ConnectionStatusType, ConnectorSpecification, ControlMessage, ControlType,
    LogLevel, LogMessage, MessageType, ProtocolMessage, RecordMessage, TrackingMessage,
};
pub use sync_config::SyncConfig;
