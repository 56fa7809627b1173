//! Outflow core library: the reverse-ETL sync engine.
//!
//! A sync reads rows from a source model, diffs them against what was last
//! delivered, and writes the changes to a destination stream. Runs are driven
//! by durable activities hosted on a workflow engine.

pub mod activities;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod models;
pub mod o11y;
pub mod pagination;
pub mod preview;
pub mod protocol;
pub mod schedule;
pub mod store;
pub mod sync_run;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{ClientRegistry, DestinationClient, SourceClient};
pub use config::WorkerConfig;
pub use error::{Error, ErrorKind, Result};
pub use extract::{Extractor, SyncExtractor};
pub use load::Loader;
pub use models::{ConnectorId, ListQuery, SyncId, SyncRecordId, SyncRunId, WorkspaceId};
pub use protocol::{
    Catalog, Connector, ConnectorType, Model, ProtocolMessage, QueryDialect, QueryType, Stream,
    SyncConfig,
};
pub use store::{MemorySyncStore, SqliteSyncStore, SyncStore};
pub use sync_run::{
    RunType, SyncDefinition, SyncRecord, SyncRecordAction, SyncRun, SyncRunStatus, SyncSchedule,
};
pub use workflow::{LocalWorkflowEngine, SyncScheduler, SyncWorkflow, SyncWorkflowInput, WorkflowEngine};
