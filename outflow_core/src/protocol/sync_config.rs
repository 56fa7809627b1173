use crate::models::{SyncId, SyncRunId};
use crate::protocol::catalog::{DestinationSyncMode, Stream, SyncMode};
use crate::protocol::connector::{Connector, Model};
use crate::sync_run::models::SyncDefinition;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Per-invocation view of a sync handed to clients. Rebuilt for every batch,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub source: Connector,
    pub destination: Connector,
    pub model: Model,
    pub stream: Stream,
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_cursor_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    pub sync_id: SyncId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_run_id: Option<SyncRunId>,
}

impl SyncConfig {
    /// Build the config for `sync`, resolving its stream from the destination catalog.
    pub fn for_sync(sync: &SyncDefinition, sync_run_id: Option<SyncRunId>) -> Result<Self> {
        let stream = sync
            .catalog
            .find_stream(&sync.stream_name)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "stream {} not present in destination catalog",
                    sync.stream_name
                ))
            })?;
        Ok(Self {
            source: sync.source.clone(),
            destination: sync.destination.clone(),
            model: sync.model.clone(),
            stream,
            sync_mode: sync.sync_mode,
            destination_sync_mode: sync.destination_sync_mode,
            cursor_field: sync.cursor_field.clone(),
            current_cursor_field: sync.current_cursor_field.clone(),
            limit: None,
            offset: None,
            sync_id: sync.id,
            sync_run_id,
        })
    }

    /// Same config with the model query replaced.
    pub fn with_query(&self, query: String) -> Self {
        let mut cfg = self.clone();
        cfg.model.query = query;
        cfg
    }
}
