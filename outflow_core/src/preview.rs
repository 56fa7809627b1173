//! Random samples of a sync's model, for showing users what a sync will send.

use crate::client::{ClientRegistry, GuardedSource};
use crate::pagination::{ReadOutcome, RandomQueryBuilder, split_read};
use crate::protocol::{RecordMessage, SyncConfig};
use crate::sync_run::models::SyncDefinition;
use crate::{Error, Result};

pub const MAX_PREVIEW_ROWS: usize = 100;

/// Read up to `limit` randomly ordered rows of the sync's model.
#[tracing::instrument(level = "info", skip(clients, sync), fields(sync_id = %sync.id))]
pub async fn preview_records(
    clients: &ClientRegistry,
    sync: &SyncDefinition,
    limit: usize,
) -> Result<Vec<RecordMessage>> {
    if limit == 0 || limit > MAX_PREVIEW_ROWS {
        return Err(Error::InvalidInput(format!(
            "preview limit must be between 1 and {MAX_PREVIEW_ROWS}"
        )));
    }
    let query = RandomQueryBuilder::build_random_query(
        &sync.model.query,
        sync.model.query_type,
        sync.source.query_dialect,
        limit,
    )?;
    let mut sync_config = SyncConfig::for_sync(sync, None)?.with_query(query);
    sync_config.limit = Some(limit);
    sync_config.offset = Some(0);

    let client = clients.source(&sync.source.connector_name).await?;
    let source = GuardedSource::new(sync.source.connector_name.clone(), client);
    match split_read(source.read(&sync_config).await) {
        ReadOutcome::Records(mut records) => {
            records.truncate(limit);
            Ok(records)
        }
        ReadOutcome::Failed(message) => Err(Error::BackendMessage(format!(
            "{} preview failed: {message}",
            sync.source.connector_name
        ))),
    }
}
