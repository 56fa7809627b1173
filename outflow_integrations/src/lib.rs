//! Reference connector clients for Outflow.
//!
//! Each client is behind a cargo feature so a worker only links the drivers
//! it needs.

#[cfg(feature = "http")]
pub mod http_destination;
#[cfg(feature = "sqlite")]
pub mod sqlite_source;

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(feature = "http")]
pub use http_destination::HttpDestination;
#[cfg(feature = "sqlite")]
pub use sqlite_source::SqliteSource;

use outflow_core::{ClientRegistry, Result};
#[cfg(any(feature = "http", feature = "sqlite"))]
use std::sync::Arc;

/// Register every client compiled into this build under its connector name.
#[tracing::instrument(level = "info", skip_all)]
pub async fn register_defaults(registry: &ClientRegistry) -> Result<()> {
    #[cfg(feature = "sqlite")]
    registry
        .register_source(sqlite_source::CONNECTOR_NAME, Arc::new(SqliteSource::new()))
        .await?;
    #[cfg(feature = "http")]
    registry
        .register_destination(http_destination::CONNECTOR_NAME, Arc::new(HttpDestination::new()?))
        .await?;
    Ok(())
}

#[cfg(all(test, feature = "http", feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_register_under_connector_names() {
        let registry = ClientRegistry::new();
        register_defaults(&registry).await.unwrap();
        register_defaults(&registry).await.unwrap();
        assert_eq!(registry.source_names().await, vec!["sqlite".to_string()]);
        assert_eq!(registry.destination_names().await, vec!["http".to_string()]);
    }
}
