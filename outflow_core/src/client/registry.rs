use crate::client::traits::{DestinationClient, SourceClient};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Connector name -> client implementation.
#[derive(Default)]
pub struct ClientRegistry {
    sources: RwLock<HashMap<String, Arc<dyn SourceClient>>>,
    destinations: RwLock<HashMap<String, Arc<dyn DestinationClient>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(level = "debug", skip(self, client))]
    pub async fn register_source(&self, name: &str, client: Arc<dyn SourceClient>) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("source client name is empty".to_string()));
        }
        self.sources.write().await.insert(name.to_string(), client);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, client))]
    pub async fn register_destination(
        &self,
        name: &str,
        client: Arc<dyn DestinationClient>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "destination client name is empty".to_string(),
            ));
        }
        self.destinations
            .write()
            .await
            .insert(name.to_string(), client);
        Ok(())
    }

    pub async fn source(&self, name: &str) -> Result<Arc<dyn SourceClient>> {
        self.sources
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("source client {name}")))
    }

    pub async fn destination(&self, name: &str) -> Result<Arc<dyn DestinationClient>> {
        self.destinations
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("destination client {name}")))
    }

    pub async fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn destination_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.destinations.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingDestination, TableSource};

    #[tokio::test]
    async fn lookup_by_connector_name() {
        let registry = ClientRegistry::new();
        registry
            .register_source("table", Arc::new(TableSource::new(vec![])))
            .await
            .unwrap();
        registry
            .register_destination("recording", Arc::new(RecordingDestination::new()))
            .await
            .unwrap();

        assert!(registry.source("table").await.is_ok());
        assert!(registry.destination("recording").await.is_ok());
        assert!(matches!(
            registry.source("postgres").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(registry.source_names().await, vec!["table".to_string()]);
        assert!(registry.register_source(" ", Arc::new(TableSource::new(vec![]))).await.is_err());
    }
}
