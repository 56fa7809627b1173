//! Webhook destination.
//!
//! Connection spec:
//! `{"url": "https://...", "headers": {"Authorization": "..."}, "batch_size": 100}`.
//! Each write posts `{"stream", "action", "records"}` to the stream's `url`
//! (falling back to the connection url). A full refresh clear is a `DELETE`.

use async_trait::async_trait;
use outflow_core::client::{ConnectionChecker, Discoverer, Writer};
use outflow_core::protocol::{
    Catalog, ConnectionStatus, ConnectionStatusType, ConnectorSpecification, ControlMessage,
    DestinationSyncMode, LogMessage, Stream, SyncConfig, SyncMode, TrackingMessage,
};
use outflow_core::sync_run::SyncRecordAction;
use outflow_core::{Error, Result};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::instrument;

pub const CONNECTOR_NAME: &str = "http";

const DEFAULT_BATCH_SIZE: usize = 100;
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct HttpSpec {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    batch_size: Option<usize>,
}

impl HttpSpec {
    fn parse(connection_spec: &Value) -> Result<Self> {
        let spec: Self = serde_json::from_value(connection_spec.clone())
            .map_err(|e| Error::InvalidInput(format!("http connection spec: {e}")))?;
        if !(spec.url.starts_with("http://") || spec.url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "http connection spec: url {:?} is not http(s)",
                spec.url
            )));
        }
        Ok(spec)
    }
}

#[derive(Clone)]
pub struct HttpDestination {
    client: Client,
}

impl HttpDestination {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::backend("http destination client", e))?;
        Ok(Self { client })
    }

    fn request(&self, method: Method, url: &str, spec: &HttpSpec) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        for (name, value) in &spec.headers {
            req = req.header(name, value);
        }
        req
    }
}

fn action_name(action: SyncRecordAction) -> &'static str {
    match action {
        SyncRecordAction::DestinationInsert => "insert",
        SyncRecordAction::DestinationUpdate => "update",
        SyncRecordAction::DestinationDelete => "delete",
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl ConnectionChecker for HttpDestination {
    #[instrument(level = "info", skip_all)]
    async fn check_connection(&self, connection_spec: &Value) -> Result<ConnectionStatus> {
        let spec = HttpSpec::parse(connection_spec)?;
        match self.request(Method::HEAD, &spec.url, &spec).send().await {
            Ok(resp) if resp.status().is_server_error() => Ok(ConnectionStatus::failed(format!(
                "{} answered {}",
                spec.url,
                resp.status()
            ))),
            Ok(_) => Ok(ConnectionStatus::succeeded()),
            Err(e) => Ok(ConnectionStatus::failed(e.to_string())),
        }
    }
}

#[async_trait]
impl Discoverer for HttpDestination {
    async fn discover(&self, connection_spec: &Value) -> Result<Catalog> {
        let spec = HttpSpec::parse(connection_spec)?;
        let mut stream = Stream::new("records");
        stream.batch_support = true;
        stream.batch_size = spec.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);
        stream.supported_sync_modes = vec![SyncMode::FullRefresh, SyncMode::Incremental];
        stream.url = Some(spec.url);
        stream.request_method = Some("POST".to_string());
        Ok(Catalog {
            streams: vec![stream],
            ..Catalog::default()
        })
    }

    fn connector_spec(&self) -> ConnectorSpecification {
        ConnectorSpecification {
            documentation_url: None,
            connection_specification: json!({
                "type": "object",
                "required": ["url"],
                "properties": {
                    "url": {"type": "string"},
                    "headers": {"type": "object"},
                    "batch_size": {"type": "integer", "minimum": 1},
                },
            }),
            supports_normalization: false,
            supports_dbt: false,
            supported_destination_sync_modes: vec![
                DestinationSyncMode::Insert,
                DestinationSyncMode::Upsert,
            ],
            stream_type: None,
        }
    }
}

#[async_trait]
impl Writer for HttpDestination {
    #[instrument(level = "debug", skip_all, fields(sync_id = %sync_config.sync_id, stream = %sync_config.stream.name, records = records.len()))]
    async fn write(
        &self,
        sync_config: &SyncConfig,
        records: &[Value],
        action: SyncRecordAction,
    ) -> Result<TrackingMessage> {
        let spec = HttpSpec::parse(&sync_config.destination.connection_spec)?;
        let url = sync_config.stream.url.as_deref().unwrap_or(&spec.url);
        let method = match sync_config.stream.request_method.as_deref() {
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|e| Error::InvalidInput(format!("request method {m:?}: {e}")))?,
            None => Method::POST,
        };
        let body = json!({
            "stream": sync_config.stream.name,
            "action": action_name(action),
            "records": records,
        });

        let resp = self
            .request(method, url, &spec)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::backend("http destination write", e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(TrackingMessage::succeeded(records.len() as u64));
        }
        let text = resp.text().await.unwrap_or_default();
        tracing::warn!(%status, url, "destination rejected batch");
        Ok(TrackingMessage::failed(
            records.len() as u64,
            LogMessage::error(format!("{url} answered {status}: {}", truncate(&text)))
                .with_name(CONNECTOR_NAME),
        ))
    }

    #[instrument(level = "info", skip_all, fields(sync_id = %sync_config.sync_id))]
    async fn clear_all_records(&self, sync_config: &SyncConfig) -> Result<ControlMessage> {
        let spec = HttpSpec::parse(&sync_config.destination.connection_spec)?;
        let url = sync_config.stream.url.as_deref().unwrap_or(&spec.url);
        let resp = self
            .request(Method::DELETE, url, &spec)
            .send()
            .await
            .map_err(|e| Error::backend("http destination clear", e))?;
        let status = if resp.status().is_success() {
            ConnectionStatusType::Succeeded
        } else {
            ConnectionStatusType::Failed
        };
        Ok(ControlMessage::full_refresh(
            status,
            json!({"url": url, "http_status": resp.status().as_u16()}),
        ))
    }
}
