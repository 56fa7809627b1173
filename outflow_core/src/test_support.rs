use crate::activities::{
    ActivityContext, CreateSyncRunActivity, ExtractorActivity, LoaderActivity,
    LocalActivityExecutor, Reporter, ReporterActivity,
};
use crate::client::{ClientRegistry, ConnectionChecker, Discoverer, Reader, Writer};
use crate::extract::SyncExtractor;
use crate::load::Loader;
use crate::models::{ConnectorId, SyncId, SyncRunId, WorkspaceId};
use crate::protocol::{
    Catalog, ConnectionStatus, ConnectionStatusType, Connector, ConnectorType, ControlMessage,
    DestinationSyncMode, LogMessage, Model, QueryDialect, QueryType, RecordMessage, SchemaMode,
    Stream, SyncConfig, SyncMode, TrackingMessage,
};
use crate::store::{MemorySyncStore, SyncStore};
use crate::sync_run::models::{
    RunType, SyncDefinition, SyncRecordAction, SyncRun, SyncSchedule,
};
use crate::workflow::{SyncWorkflowInput, WorkflowEngine, WorkflowInfo, WorkflowKind};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Incremental `warehouse` -> `crm` sync of a `contacts` model keyed by `id`.
pub(crate) fn sample_sync() -> SyncDefinition {
    let now = Utc::now();
    SyncDefinition {
        id: SyncId::new(),
        workspace_id: WorkspaceId::new(),
        source: Connector {
            id: ConnectorId::new(),
            name: "warehouse".to_string(),
            connector_type: ConnectorType::Source,
            connector_name: "table".to_string(),
            connection_spec: json!({}),
            query_dialect: QueryDialect::Postgres,
        },
        destination: Connector {
            id: ConnectorId::new(),
            name: "crm".to_string(),
            connector_type: ConnectorType::Destination,
            connector_name: "recording".to_string(),
            connection_spec: json!({}),
            query_dialect: QueryDialect::None,
        },
        model: Model {
            name: "contacts".to_string(),
            query: "SELECT * FROM contacts".to_string(),
            query_type: QueryType::RawSql,
            primary_key: "id".to_string(),
        },
        catalog: Catalog {
            streams: vec![Stream::new("contacts")],
            request_rate_limit: None,
            request_rate_limit_unit: Default::default(),
            request_rate_concurrency: None,
            schema_mode: SchemaMode::default(),
        },
        stream_name: "contacts".to_string(),
        sync_mode: SyncMode::Incremental,
        destination_sync_mode: DestinationSyncMode::Upsert,
        cursor_field: None,
        current_cursor_field: None,
        schedule: SyncSchedule::Manual,
        enabled: true,
        workflow_id: None,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
struct TableState {
    rows: Vec<Value>,
    reads: u64,
    queries: Vec<String>,
    fail_all: Option<String>,
    fail_on: Option<(u64, String)>,
    ignore_paging: bool,
}

/// In-memory source table. Reads honour the cursor window, cursor ordering
/// and `limit`/`offset` of the SyncConfig like a SQL source would.
#[derive(Default)]
pub(crate) struct TableSource {
    state: Mutex<TableState>,
}

impl TableSource {
    pub(crate) fn new(rows: Vec<Value>) -> Self {
        let source = Self::default();
        source.set_rows(rows);
        source
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn set_rows(&self, rows: Vec<Value>) {
        self.state().rows = rows;
    }

    /// Every read and connection check fails with `message`.
    pub(crate) fn fail_reads(&self, message: &str) {
        self.state().fail_all = Some(message.to_string());
    }

    /// The `n`-th read (1-based, counted over the source's lifetime) fails.
    pub(crate) fn fail_on_read(&self, n: u64, message: &str) {
        self.state().fail_on = Some((n, message.to_string()));
    }

    /// Return every row on every read, as a source that ignores paging would.
    pub(crate) fn ignore_paging(&self) {
        self.state().ignore_paging = true;
    }

    pub(crate) fn reads(&self) -> u64 {
        self.state().reads
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.state().queries.clone()
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => value_text(a).cmp(&value_text(b)),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn at_or_after(value: &Value, cursor: &str) -> bool {
    match (value.as_f64(), cursor.parse::<f64>()) {
        (Some(x), Ok(y)) => x >= y,
        _ => value_text(value).as_str() >= cursor,
    }
}

#[async_trait]
impl ConnectionChecker for TableSource {
    async fn check_connection(&self, _connection_spec: &Value) -> Result<ConnectionStatus> {
        match self.state().fail_all.clone() {
            Some(message) => Err(Error::BackendMessage(message)),
            None => Ok(ConnectionStatus::succeeded()),
        }
    }
}

#[async_trait]
impl Discoverer for TableSource {
    async fn discover(&self, _connection_spec: &Value) -> Result<Catalog> {
        Ok(sample_sync().catalog)
    }
}

#[async_trait]
impl Reader for TableSource {
    async fn read(&self, sync_config: &SyncConfig) -> Result<Vec<RecordMessage>> {
        let mut state = self.state();
        state.reads += 1;
        state.queries.push(sync_config.model.query.clone());
        if let Some(message) = state.fail_all.clone() {
            return Err(Error::BackendMessage(message));
        }
        if let Some((n, message)) = state.fail_on.clone() {
            if state.reads == n {
                return Err(Error::BackendMessage(message));
            }
        }

        let mut rows = state.rows.clone();
        if !state.ignore_paging {
            if let Some(field) = sync_config.cursor_field.as_deref() {
                if let Some(cursor) = sync_config.current_cursor_field.as_deref() {
                    rows.retain(|r| r.get(field).is_some_and(|v| at_or_after(v, cursor)));
                }
                rows.sort_by(|a, b| {
                    compare_values(a.get(field).unwrap_or(&Value::Null), b.get(field).unwrap_or(&Value::Null))
                });
            }
            let offset = sync_config.offset.unwrap_or(0);
            let limit = sync_config.limit.unwrap_or(usize::MAX);
            rows = rows.into_iter().skip(offset).take(limit).collect();
        }
        rows.into_iter().map(RecordMessage::from_value).collect()
    }
}

#[derive(Default)]
struct RecordingState {
    writes: Vec<(SyncRecordAction, Vec<Value>)>,
    failing_keys: HashSet<String>,
    fail_clear: bool,
}

/// Destination that remembers every write. Records whose `id` is marked
/// failing are rejected.
pub(crate) struct RecordingDestination {
    state: Mutex<RecordingState>,
    clears: AtomicU64,
    supports_clear: bool,
}

impl RecordingDestination {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RecordingState::default()),
            clears: AtomicU64::new(0),
            supports_clear: true,
        }
    }

    /// Falls back to the default `clear_all_records`, which is unsupported.
    pub(crate) fn without_clear() -> Self {
        Self {
            supports_clear: false,
            ..Self::new()
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn fail_primary_key(&self, pk: &str) {
        self.state().failing_keys.insert(pk.to_string());
    }

    /// Clears are answered with a failed ControlMessage.
    pub(crate) fn fail_clear(&self) {
        self.state().fail_clear = true;
    }

    pub(crate) fn writes(&self) -> Vec<(SyncRecordAction, Vec<Value>)> {
        self.state().writes.clone()
    }

    /// Calls to `clear_all_records`.
    pub(crate) fn clears(&self) -> u64 {
        self.clears.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl ConnectionChecker for RecordingDestination {
    async fn check_connection(&self, _connection_spec: &Value) -> Result<ConnectionStatus> {
        Ok(ConnectionStatus::succeeded())
    }
}

#[async_trait]
impl Discoverer for RecordingDestination {
    async fn discover(&self, _connection_spec: &Value) -> Result<Catalog> {
        Ok(sample_sync().catalog)
    }
}

#[async_trait]
impl Writer for RecordingDestination {
    async fn write(
        &self,
        _sync_config: &SyncConfig,
        records: &[Value],
        action: SyncRecordAction,
    ) -> Result<TrackingMessage> {
        let mut state = self.state();
        state.writes.push((action, records.to_vec()));
        let rejected: Vec<String> = records
            .iter()
            .filter_map(|r| r.get("id").map(value_text))
            .filter(|id| state.failing_keys.contains(id))
            .collect();
        if rejected.is_empty() {
            return Ok(TrackingMessage::succeeded(records.len() as u64));
        }
        let mut tracking = TrackingMessage::failed(
            rejected.len() as u64,
            LogMessage::error(format!("rejected id {}", rejected.join(","))),
        );
        tracking.success = (records.len() - rejected.len()) as u64;
        Ok(tracking)
    }

    async fn clear_all_records(&self, sync_config: &SyncConfig) -> Result<ControlMessage> {
        self.clears.fetch_add(1, AtomicOrdering::SeqCst);
        if !self.supports_clear {
            return Err(Error::InvalidInput(format!(
                "destination {} does not support clearing records",
                sync_config.destination.connector_name
            )));
        }
        if self.state().fail_clear {
            return Ok(ControlMessage::full_refresh(
                ConnectionStatusType::Failed,
                json!({"detail": "permission denied"}),
            ));
        }
        Ok(ControlMessage::full_refresh(
            ConnectionStatusType::Succeeded,
            json!({"detail": "cleared"}),
        ))
    }
}

/// Reports cancellation once `n` heartbeats have been received.
pub(crate) struct CancelAfter {
    n: u64,
    heartbeats: AtomicU64,
}

impl CancelAfter {
    pub(crate) fn new(n: u64) -> Self {
        Self {
            n,
            heartbeats: AtomicU64::new(0),
        }
    }
}

impl ActivityContext for CancelAfter {
    fn heartbeat(&self, _details: Value) {
        self.heartbeats.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.heartbeats.load(AtomicOrdering::SeqCst) >= self.n
    }
}

/// Workflow engine that only records what it was asked to do.
#[derive(Default)]
pub(crate) struct RecordingEngine {
    cron: Mutex<BTreeMap<String, String>>,
    started: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
}

impl RecordingEngine {
    pub(crate) fn register_cron(&self, workflow_id: &str) {
        lock(&self.cron).insert(workflow_id.to_string(), "@hourly".to_string());
    }

    pub(crate) fn cron_ids(&self) -> Vec<String> {
        lock(&self.cron).keys().cloned().collect()
    }

    pub(crate) fn started(&self) -> Vec<String> {
        lock(&self.started).clone()
    }

    pub(crate) fn terminated(&self) -> Vec<String> {
        lock(&self.terminated).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl WorkflowEngine for RecordingEngine {
    async fn start_cron_workflow(
        &self,
        workflow_id: &str,
        cron: &str,
        _input: SyncWorkflowInput,
    ) -> Result<()> {
        let mut map = lock(&self.cron);
        if map.contains_key(workflow_id) {
            return Err(Error::Conflict(workflow_id.to_string()));
        }
        map.insert(workflow_id.to_string(), cron.to_string());
        Ok(())
    }

    async fn start_workflow(&self, workflow_id: &str, _input: SyncWorkflowInput) -> Result<String> {
        lock(&self.started).push(workflow_id.to_string());
        Ok(ulid::Ulid::new().to_string())
    }

    async fn terminate_workflow(&self, workflow_id: &str) -> Result<()> {
        if lock(&self.cron).remove(workflow_id).is_none() {
            return Err(Error::WorkflowNotFound(workflow_id.to_string()));
        }
        lock(&self.terminated).push(workflow_id.to_string());
        Ok(())
    }

    async fn list_workflows(&self) -> Vec<WorkflowInfo> {
        lock(&self.cron)
            .iter()
            .map(|(id, cron)| WorkflowInfo {
                workflow_id: id.clone(),
                sync_id: SyncId::new(),
                kind: WorkflowKind::Cron {
                    expression: cron.clone(),
                },
                registered_at: Utc::now(),
            })
            .collect()
    }
}

/// A stored sample sync wired to a `TableSource` and a `RecordingDestination`.
pub(crate) struct Harness {
    pub(crate) store: Arc<MemorySyncStore>,
    pub(crate) clients: Arc<ClientRegistry>,
    pub(crate) source: Arc<TableSource>,
    pub(crate) destination: Arc<RecordingDestination>,
    pub(crate) sync_id: SyncId,
}

impl Harness {
    pub(crate) async fn new(sync: SyncDefinition) -> Self {
        let store = Arc::new(MemorySyncStore::new());
        store.upsert_sync(&sync).await.unwrap();
        let clients = Arc::new(ClientRegistry::new());
        let source = Arc::new(TableSource::new(Vec::new()));
        let destination = Arc::new(RecordingDestination::new());
        clients
            .register_source(&sync.source.connector_name, source.clone())
            .await
            .unwrap();
        clients
            .register_destination(&sync.destination.connector_name, destination.clone())
            .await
            .unwrap();
        Self {
            store,
            clients,
            source,
            destination,
            sync_id: sync.id,
        }
    }

    pub(crate) async fn create_run(&self, run_type: RunType) -> SyncRun {
        let sync = self.store.get_sync(self.sync_id).await.unwrap().unwrap();
        self.store
            .find_or_create_pending_run(&SyncRun::pending(&sync, run_type, None, Utc::now()))
            .await
            .unwrap()
    }

    pub(crate) fn extractor(&self) -> SyncExtractor {
        self.extractor_with_batch(100)
    }

    pub(crate) fn extractor_with_batch(&self, batch_size: usize) -> SyncExtractor {
        SyncExtractor::new(self.store.clone(), self.clients.clone(), batch_size).unwrap()
    }

    pub(crate) fn loader(&self) -> Loader {
        Loader::new(self.store.clone(), self.clients.clone(), 500).unwrap()
    }

    pub(crate) fn reporter(&self) -> Reporter {
        Reporter::new(self.store.clone())
    }

    /// Load and report an extracted run.
    pub(crate) async fn finish_run(&self, sync_run_id: SyncRunId) -> SyncRun {
        self.loader()
            .write(sync_run_id, &crate::activities::NoopActivityContext)
            .await
            .unwrap();
        self.reporter()
            .report(crate::activities::ReportInput {
                sync_run_id,
                error: None,
                cancelled: false,
            })
            .await
            .unwrap()
    }

    /// Executor with the four sync workflow activities registered.
    pub(crate) fn executor(&self) -> Arc<LocalActivityExecutor> {
        let executor = Arc::new(LocalActivityExecutor::new());
        executor.register(Arc::new(CreateSyncRunActivity::new(self.store.clone())));
        executor.register(Arc::new(ExtractorActivity::new(Arc::new(self.extractor()))));
        executor.register(Arc::new(LoaderActivity::new(Arc::new(self.loader()))));
        executor.register(Arc::new(ReporterActivity::new(Arc::new(self.reporter()))));
        executor
    }
}
