use chrono::Utc;
use outflow_core::activities::{
    CreateSyncRunActivity, ExtractorActivity, LoaderActivity, LocalActivityExecutor, Reporter,
    ReporterActivity, ScheduleSyncActivity, TerminateWorkflowActivity, WorkflowContext,
};
use outflow_core::protocol::RecordMessage;
use outflow_core::{
    ClientRegistry, Error, ListQuery, LocalWorkflowEngine, Loader, Result, SqliteSyncStore,
    SyncDefinition, SyncExtractor, SyncId, SyncRun, SyncScheduler, SyncStore, SyncWorkflow,
    SyncWorkflowInput, WorkerConfig,
};
use serde_json::{Value, json};
use std::sync::Arc;

/// Everything a worker process runs, built once from [`WorkerConfig`].
pub struct Worker {
    pub config: WorkerConfig,
    pub store: Arc<dyn SyncStore>,
    pub clients: Arc<ClientRegistry>,
    pub executor: Arc<LocalActivityExecutor>,
    pub workflow: Arc<SyncWorkflow>,
    pub engine: Arc<LocalWorkflowEngine>,
}

impl Worker {
    /// Open the SQLite store under `config.data_dir` and register the
    /// built-in connector clients.
    #[tracing::instrument(level = "info", skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn build(config: WorkerConfig) -> Result<Self> {
        let store: Arc<dyn SyncStore> = Arc::new(SqliteSyncStore::new(config.db_path()).await?);
        let clients = Arc::new(ClientRegistry::new());
        outflow_integrations::register_defaults(&clients).await?;
        Self::assemble(config, store, clients)
    }

    pub fn assemble(
        config: WorkerConfig,
        store: Arc<dyn SyncStore>,
        clients: Arc<ClientRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(LocalActivityExecutor::new());
        executor.register(Arc::new(CreateSyncRunActivity::new(store.clone())));

        let extractor =
            SyncExtractor::new(store.clone(), clients.clone(), config.extract_batch_size)?;
        executor.register(Arc::new(
            ExtractorActivity::new(Arc::new(extractor)).with_retry(config.extractor_retry.clone()),
        ));
        let loader = Loader::new(store.clone(), clients.clone(), config.load_batch_size)?;
        executor.register(Arc::new(LoaderActivity::new(Arc::new(loader))));
        executor.register(Arc::new(ReporterActivity::new(Arc::new(Reporter::new(
            store.clone(),
        )))));

        let workflow = Arc::new(SyncWorkflow::new(executor.clone()));
        let engine = Arc::new(LocalWorkflowEngine::new(workflow.clone()));
        // Scheduling activities need the engine, which needs the executor.
        executor.register(Arc::new(ScheduleSyncActivity::new(store.clone(), engine.clone())));
        executor.register(Arc::new(TerminateWorkflowActivity::new(engine.clone())));

        Ok(Self {
            config,
            store,
            clients,
            executor,
            workflow,
            engine,
        })
    }

    pub fn scheduler(&self) -> Result<SyncScheduler> {
        SyncScheduler::new(
            self.store.clone(),
            self.engine.clone(),
            self.executor.clone(),
            self.config.scheduler_poll_interval,
        )
    }

    async fn sync(&self, sync_id: SyncId) -> Result<SyncDefinition> {
        self.store
            .get_sync(sync_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync {sync_id}")))
    }

    /// Store a sync definition. Its connectors must name registered clients.
    /// Any previous workflow registration is dropped; the scheduler picks the
    /// sync up again on its next tick.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn apply(&self, raw: &str) -> Result<SyncDefinition> {
        let mut sync: SyncDefinition = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("sync definition: {e}")))?;
        self.clients.source(&sync.source.connector_name).await?;
        self.clients
            .destination(&sync.destination.connector_name)
            .await?;
        sync.workflow_id = None;
        sync.updated_at = Utc::now();
        self.store.upsert_sync(&sync).await?;
        tracing::info!(sync_id = %sync.id, "sync applied");
        Ok(sync)
    }

    /// Run the sync workflow once in the foreground.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn trigger(&self, sync_id: SyncId) -> Result<SyncRun> {
        let sync = self.sync(sync_id).await?;
        let run_id = ulid::Ulid::new().to_string();
        let ctx = WorkflowContext::new(format!("{}-manual", sync.id), run_id);
        self.workflow
            .run(&ctx, SyncWorkflowInput::general(sync.id))
            .await
    }

    pub async fn runs(&self, sync_id: SyncId, limit: usize) -> Result<Vec<SyncRun>> {
        self.sync(sync_id).await?;
        self.store
            .list_sync_runs(sync_id, ListQuery { limit, offset: 0 })
            .await
    }

    pub async fn preview(&self, sync_id: SyncId, limit: usize) -> Result<Vec<RecordMessage>> {
        let sync = self.sync(sync_id).await?;
        outflow_core::preview::preview_records(&self.clients, &sync, limit).await
    }

    /// Connection status of both ends of a sync.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn check(&self, sync_id: SyncId) -> Result<Value> {
        let sync = self.sync(sync_id).await?;
        let source = self
            .clients
            .source(&sync.source.connector_name)
            .await?
            .check_connection(&sync.source.connection_spec)
            .await?;
        let destination = self
            .clients
            .destination(&sync.destination.connector_name)
            .await?
            .check_connection(&sync.destination.connection_spec)
            .await?;
        Ok(json!({
            "sync_id": sync.id,
            "source": source,
            "destination": destination,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outflow_core::SyncRunStatus;
    use sqlx::sqlite::SqlitePool;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("outflow_worker_{}", uuid::Uuid::new_v4()))
    }

    async fn worker(dir: &PathBuf) -> Worker {
        let dir = dir.display().to_string();
        let config = WorkerConfig::from_lookup(|key| {
            (key == "OUTFLOW_DATA_DIR").then(|| dir.clone())
        })
        .unwrap();
        Worker::build(config).await.unwrap()
    }

    async fn seed_source(dir: &PathBuf, rows: usize) -> String {
        tokio::fs::create_dir_all(dir).await.unwrap();
        let path = dir.join("source.db");
        let pool = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        sqlx::query("CREATE TABLE contacts (id INTEGER PRIMARY KEY, email TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        for i in 0..rows {
            sqlx::query("INSERT INTO contacts (email) VALUES (?)")
                .bind(format!("u{i}@x.com"))
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
        path.display().to_string()
    }

    fn definition(id: uuid::Uuid, database: &str, source_connector: &str) -> String {
        json!({
            "id": id,
            "workspace_id": uuid::Uuid::new_v4(),
            "source": {
                "id": uuid::Uuid::new_v4(),
                "name": "local",
                "connector_type": "source",
                "connector_name": source_connector,
                "connection_spec": {"database": database},
                "query_dialect": "sqlite",
            },
            "destination": {
                "id": uuid::Uuid::new_v4(),
                "name": "hook",
                "connector_type": "destination",
                "connector_name": "http",
                "connection_spec": {"url": "http://127.0.0.1:9/hook"},
                "query_dialect": "none",
            },
            "model": {
                "name": "contacts",
                "query": "SELECT * FROM contacts",
                "query_type": "raw_sql",
                "primary_key": "id",
            },
            "catalog": {"streams": [{"name": "contacts"}]},
            "stream_name": "contacts",
            "sync_mode": "incremental",
            "destination_sync_mode": "upsert",
            "schedule": {"type": "manual"},
            "workflow_id": "stale-workflow",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
        })
        .to_string()
    }

    #[tokio::test]
    async fn apply_stores_sync_without_workflow() {
        let dir = temp_dir();
        let w = worker(&dir).await;
        let id = uuid::Uuid::new_v4();
        let sync = w.apply(&definition(id, "unused.db", "sqlite")).await.unwrap();
        assert_eq!(sync.id, SyncId(id));

        let stored = w.store.get_sync(sync.id).await.unwrap().unwrap();
        assert!(stored.workflow_id.is_none());
        assert!(w.runs(sync.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn apply_rejects_unknown_connectors_and_bad_json() {
        let w = worker(&temp_dir()).await;
        let err = w
            .apply(&definition(uuid::Uuid::new_v4(), "x.db", "oracle"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = w.apply("{not json").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn preview_samples_the_source() {
        let dir = temp_dir();
        let db = seed_source(&dir, 5).await;
        let w = worker(&dir).await;
        let sync = w.apply(&definition(uuid::Uuid::new_v4(), &db, "sqlite")).await.unwrap();

        let rows = w.preview(sync.id, 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.data.contains_key("email")));
    }

    #[tokio::test]
    async fn trigger_with_nothing_to_send_completes() {
        let dir = temp_dir();
        let db = seed_source(&dir, 0).await;
        let w = worker(&dir).await;
        let sync = w.apply(&definition(uuid::Uuid::new_v4(), &db, "sqlite")).await.unwrap();

        let run = w.trigger(sync.id).await.unwrap();
        assert_eq!(run.status, SyncRunStatus::Complete);
        assert_eq!(w.runs(sync.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_sync_is_not_found() {
        let w = worker(&temp_dir()).await;
        let err = w.check(SyncId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
