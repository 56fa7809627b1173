use clap::Parser;
use outflow_core::{SyncId, WorkerConfig};
use outflow_worker::app::Worker;
use outflow_worker::cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    outflow_core::o11y::init_tracing_from_env()?;
    let cli = Cli::parse();

    let mut config = WorkerConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config => print_json(&config.describe())?,
        Commands::Migrate => {
            let store = outflow_core::SqliteSyncStore::new(config.db_path()).await?;
            store.migrate().await?;
            tracing::info!(db = %config.db_path().display(), "store migrations applied");
        }
        Commands::Run => {
            let worker = Worker::build(config).await?;
            let scheduler = worker.scheduler()?;
            let shutdown = CancellationToken::new();
            let loop_token = shutdown.clone();
            let handle = tokio::spawn(async move { scheduler.run_loop(loop_token).await });
            tracing::info!("outflow worker started");

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            shutdown.cancel();
            worker.engine.shutdown();
            handle.await?;
        }
        Commands::Apply { path } => {
            let raw = tokio::fs::read_to_string(&path).await?;
            let worker = Worker::build(config).await?;
            let sync = worker.apply(&raw).await?;
            print_json(&serde_json::json!({"sync_id": sync.id}))?;
        }
        Commands::Trigger { sync_id } => {
            let worker = Worker::build(config).await?;
            let run = worker.trigger(SyncId(sync_id)).await?;
            print_json(&run)?;
        }
        Commands::Runs { sync_id, limit } => {
            let worker = Worker::build(config).await?;
            print_json(&worker.runs(SyncId(sync_id), limit).await?)?;
        }
        Commands::Preview { sync_id, limit } => {
            let worker = Worker::build(config).await?;
            let rows: Vec<_> = worker
                .preview(SyncId(sync_id), limit)
                .await?
                .into_iter()
                .map(|r| r.data)
                .collect();
            print_json(&rows)?;
        }
        Commands::Check { sync_id } => {
            let worker = Worker::build(config).await?;
            print_json(&worker.check(SyncId(sync_id)).await?)?;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
