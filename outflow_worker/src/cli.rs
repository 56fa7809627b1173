use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "outflow", version, about = "Outflow reverse-ETL worker")]
pub struct Cli {
    /// Data directory holding the SQLite store (overrides OUTFLOW_DATA_DIR).
    #[arg(long, global = true, env = "OUTFLOW_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Schedule every enabled sync and run workflows until Ctrl-C (default).
    Run,

    /// Create the store schema if it does not exist yet.
    Migrate,

    /// Create or replace a sync from a JSON definition file.
    Apply {
        /// Path to the sync definition (JSON).
        path: PathBuf,
    },

    /// Run a sync once, in the foreground, and print the finished run.
    Trigger {
        #[arg(long)]
        sync_id: Uuid,
    },

    /// List recent runs of a sync, newest first.
    Runs {
        #[arg(long)]
        sync_id: Uuid,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Print a random sample of the rows a sync would send.
    Preview {
        #[arg(long)]
        sync_id: Uuid,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Check the source and destination connections of a sync.
    Check {
        #[arg(long)]
        sync_id: Uuid,
    },

    /// Print the effective configuration.
    Config,
}
