use crate::activities::RetryPolicy;
use crate::{Error, Result};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;

pub const DB_FILE: &str = "outflow.db";

/// Worker settings, read from `OUTFLOW_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub data_dir: PathBuf,
    /// Rows per source read.
    pub extract_batch_size: usize,
    /// Pending records fetched per loader chunk.
    pub load_batch_size: usize,
    pub extractor_retry: RetryPolicy,
    pub scheduler_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".outflow"),
            extract_batch_size: 10_000,
            load_batch_size: 500,
            extractor_retry: RetryPolicy::default(),
            scheduler_poll_interval: Duration::from_millis(60_000),
        }
    }
}

impl WorkerConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or unparsable values
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let data_dir = lookup("OUTFLOW_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let extract_batch_size = parsed("OUTFLOW_EXTRACT_BATCH_SIZE")
            .map(|v| v as usize)
            .unwrap_or(defaults.extract_batch_size);
        let load_batch_size = parsed("OUTFLOW_LOAD_BATCH_SIZE")
            .map(|v| v as usize)
            .unwrap_or(defaults.load_batch_size);

        let mut extractor_retry = defaults.extractor_retry;
        if let Some(secs) = parsed("OUTFLOW_EXTRACTOR_RETRY_INTERVAL_SECS") {
            extractor_retry.initial_interval = Duration::from_secs(secs);
        }
        if let Some(backoff) =
            lookup("OUTFLOW_EXTRACTOR_RETRY_BACKOFF").and_then(|v| v.trim().parse::<f64>().ok())
        {
            extractor_retry.backoff_coefficient = backoff;
        }
        if let Some(attempts) = parsed("OUTFLOW_EXTRACTOR_MAX_ATTEMPTS") {
            extractor_retry.maximum_attempts = attempts.min(u32::MAX as u64) as u32;
        }

        let scheduler_poll_interval = parsed("OUTFLOW_SCHEDULER_POLL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.scheduler_poll_interval);

        let cfg = Self {
            data_dir,
            extract_batch_size,
            load_batch_size,
            extractor_retry,
            scheduler_poll_interval,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidInput("data_dir is empty".to_string()));
        }
        if self.extract_batch_size == 0 {
            return Err(Error::InvalidInput("extract_batch_size must be > 0".to_string()));
        }
        if self.load_batch_size == 0 {
            return Err(Error::InvalidInput("load_batch_size must be > 0".to_string()));
        }
        if self.extractor_retry.maximum_attempts == 0 {
            return Err(Error::InvalidInput(
                "extractor max attempts must be > 0".to_string(),
            ));
        }
        let backoff = self.extractor_retry.backoff_coefficient;
        if backoff.is_nan() || backoff < 1.0 {
            return Err(Error::InvalidInput(
                "extractor retry backoff must be >= 1.0".to_string(),
            ));
        }
        if self.scheduler_poll_interval.is_zero() {
            return Err(Error::InvalidInput(
                "scheduler poll interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    /// Effective settings, for printing.
    pub fn describe(&self) -> Value {
        json!({
            "data_dir": self.data_dir.display().to_string(),
            "db_path": self.db_path().display().to_string(),
            "extract_batch_size": self.extract_batch_size,
            "load_batch_size": self.load_batch_size,
            "extractor_retry": {
                "initial_interval_secs": self.extractor_retry.initial_interval.as_secs_f64(),
                "backoff_coefficient": self.extractor_retry.backoff_coefficient,
                "maximum_attempts": self.extractor_retry.maximum_attempts,
            },
            "scheduler_poll_ms": self.scheduler_poll_interval.as_millis() as u64,
        })
    }
}
