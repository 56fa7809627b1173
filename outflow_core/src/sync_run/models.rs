use crate::models::{SyncId, SyncRecordId, SyncRunId, WorkspaceId};
use crate::protocol::{Catalog, Connector, DestinationSyncMode, LogMessage, Model, SyncMode};
use crate::schedule::CronExpr;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

/// When a sync runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncSchedule {
    /// Only runs when triggered explicitly.
    Manual,
    Interval { every: u32, unit: IntervalUnit },
    Cron { expression: String },
}

impl SyncSchedule {
    /// Cron expression for the schedule, `None` for manual syncs.
    pub fn cron_expression(&self) -> Result<Option<String>> {
        let expr = match self {
            SyncSchedule::Manual => return Ok(None),
            SyncSchedule::Interval { every: 0, .. } => {
                return Err(Error::InvalidInput("schedule interval must be > 0".to_string()));
            }
            SyncSchedule::Interval { every, unit } => match unit {
                IntervalUnit::Minutes if *every < 60 => format!("*/{every} * * * *"),
                IntervalUnit::Minutes if every % 60 == 0 && every / 60 < 24 => {
                    format!("0 */{} * * *", every / 60)
                }
                IntervalUnit::Hours if *every < 24 => format!("0 */{every} * * *"),
                IntervalUnit::Hours if every % 24 == 0 && every / 24 <= 31 => {
                    format!("0 0 */{} * *", every / 24)
                }
                IntervalUnit::Days if *every <= 31 => format!("0 0 */{every} * *"),
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "schedule interval {every} {unit:?} cannot be expressed as cron"
                    )));
                }
            },
            SyncSchedule::Cron { expression } => expression.trim().to_string(),
        };
        CronExpr::parse(&expr)?;
        Ok(Some(expr))
    }
}

/// Persisted definition of a source -> destination sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDefinition {
    pub id: SyncId,
    pub workspace_id: WorkspaceId,
    pub source: Connector,
    pub destination: Connector,
    pub model: Model,
    /// Destination catalog as discovered when the sync was configured.
    pub catalog: Catalog,
    pub stream_name: String,
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_field: Option<String>,
    /// Last cursor value seen; the next run resumes from here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_cursor_field: Option<String>,
    pub schedule: SyncSchedule,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl SyncDefinition {
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.destination.validate()?;
        self.model.validate()?;
        if self.stream_name.trim().is_empty() {
            return Err(Error::InvalidInput("stream_name is empty".to_string()));
        }
        if self.catalog.find_stream(&self.stream_name).is_none() {
            return Err(Error::InvalidInput(format!(
                "stream {} not present in destination catalog",
                self.stream_name
            )));
        }
        if let Some(field) = &self.cursor_field {
            if field.trim().is_empty() {
                return Err(Error::InvalidInput("cursor_field is empty".to_string()));
            }
        }
        self.schedule.cron_expression()?;
        Ok(())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Pending,
    Started,
    Querying,
    Queued,
    Running,
    Complete,
    PartialSuccess,
    Failed,
    Canceled,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Pending => "pending",
            SyncRunStatus::Started => "started",
            SyncRunStatus::Querying => "querying",
            SyncRunStatus::Queued => "queued",
            SyncRunStatus::Running => "running",
            SyncRunStatus::Complete => "complete",
            SyncRunStatus::PartialSuccess => "partial_success",
            SyncRunStatus::Failed => "failed",
            SyncRunStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => SyncRunStatus::Pending,
            "started" => SyncRunStatus::Started,
            "querying" => SyncRunStatus::Querying,
            "queued" => SyncRunStatus::Queued,
            "running" => SyncRunStatus::Running,
            "complete" => SyncRunStatus::Complete,
            "partial_success" => SyncRunStatus::PartialSuccess,
            "failed" => SyncRunStatus::Failed,
            "canceled" => SyncRunStatus::Canceled,
            other => {
                return Err(Error::BackendMessage(format!("unknown sync run status: {other}")));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    #[default]
    General,
    /// Dry run triggered from the UI to validate a sync.
    Test,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::General => "general",
            RunType::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "general" => Ok(RunType::General),
            "test" => Ok(RunType::Test),
            other => Err(Error::BackendMessage(format!("unknown run type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub sync_id: SyncId,
    pub workspace_id: WorkspaceId,
    pub status: SyncRunStatus,
    pub run_type: RunType,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_rows: u64,
    pub successful_rows: u64,
    pub failed_rows: u64,
    pub workflow_run_id: Option<String>,
    pub error: Option<String>,
    /// Cursor value reached by this run's extraction. Committed to the sync
    /// only when the run completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRun {
    pub fn pending(
        sync: &SyncDefinition,
        run_type: RunType,
        workflow_run_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SyncRunId::new(),
            sync_id: sync.id,
            workspace_id: sync.workspace_id,
            status: SyncRunStatus::Pending,
            run_type,
            started_at: None,
            finished_at: None,
            total_rows: 0,
            successful_rows: 0,
            failed_rows: 0,
            workflow_run_id,
            error: None,
            cursor: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRecordAction {
    DestinationInsert,
    DestinationUpdate,
    DestinationDelete,
}

impl SyncRecordAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRecordAction::DestinationInsert => "destination_insert",
            SyncRecordAction::DestinationUpdate => "destination_update",
            SyncRecordAction::DestinationDelete => "destination_delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "destination_insert" => Ok(SyncRecordAction::DestinationInsert),
            "destination_update" => Ok(SyncRecordAction::DestinationUpdate),
            "destination_delete" => Ok(SyncRecordAction::DestinationDelete),
            other => Err(Error::BackendMessage(format!("unknown record action: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRecordStatus {
    Pending,
    Success,
    Failed,
}

impl SyncRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRecordStatus::Pending => "pending",
            SyncRecordStatus::Success => "success",
            SyncRecordStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncRecordStatus::Pending),
            "success" => Ok(SyncRecordStatus::Success),
            "failed" => Ok(SyncRecordStatus::Failed),
            other => Err(Error::BackendMessage(format!("unknown record status: {other}"))),
        }
    }
}

/// Change state of one source row within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: SyncRecordId,
    pub sync_id: SyncId,
    pub sync_run_id: SyncRunId,
    pub primary_key: String,
    pub fingerprint: String,
    pub record: Value,
    pub action: SyncRecordAction,
    pub status: SyncRecordStatus,
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRecord {
    pub fn pending(
        sync_id: SyncId,
        sync_run_id: SyncRunId,
        primary_key: String,
        fingerprint: String,
        record: Value,
        action: SyncRecordAction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SyncRecordId::new(),
            sync_id,
            sync_run_id,
            primary_key,
            fingerprint,
            record,
            action,
            status: SyncRecordStatus::Pending,
            error: None,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Delivery outcome the loader writes back onto a record.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecordUpdate {
    pub id: SyncRecordId,
    pub status: SyncRecordStatus,
    pub error: Option<String>,
    pub logs: Vec<LogMessage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub total: u64,
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
}
