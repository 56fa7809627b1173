//! Paging through unbounded source result sets.

pub mod batch_query;
pub mod cursor_query;
pub mod paginator;
pub mod random_query;

pub use batch_query::BatchQuery;
pub use cursor_query::CursorQueryBuilder;
pub use paginator::{PaginationVariables, Paginator};
pub use random_query::RandomQueryBuilder;

use crate::protocol::{ProtocolMessage, RecordMessage, SyncConfig};
use crate::{Error, Result};
use serde_json::Value;

/// One page of source records.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 1-based position of the batch within the run.
    pub index: u64,
    pub records: Vec<RecordMessage>,
    /// Offset the page was requested with.
    pub offset: usize,
    /// Cursor value after this page, in cursor mode.
    pub cursor: Option<String>,
}

/// Loop bookkeeping shared by [`BatchQuery`] and [`Paginator`].
///
/// Stops on an empty page, a failed read, or (in cursor mode) a page whose
/// last cursor value did not move.
#[derive(Debug)]
pub(crate) struct PageState {
    pub(crate) batch_size: usize,
    pub(crate) offset: usize,
    pub(crate) cursor_field: Option<String>,
    pub(crate) last_cursor: Option<String>,
    pub(crate) batches: u64,
    pub(crate) done: bool,
    pub(crate) error: Option<String>,
}

impl PageState {
    pub(crate) fn new(batch_size: usize, sync_config: &SyncConfig) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be > 0".to_string()));
        }
        Ok(Self {
            batch_size,
            offset: sync_config.offset.unwrap_or(0),
            cursor_field: sync_config.cursor_field.clone(),
            last_cursor: sync_config.current_cursor_field.clone(),
            batches: 0,
            done: false,
            error: None,
        })
    }

    pub(crate) fn fail(&mut self, message: String) {
        tracing::warn!(error = %message, batches = self.batches, "pagination stopped on read error");
        self.error = Some(message);
        self.done = true;
    }

    pub(crate) fn accept(&mut self, outcome: ReadOutcome) -> Option<Batch> {
        let records = match outcome {
            ReadOutcome::Failed(message) => {
                self.fail(message);
                return None;
            }
            ReadOutcome::Records(records) => records,
        };
        if records.is_empty() {
            self.done = true;
            return None;
        }

        let offset = self.offset;
        self.batches += 1;
        let cursor = match self.cursor_field.as_deref() {
            Some(field) => {
                let cursor = records.last().and_then(|r| cursor_value(r, field));
                if cursor.is_none() || cursor == self.last_cursor {
                    tracing::debug!(cursor = ?cursor, "cursor did not advance; last batch");
                    self.done = true;
                }
                if cursor.is_some() {
                    self.last_cursor = cursor;
                }
                self.last_cursor.clone()
            }
            None => {
                self.offset += self.batch_size;
                None
            }
        };
        Some(Batch {
            index: self.batches,
            records,
            offset,
            cursor,
        })
    }
}

/// Records of one read, or the error the source reported.
pub(crate) enum ReadOutcome {
    Records(Vec<RecordMessage>),
    Failed(String),
}

pub(crate) fn split_read(messages: Vec<ProtocolMessage>) -> ReadOutcome {
    let mut records = Vec::with_capacity(messages.len());
    for message in messages {
        match message {
            ProtocolMessage::Record(r) => records.push(r),
            ProtocolMessage::Log(log) if log.level.is_error() => {
                return ReadOutcome::Failed(log.message);
            }
            ProtocolMessage::Log(log) => {
                tracing::debug!(message = %log.message, "source log");
            }
            other => {
                tracing::warn!(message_type = other.message_type().as_str(), "unexpected message from read");
            }
        }
    }
    ReadOutcome::Records(records)
}

/// Cursor value of a record as a string, `None` when missing or null.
pub(crate) fn cursor_value(record: &RecordMessage, cursor_field: &str) -> Option<String> {
    match record.data.get(cursor_field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
