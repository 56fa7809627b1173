//! Sync definitions, runs and per-record change state, plus the run lifecycle.

pub mod models;
pub mod state_machine;

pub use models::{
    IntervalUnit, RecordCounts, RunType, SyncDefinition, SyncRecord, SyncRecordAction,
    SyncRecordStatus, SyncRecordUpdate, SyncRun, SyncRunStatus, SyncSchedule,
};
pub use state_machine::{SyncRunEvent, Transition, transition};
