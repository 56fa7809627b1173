//! SyncRun lifecycle.
//!
//! ```text
//! pending -> started -> querying -> queued -> running -> complete
//!                                               \-> partial_success
//! (any non-terminal) -> failed | canceled
//! ```
//!
//! Every transition is persisted with a compare-and-set on the status the
//! caller observed, so two activities racing on one run cannot both win.

use crate::store::SyncStore;
use crate::sync_run::models::{SyncRun, SyncRunStatus};
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunEvent {
    Start,
    Query,
    Queue,
    Progress,
    Complete,
    PartialComplete,
    Fail,
    Cancel,
}

impl SyncRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncRunStatus::Complete
                | SyncRunStatus::PartialSuccess
                | SyncRunStatus::Failed
                | SyncRunStatus::Canceled
        )
    }

    /// Target status for `event`, or `None` when the event is not allowed here.
    pub fn next(self, event: SyncRunEvent) -> Option<SyncRunStatus> {
        use SyncRunStatus as S;
        match (event, self) {
            (SyncRunEvent::Start, S::Pending | S::Started | S::Querying) => Some(S::Started),
            (SyncRunEvent::Query, S::Started | S::Querying) => Some(S::Querying),
            (SyncRunEvent::Queue, S::Started | S::Querying) => Some(S::Queued),
            (SyncRunEvent::Progress, S::Queued | S::Running) => Some(S::Running),
            (SyncRunEvent::Complete, S::Queued | S::Running) => Some(S::Complete),
            (SyncRunEvent::PartialComplete, S::Running) => Some(S::PartialSuccess),
            (SyncRunEvent::Fail, s) if !s.is_terminal() => Some(S::Failed),
            (SyncRunEvent::Cancel, s) if !s.is_terminal() => Some(S::Canceled),
            _ => None,
        }
    }

    pub fn may(self, event: SyncRunEvent) -> bool {
        self.next(event).is_some()
    }

    pub fn may_start(self) -> bool {
        self.may(SyncRunEvent::Start)
    }

    pub fn may_query(self) -> bool {
        self.may(SyncRunEvent::Query)
    }

    pub fn may_queue(self) -> bool {
        self.may(SyncRunEvent::Queue)
    }

    pub fn may_progress(self) -> bool {
        self.may(SyncRunEvent::Progress)
    }

    pub fn may_complete(self) -> bool {
        self.may(SyncRunEvent::Complete)
    }

    pub fn may_fail(self) -> bool {
        self.may(SyncRunEvent::Fail)
    }
}

/// Outcome of [`transition`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The new state was persisted; carries the updated run.
    Applied(SyncRun),
    /// The event is not allowed from the run's current status, or another
    /// writer moved the run first. Nothing was written.
    Skipped { status: SyncRunStatus },
}

impl Transition {
    pub fn applied(&self) -> Option<&SyncRun> {
        match self {
            Transition::Applied(run) => Some(run),
            Transition::Skipped { .. } => None,
        }
    }
}

/// Apply `event` to `run`, letting `mutate` adjust other fields on the way,
/// and persist it with a compare-and-set on the current status.
#[tracing::instrument(level = "debug", skip(store, run, mutate), fields(sync_run_id = %run.id, from = run.status.as_str()))]
pub async fn transition<F>(
    store: &dyn SyncStore,
    run: &SyncRun,
    event: SyncRunEvent,
    mutate: F,
) -> Result<Transition>
where
    F: FnOnce(&mut SyncRun) + Send,
{
    let Some(to) = run.status.next(event) else {
        tracing::warn!(
            sync_run_id = %run.id,
            status = run.status.as_str(),
            ?event,
            "sync run transition not allowed"
        );
        return Ok(Transition::Skipped { status: run.status });
    };

    let now = Utc::now();
    let mut next = run.clone();
    next.status = to;
    if to == SyncRunStatus::Started && next.started_at.is_none() {
        next.started_at = Some(now);
    }
    if to.is_terminal() {
        next.finished_at = Some(now);
    }
    next.updated_at = now;
    mutate(&mut next);

    if store.compare_and_set_sync_run(&next, run.status).await? {
        tracing::debug!(to = to.as_str(), "sync run transitioned");
        return Ok(Transition::Applied(next));
    }

    let current = store
        .get_sync_run(run.id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("sync run {}", run.id)))?;
    tracing::warn!(
        sync_run_id = %run.id,
        expected = run.status.as_str(),
        actual = current.status.as_str(),
        ?event,
        "sync run changed concurrently; transition skipped"
    );
    Ok(Transition::Skipped {
        status: current.status,
    })
}
