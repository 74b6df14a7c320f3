use crate::Error;
use crate::tracker::models::SyncStatus;
use crate::versioned::ops::CommitAction;
use chrono::{DateTime, Utc};

pub const DETAIL_STALE: &str = "terminated due to excessive delay";
pub const DETAIL_SUCCESS: &str = "updated successfully";
pub const DETAIL_CLIENT_ERROR: &str =
    "external service error, contact the site admin if this problem persists";
pub const DETAIL_INTERNAL_ERROR: &str =
    "internal error, contact the site admin if this problem persists";

/// What an adapter's fetch produced.
#[derive(Debug, Clone)]
pub struct ServerResult<B> {
    pub data: B,
    /// When the service says this data goes stale.
    pub expiry: Option<DateTime<Utc>>,
    /// Context for the successor tracker; falls back to `EndpointAdapter::next_context`.
    pub next_context: Option<String>,
}

impl<B> ServerResult<B> {
    pub fn new(data: B, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            data,
            expiry,
            next_context: None,
        }
    }

    pub fn with_next_context(mut self, context: impl Into<String>) -> Self {
        self.next_context = Some(context.into());
        self
    }
}

/// Per-run commit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub batches: usize,
    pub inserted: usize,
    pub evolved: usize,
    pub unchanged: usize,
    pub retired: usize,
}

impl CommitStats {
    pub fn record(&mut self, action: CommitAction) {
        match action {
            CommitAction::Inserted => self.inserted += 1,
            CommitAction::Evolved => self.evolved += 1,
            CommitAction::Unchanged => self.unchanged += 1,
            CommitAction::Retired => self.retired += 1,
        }
    }

    pub fn written(&self) -> usize {
        self.inserted + self.evolved + self.retired
    }
}

/// Result of the fetch, map and commit phase of one run.
#[derive(Debug)]
pub enum FetchOutcome {
    Ok {
        expiry: Option<DateTime<Utc>>,
        next_context: Option<String>,
        stats: CommitStats,
    },
    /// The external service failed or returned something unusable. Nothing was committed.
    ClientError(Error),
    /// Local processing or storage failed. Batches committed before the failure are kept.
    StorageError(Error),
}

impl FetchOutcome {
    pub fn from_error(e: Error) -> Self {
        if e.is_client() {
            Self::ClientError(e)
        } else {
            Self::StorageError(e)
        }
    }
}

/// How one orchestrator invocation ended. Informational only.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncDisposition {
    NoTracker,
    AlreadyFinished,
    /// A claimed run exceeded the maximum delay and was closed with a warning.
    TerminatedStale,
    /// Prerequisites were not met; the tracker is untouched.
    Deferred,
    /// Another invocation holds the claim.
    InProgress,
    /// Reading or writing the tracker itself failed.
    TrackerError,
    Completed {
        status: SyncStatus,
        next_scheduled: DateTime<Utc>,
    },
}
