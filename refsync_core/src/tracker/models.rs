use crate::models::{Endpoint, truncate_millis};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NotProcessed,
    Finished,
    Warning,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotProcessed => "not_processed",
            Self::Finished => "finished",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotProcessed)
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_processed" => Ok(Self::NotProcessed),
            "finished" => Ok(Self::Finished),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!("unknown sync status: {other}"))),
        }
    }
}

/// One scheduled synchronization attempt for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTracker {
    pub tracker_id: Uuid,
    pub endpoint: Endpoint,
    pub scheduled_at: DateTime<Utc>,
    /// Set when a run claims the tracker.
    pub sync_started_at: Option<DateTime<Utc>>,
    /// Set when the tracker is finished; a finished tracker is never modified again.
    pub sync_ended_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub detail: Option<String>,
    /// Opaque adapter state handed to the successor tracker.
    pub context: Option<String>,
}

impl SyncTracker {
    #[tracing::instrument(level = "debug")]
    pub fn new_unfinished(
        endpoint: Endpoint,
        scheduled_at: DateTime<Utc>,
        context: Option<String>,
    ) -> Result<Self> {
        if endpoint.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("endpoint is empty".to_string()));
        }
        Ok(Self {
            tracker_id: Uuid::new_v4(),
            endpoint,
            scheduled_at: truncate_millis(scheduled_at),
            sync_started_at: None,
            sync_ended_at: None,
            status: SyncStatus::NotProcessed,
            detail: None,
            context,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.sync_ended_at.is_some()
    }

    pub fn is_claimed(&self) -> bool {
        self.sync_started_at.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// True when the tracker was claimed more than `max_delay` before `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_delay: Duration) -> bool {
        let Some(started) = self.sync_started_at else {
            return false;
        };
        let elapsed_ms = (now - started).num_milliseconds();
        elapsed_ms > 0 && elapsed_ms as u128 > max_delay.as_millis()
    }

    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.is_finished() {
            return Err(Error::Conflict(format!(
                "tracker {} is already finished",
                self.tracker_id
            )));
        }
        if self.is_claimed() {
            return Err(Error::Conflict(format!(
                "tracker {} is already claimed",
                self.tracker_id
            )));
        }
        self.sync_started_at = Some(truncate_millis(now));
        Ok(())
    }

    pub fn set_outcome(&mut self, status: SyncStatus, detail: impl Into<String>) {
        self.status = status;
        self.detail = Some(detail.into());
    }

    /// Checks the tracker may be finished and stamps `sync_ended_at`.
    pub fn mark_finished(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.is_finished() {
            return Err(Error::Conflict(format!(
                "tracker {} is already finished",
                self.tracker_id
            )));
        }
        if !self.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "tracker {} has no terminal status",
                self.tracker_id
            )));
        }
        self.sync_ended_at = Some(truncate_millis(at));
        Ok(())
    }
}

/// Audit listing filter, newest `scheduled_at` first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerQuery {
    pub endpoint: Option<Endpoint>,
    pub status: Option<SyncStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TrackerQuery {
    fn default() -> Self {
        Self {
            endpoint: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl TrackerQuery {
    pub fn matches(&self, t: &SyncTracker) -> bool {
        self.endpoint.as_ref().is_none_or(|e| *e == t.endpoint)
            && self.status.is_none_or(|s| s == t.status)
    }
}
