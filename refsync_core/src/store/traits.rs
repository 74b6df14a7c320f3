use crate::Result;
use crate::models::Endpoint;
use crate::tracker::models::{SyncTracker, TrackerQuery};
use crate::versioned::models::VersionedRecord;
use crate::versioned::paging::ScanQuery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable storage for sync trackers.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// The endpoint's unfinished tracker; `None` when there is none.
    async fn get_unfinished(&self, endpoint: &Endpoint) -> Result<Option<SyncTracker>>;

    /// Returns the unfinished tracker, creating one when absent.
    async fn get_or_create_unfinished(
        &self,
        endpoint: &Endpoint,
        scheduled_at: DateTime<Utc>,
        context: Option<String>,
    ) -> Result<SyncTracker>;

    /// Atomically marks an unclaimed, unfinished tracker as started at `at`.
    ///
    /// Returns `false` when another run claimed it first; `tracker` is only modified on success.
    async fn claim(&self, tracker: &mut SyncTracker, at: DateTime<Utc>) -> Result<bool>;

    /// Persists changes to an unfinished tracker.
    async fn update(&self, tracker: &SyncTracker) -> Result<()>;

    /// Stamps `sync_ended_at = at` and persists. The caller sets the terminal status first.
    async fn finish(&self, tracker: &mut SyncTracker, at: DateTime<Utc>) -> Result<()>;

    async fn get_latest_finished(&self, endpoint: &Endpoint) -> Result<Option<SyncTracker>>;

    async fn list_trackers(&self, query: &TrackerQuery) -> Result<Vec<SyncTracker>>;
}

/// Point-in-time reads and transactional writes of versioned records.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// The version of (kind, key) whose interval contains `as_of`.
    async fn get(
        &self,
        kind: &str,
        key: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<VersionedRecord>>;

    /// Every stored version of (kind, key), oldest first.
    async fn history(&self, kind: &str, key: &str) -> Result<Vec<VersionedRecord>>;

    /// Up to `limit` records matching `query` with key strictly after `after`, ascending by key.
    async fn page(
        &self,
        query: &ScanQuery,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VersionedRecord>>;

    async fn begin(&self) -> Result<Box<dyn StoreTxn>>;
}

/// A write transaction. Dropping it without `commit` discards every write.
#[async_trait]
pub trait StoreTxn: Send {
    async fn get_live(&mut self, kind: &str, key: &str) -> Result<Option<VersionedRecord>>;

    /// Upserts the version identified by (kind, key, valid_from).
    async fn put(&mut self, record: &VersionedRecord) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
