use crate::models::Endpoint;
use crate::store::traits::{StoreTxn, TrackerStore, VersionedStore};
use crate::tracker::models::{SyncTracker, TrackerQuery};
use crate::versioned::models::VersionedRecord;
use crate::versioned::paging::ScanQuery;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type RecordKey = (String, String);
type Versions = BTreeMap<RecordKey, Vec<VersionedRecord>>;

/// In-memory tracker and record store for tests and local runs.
///
/// Transactions hold the record lock until they commit or drop, so writers are serialized the
/// same way a single-writer database would serialize them.
#[derive(Clone, Default)]
pub struct MemoryRefDb {
    trackers: Arc<Mutex<Vec<SyncTracker>>>,
    records: Arc<Mutex<Versions>>,
}

impl MemoryRefDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all trackers (primarily for tests).
    pub async fn all_trackers(&self) -> Vec<SyncTracker> {
        self.trackers.lock().await.clone()
    }

    /// Total number of stored versions across all keys.
    pub async fn version_count(&self) -> usize {
        self.records.lock().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl TrackerStore for MemoryRefDb {
    async fn get_unfinished(&self, endpoint: &Endpoint) -> Result<Option<SyncTracker>> {
        let trackers = self.trackers.lock().await;
        Ok(trackers
            .iter()
            .find(|t| t.endpoint == *endpoint && !t.is_finished())
            .cloned())
    }

    async fn get_or_create_unfinished(
        &self,
        endpoint: &Endpoint,
        scheduled_at: DateTime<Utc>,
        context: Option<String>,
    ) -> Result<SyncTracker> {
        let mut trackers = self.trackers.lock().await;
        if let Some(existing) = trackers
            .iter()
            .find(|t| t.endpoint == *endpoint && !t.is_finished())
        {
            return Ok(existing.clone());
        }
        let created = SyncTracker::new_unfinished(endpoint.clone(), scheduled_at, context)?;
        trackers.push(created.clone());
        Ok(created)
    }

    async fn claim(&self, tracker: &mut SyncTracker, at: DateTime<Utc>) -> Result<bool> {
        let mut trackers = self.trackers.lock().await;
        let stored = find_mut(&mut trackers, tracker)?;
        if stored.is_finished() || stored.is_claimed() {
            return Ok(false);
        }
        stored.claim(at)?;
        *tracker = stored.clone();
        Ok(true)
    }

    async fn update(&self, tracker: &SyncTracker) -> Result<()> {
        let mut trackers = self.trackers.lock().await;
        let stored = find_mut(&mut trackers, tracker)?;
        if stored.is_finished() {
            return Err(Error::Conflict(format!(
                "tracker {} is finished",
                tracker.tracker_id
            )));
        }
        if tracker.is_finished() {
            return Err(Error::InvalidInput(
                "use finish to end a tracker".to_string(),
            ));
        }
        *stored = tracker.clone();
        Ok(())
    }

    async fn finish(&self, tracker: &mut SyncTracker, at: DateTime<Utc>) -> Result<()> {
        let mut finished = tracker.clone();
        finished.mark_finished(at)?;

        let mut trackers = self.trackers.lock().await;
        let stored = find_mut(&mut trackers, tracker)?;
        if stored.is_finished() {
            return Err(Error::Conflict(format!(
                "tracker {} is already finished",
                tracker.tracker_id
            )));
        }
        *stored = finished.clone();
        *tracker = finished;
        Ok(())
    }

    async fn get_latest_finished(&self, endpoint: &Endpoint) -> Result<Option<SyncTracker>> {
        let trackers = self.trackers.lock().await;
        Ok(trackers
            .iter()
            .filter(|t| t.endpoint == *endpoint && t.is_finished())
            .max_by_key(|t| (t.sync_ended_at, t.scheduled_at))
            .cloned())
    }

    async fn list_trackers(&self, query: &TrackerQuery) -> Result<Vec<SyncTracker>> {
        let trackers = self.trackers.lock().await;
        let mut out: Vec<SyncTracker> = trackers
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(out
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}

#[async_trait]
impl VersionedStore for MemoryRefDb {
    async fn get(
        &self,
        kind: &str,
        key: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<VersionedRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .get(&(kind.to_string(), key.to_string()))
            .and_then(|vs| vs.iter().find(|r| r.is_live_at(as_of)))
            .cloned())
    }

    async fn history(&self, kind: &str, key: &str) -> Result<Vec<VersionedRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .get(&(kind.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn page(
        &self,
        query: &ScanQuery,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VersionedRecord>> {
        let records = self.records.lock().await;
        let lower = match after {
            Some(k) => Bound::Excluded((query.kind.clone(), k.to_string())),
            None => Bound::Included((query.kind.clone(), String::new())),
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take_while(|((kind, _), _)| *kind == query.kind)
            .filter_map(|(_, vs)| vs.iter().find(|r| query.matches(r)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>> {
        let guard = self.records.clone().lock_owned().await;
        Ok(Box::new(MemoryTxn {
            guard,
            staged: Vec::new(),
        }))
    }
}

struct MemoryTxn {
    guard: OwnedMutexGuard<Versions>,
    staged: Vec<VersionedRecord>,
}

impl MemoryTxn {
    /// Stored versions of one key with staged writes applied, ordered by `valid_from`.
    fn merged(&self, kind: &str, key: &str) -> Vec<VersionedRecord> {
        let mut out = self
            .guard
            .get(&(kind.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default();
        for s in self.staged.iter().filter(|s| s.kind == kind && s.key == key) {
            upsert_version(&mut out, s.clone());
        }
        out
    }
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn get_live(&mut self, kind: &str, key: &str) -> Result<Option<VersionedRecord>> {
        Ok(self.merged(kind, key).into_iter().find(|r| r.is_live()))
    }

    async fn put(&mut self, record: &VersionedRecord) -> Result<()> {
        let Some(from) = record.valid_from else {
            return Err(Error::InvalidInput(format!(
                "{}/{} has no valid_from",
                record.kind, record.key
            )));
        };
        if record.valid_to.is_none() {
            let clash = self
                .merged(&record.kind, &record.key)
                .into_iter()
                .any(|r| r.is_live() && r.valid_from != Some(from));
            if clash {
                return Err(Error::Conflict(format!(
                    "{}/{} already has a live version",
                    record.kind, record.key
                )));
            }
        }
        self.staged.retain(|s| {
            !(s.kind == record.kind && s.key == record.key && s.valid_from == record.valid_from)
        });
        self.staged.push(record.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        for record in staged {
            let versions = self
                .guard
                .entry((record.kind.clone(), record.key.clone()))
                .or_default();
            upsert_version(versions, record);
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn find_mut<'a>(
    trackers: &'a mut [SyncTracker],
    tracker: &SyncTracker,
) -> Result<&'a mut SyncTracker> {
    trackers
        .iter_mut()
        .find(|t| t.tracker_id == tracker.tracker_id)
        .ok_or_else(|| Error::NotFound(format!("tracker {}", tracker.tracker_id)))
}

fn upsert_version(versions: &mut Vec<VersionedRecord>, record: VersionedRecord) {
    match versions
        .iter_mut()
        .find(|v| v.valid_from == record.valid_from)
    {
        Some(existing) => *existing = record,
        None => {
            versions.push(record);
            versions.sort_by_key(|v| v.valid_from);
        }
    }
}
