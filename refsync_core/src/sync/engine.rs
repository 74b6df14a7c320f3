use crate::Result;
use crate::client::SharedClient;
use crate::config::SyncConfig;
use crate::models::{Clock, Endpoint, SystemClock};
use crate::store::traits::{TrackerStore, VersionedStore};
use crate::sync::models::{
    CommitStats, DETAIL_CLIENT_ERROR, DETAIL_INTERNAL_ERROR, DETAIL_STALE, DETAIL_SUCCESS,
    FetchOutcome, ServerResult, SyncDisposition,
};
use crate::sync::traits::EndpointAdapter;
use crate::tracker::models::{SyncStatus, SyncTracker};
use crate::versioned::models::Candidate;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Drives one endpoint's tracker through a single sync attempt.
///
/// `run` never returns an error. Every failure ends up either on the tracker (status and detail)
/// or in the log when the tracker itself cannot be read or written.
pub struct SyncOrchestrator {
    trackers: Arc<dyn TrackerStore>,
    records: Arc<dyn VersionedStore>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
}

impl SyncOrchestrator {
    #[tracing::instrument(level = "debug", skip(trackers, records))]
    pub fn new(
        trackers: Arc<dyn TrackerStore>,
        records: Arc<dyn VersionedStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            trackers,
            records,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn trackers(&self) -> &Arc<dyn TrackerStore> {
        &self.trackers
    }

    pub fn records(&self) -> &Arc<dyn VersionedStore> {
        &self.records
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[tracing::instrument(level = "info", skip_all, fields(endpoint = %adapter.endpoint()))]
    pub async fn run<A>(&self, adapter: &A, client: &SharedClient) -> SyncDisposition
    where
        A: EndpointAdapter + ?Sized,
    {
        let endpoint = adapter.endpoint();

        let mut tracker = match self.trackers.get_unfinished(&endpoint).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                tracing::debug!("no unfinished tracker");
                return SyncDisposition::NoTracker;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read tracker");
                return SyncDisposition::TrackerError;
            }
        };
        if tracker.is_finished() {
            tracing::debug!(tracker_id = %tracker.tracker_id, "tracker already finished");
            return SyncDisposition::AlreadyFinished;
        }

        let now = self.clock.now();
        if tracker.is_stale(now, self.config.max_delay) {
            tracing::warn!(
                tracker_id = %tracker.tracker_id,
                started_at = ?tracker.sync_started_at,
                "terminating tracker that exceeded max delay"
            );
            tracker.set_outcome(SyncStatus::Warning, DETAIL_STALE);
            return match self.trackers.finish(&mut tracker, now).await {
                Ok(()) => SyncDisposition::TerminatedStale,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to finish stale tracker");
                    SyncDisposition::TrackerError
                }
            };
        }

        if !adapter.prerequisites_satisfied() {
            tracing::debug!("prerequisites not satisfied, deferring");
            return SyncDisposition::Deferred;
        }

        if tracker.is_claimed() {
            tracing::debug!(tracker_id = %tracker.tracker_id, "tracker claimed by another run");
            return SyncDisposition::InProgress;
        }
        match self.trackers.claim(&mut tracker, now).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(tracker_id = %tracker.tracker_id, "claim lost to a concurrent run");
                return SyncDisposition::InProgress;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to claim tracker");
                return SyncDisposition::TrackerError;
            }
        }

        let sync_time = tracker.sync_started_at.unwrap_or(now);
        let outcome = self.fetch_phase(adapter, &tracker, client, sync_time).await;

        let (expiry, next_context) = match outcome {
            FetchOutcome::Ok {
                expiry,
                next_context,
                stats,
            } => {
                tracing::info!(
                    batches = stats.batches,
                    inserted = stats.inserted,
                    evolved = stats.evolved,
                    unchanged = stats.unchanged,
                    retired = stats.retired,
                    "sync succeeded"
                );
                tracker.set_outcome(SyncStatus::Finished, DETAIL_SUCCESS);
                (expiry, next_context.or_else(|| adapter.next_context(&tracker)))
            }
            FetchOutcome::ClientError(e) => {
                tracing::warn!(error = %e, "external service error during sync");
                tracker.set_outcome(SyncStatus::Error, DETAIL_CLIENT_ERROR);
                (None, adapter.next_context(&tracker))
            }
            FetchOutcome::StorageError(e) => {
                tracing::warn!(error = %e, "internal error during sync");
                tracker.set_outcome(SyncStatus::Error, DETAIL_INTERNAL_ERROR);
                (None, adapter.next_context(&tracker))
            }
        };

        let ended = self.clock.now();
        if let Err(e) = self.trackers.finish(&mut tracker, ended).await {
            tracing::warn!(error = %e, "failed to finish tracker");
            return SyncDisposition::TrackerError;
        }

        let next_scheduled = self.next_scheduled(expiry, ended);
        match self
            .schedule_successor(&endpoint, next_scheduled, next_context)
            .await
        {
            Ok(_) => SyncDisposition::Completed {
                status: tracker.status,
                next_scheduled,
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to schedule next tracker");
                SyncDisposition::TrackerError
            }
        }
    }

    /// Adapter expiry when usable, otherwise the default delay from `ended`.
    fn next_scheduled(&self, expiry: Option<DateTime<Utc>>, ended: DateTime<Utc>) -> DateTime<Utc> {
        match expiry {
            Some(at) if at.timestamp_millis() >= 0 => at,
            _ => {
                let delay = chrono::Duration::from_std(self.config.default_sync_delay)
                    .unwrap_or(chrono::Duration::minutes(5));
                ended + delay
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn schedule_successor(
        &self,
        endpoint: &Endpoint,
        scheduled_at: DateTime<Utc>,
        context: Option<String>,
    ) -> Result<SyncTracker> {
        self.trackers
            .get_or_create_unfinished(endpoint, scheduled_at, context)
            .await
    }

    async fn fetch_phase<A>(
        &self,
        adapter: &A,
        tracker: &SyncTracker,
        client: &SharedClient,
        at: DateTime<Utc>,
    ) -> FetchOutcome
    where
        A: EndpointAdapter + ?Sized,
    {
        let ServerResult {
            data,
            expiry,
            next_context,
        } = match adapter.fetch(tracker, client).await {
            Ok(result) => result,
            Err(e) => return FetchOutcome::from_error(e),
        };

        let candidates = match adapter
            .map_to_records(at, data, self.records.as_ref())
            .await
        {
            Ok(c) => c,
            Err(e) => return FetchOutcome::from_error(e),
        };

        match self.commit_batches(adapter, at, candidates).await {
            Ok(stats) => FetchOutcome::Ok {
                expiry,
                next_context,
                stats,
            },
            Err(e) => FetchOutcome::from_error(e),
        }
    }

    /// Commits candidates in order, one transaction per batch. A failed batch rolls back alone.
    async fn commit_batches<A>(
        &self,
        adapter: &A,
        at: DateTime<Utc>,
        candidates: Vec<Candidate>,
    ) -> Result<CommitStats>
    where
        A: EndpointAdapter + ?Sized,
    {
        let total = candidates.len();
        let mut stats = CommitStats::default();
        let mut pending = candidates.into_iter();

        loop {
            let batch: Vec<Candidate> = pending
                .by_ref()
                .take(self.config.commit_batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            let mut txn = self.records.begin().await?;
            for candidate in batch {
                let action = adapter.commit(txn.as_mut(), at, candidate).await?;
                stats.record(action);
            }
            txn.commit().await?;
            stats.batches += 1;
            tracing::debug!(batch = stats.batches, total, "committed batch");
        }
        Ok(stats)
    }
}
