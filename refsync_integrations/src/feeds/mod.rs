//! Endpoint adapters for the ESI reference feeds.
//!
//! Each feed pulls one or more ESI endpoints, maps them onto typed `RefData` records and retires
//! whatever the service stopped reporting.

#[cfg(feature = "alliance")]
pub mod alliance;
#[cfg(feature = "faction_war")]
pub mod faction_war;
#[cfg(feature = "server_status")]
pub mod server_status;
#[cfg(feature = "sovereignty")]
pub mod sovereignty;

use chrono::{DateTime, Utc};
use refsync_core::client::{ApiRequest, ResponseMeta, SharedClient, call_json};
use refsync_core::config::{FetchConfig, SyncConfig};
use refsync_core::models::Endpoint;
use refsync_core::store::traits::VersionedStore;
use refsync_core::sync::models::ServerResult;
use refsync_core::sync::traits::SyncHandler;
use refsync_core::tracker::models::SyncTracker;
use refsync_core::versioned::{Candidate, RefData, retire_missing, scan_all_typed};
use refsync_core::{Error, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Every feed this crate knows how to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefEndpoint {
    ServerStatus,
    Alliance,
    SovMap,
    SovCampaign,
    SovStructure,
    FwStats,
    FwSystems,
    FwWars,
    FwFactionLeaderboard,
    FwCorporationLeaderboard,
    FwCharacterLeaderboard,
}

impl RefEndpoint {
    pub const ALL: [RefEndpoint; 11] = [
        RefEndpoint::ServerStatus,
        RefEndpoint::Alliance,
        RefEndpoint::SovMap,
        RefEndpoint::SovCampaign,
        RefEndpoint::SovStructure,
        RefEndpoint::FwStats,
        RefEndpoint::FwSystems,
        RefEndpoint::FwWars,
        RefEndpoint::FwFactionLeaderboard,
        RefEndpoint::FwCorporationLeaderboard,
        RefEndpoint::FwCharacterLeaderboard,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RefEndpoint::ServerStatus => "server_status",
            RefEndpoint::Alliance => "alliance",
            RefEndpoint::SovMap => "sov_map",
            RefEndpoint::SovCampaign => "sov_campaign",
            RefEndpoint::SovStructure => "sov_structure",
            RefEndpoint::FwStats => "fw_stats",
            RefEndpoint::FwSystems => "fw_systems",
            RefEndpoint::FwWars => "fw_wars",
            RefEndpoint::FwFactionLeaderboard => "fw_faction_leaderboard",
            RefEndpoint::FwCorporationLeaderboard => "fw_corporation_leaderboard",
            RefEndpoint::FwCharacterLeaderboard => "fw_character_leaderboard",
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.name())
    }
}

impl fmt::Display for RefEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RefEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RefEndpoint::ALL
            .into_iter()
            .find(|e| e.name() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown endpoint: {s}")))
    }
}

/// Shared knobs for every feed.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Expiry used when the service sends no usable `Expires` header.
    pub fallback_expiry: Duration,
    /// Page size for scans of stored records.
    pub page_size: usize,
    pub fetch: FetchConfig,
    pub cancel: CancellationToken,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            fallback_expiry: SyncConfig::default().max_delay,
            page_size: 1000,
            fetch: FetchConfig::default(),
            cancel: CancellationToken::new(),
        }
    }
}

impl FeedSettings {
    pub fn new(sync: &SyncConfig, fetch: FetchConfig, cancel: CancellationToken) -> Self {
        Self {
            fallback_expiry: sync.max_delay,
            fetch,
            cancel,
            ..Self::default()
        }
    }
}

/// Handlers for every feed compiled into this build, in `RefEndpoint::ALL` order.
pub fn registry(settings: &FeedSettings) -> Vec<Arc<dyn SyncHandler>> {
    let mut out: Vec<Arc<dyn SyncHandler>> = Vec::new();
    #[cfg(feature = "server_status")]
    out.push(Arc::new(server_status::ServerStatusFeed::new(settings)));
    #[cfg(feature = "alliance")]
    out.push(Arc::new(alliance::AllianceFeed::new(settings)));
    #[cfg(feature = "sovereignty")]
    {
        out.push(Arc::new(sovereignty::SovMapFeed::new(settings)));
        out.push(Arc::new(sovereignty::SovCampaignFeed::new(settings)));
        out.push(Arc::new(sovereignty::SovStructureFeed::new(settings)));
    }
    #[cfg(feature = "faction_war")]
    {
        out.push(Arc::new(faction_war::FwStatsFeed::new(settings)));
        out.push(Arc::new(faction_war::FwSystemsFeed::new(settings)));
        out.push(Arc::new(faction_war::FwWarsFeed::new(settings)));
        out.push(Arc::new(faction_war::FwFactionLeaderboardFeed::new(settings)));
        out.push(Arc::new(faction_war::FwCorporationLeaderboardFeed::new(settings)));
        out.push(Arc::new(faction_war::FwCharacterLeaderboardFeed::new(settings)));
    }
    out
}

// ── Helpers ──────────────────────────────────────────────────────

/// The instant a run treats as "now": its claim time.
pub(crate) fn sync_time(tracker: &SyncTracker) -> DateTime<Utc> {
    tracker.sync_started_at.unwrap_or(tracker.scheduled_at)
}

/// The response's `Expires`, or `fallback` after the run's sync time.
pub(crate) fn expiry_or_fallback(
    meta: &ResponseMeta,
    tracker: &SyncTracker,
    fallback: Duration,
) -> DateTime<Utc> {
    meta.expires.unwrap_or_else(|| {
        let fallback =
            chrono::Duration::from_std(fallback).unwrap_or(chrono::Duration::minutes(20));
        sync_time(tracker) + fallback
    })
}

/// Fetches one endpoint's JSON body and applies the usual expiry fallback.
pub(crate) async fn fetch_json<B: DeserializeOwned>(
    endpoint: RefEndpoint,
    path: &str,
    tracker: &SyncTracker,
    client: &SharedClient,
    fallback: Duration,
) -> Result<ServerResult<B>> {
    let (data, meta) =
        call_json::<B>(client.as_ref(), endpoint.name(), ApiRequest::get(path)).await?;
    let expiry = expiry_or_fallback(&meta, tracker, fallback);
    Ok(ServerResult::new(data, Some(expiry)))
}

pub(crate) fn upsert_all<T: RefData>(values: &[T]) -> Result<Vec<Candidate>> {
    values.iter().map(Candidate::upsert).collect()
}

/// Retirements for stored live `T` records (optionally under `key_prefix`) not in `reported`.
pub(crate) async fn retire_unreported<T: RefData>(
    store: &dyn VersionedStore,
    at: DateTime<Utc>,
    key_prefix: Option<&str>,
    reported: &[T],
    page_size: usize,
) -> Result<Vec<Candidate>> {
    let stored = scan_all_typed::<T>(store, at, key_prefix, page_size).await?;
    let keys: Vec<String> = reported.iter().map(T::natural_key).collect();
    retire_missing(
        stored.into_iter().map(|(r, _)| r),
        keys.iter().map(String::as_str),
        at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use refsync_core::models::from_millis;

    #[test]
    fn endpoint_names_round_trip() {
        for e in RefEndpoint::ALL {
            assert_eq!(e.name().parse::<RefEndpoint>().unwrap(), e);
        }
        assert!("sov".parse::<RefEndpoint>().is_err());
    }

    #[test]
    fn expiry_falls_back_to_sync_time_plus_delay() {
        let mut tracker =
            SyncTracker::new_unfinished(Endpoint::from("sov_map"), from_millis(1_000), None)
                .unwrap();
        tracker.claim(from_millis(2_000)).unwrap();

        let meta = ResponseMeta::default();
        assert_eq!(
            expiry_or_fallback(&meta, &tracker, Duration::from_secs(60)),
            from_millis(62_000)
        );

        let meta = ResponseMeta {
            expires: Some(from_millis(9_000)),
            ..ResponseMeta::default()
        };
        assert_eq!(
            expiry_or_fallback(&meta, &tracker, Duration::from_secs(60)),
            from_millis(9_000)
        );
    }

    #[test]
    fn registry_covers_every_feed() {
        let names: Vec<Endpoint> = registry(&FeedSettings::default())
            .iter()
            .map(|h| h.target())
            .collect();
        let expected: Vec<Endpoint> = RefEndpoint::ALL.iter().map(|e| e.endpoint()).collect();
        assert_eq!(names, expected);
    }
}
