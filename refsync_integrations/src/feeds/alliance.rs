//! Alliances, their icons and member corporations.
//!
//! The alliance list is large, so each run handles one shard (`alliance_id % 10`). The shard is
//! carried to the successor tracker in its context, cycling through all ten. Per-alliance detail,
//! icon and corporation calls go through the fan-out fetcher.

use crate::feeds::{FeedSettings, RefEndpoint, retire_unreported, sync_time, upsert_all};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refsync_core::client::{ApiRequest, SharedClient, call_json, decode_call};
use refsync_core::fetch::ConcurrentFetcher;
use refsync_core::models::Endpoint;
use refsync_core::store::traits::VersionedStore;
use refsync_core::sync::models::ServerResult;
use refsync_core::sync::traits::EndpointAdapter;
use refsync_core::tracker::models::SyncTracker;
use refsync_core::versioned::{Candidate, RefData, composite_key, scan_all_typed};
use refsync_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const SHARDS: i64 = 10;

/// Fixed so the shards cycle quickly regardless of what the service says.
const SHARD_EXPIRY_MINUTES: i64 = 6;

pub fn shard_of(alliance_id: i64) -> i64 {
    alliance_id.rem_euclid(SHARDS)
}

/// Shard from the tracker context, or one derived from the sync time when there is none.
pub fn current_shard(tracker: &SyncTracker) -> i64 {
    tracker
        .context
        .as_deref()
        .and_then(|c| c.trim().parse::<i64>().ok())
        .map(|s| s.max(0) % SHARDS)
        .unwrap_or_else(|| sync_time(tracker).timestamp().rem_euclid(SHARDS))
}

fn member_prefix(alliance_id: i64) -> String {
    format!("{alliance_id}/")
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EsiAlliance {
    pub name: String,
    pub ticker: String,
    #[serde(default)]
    pub creator_id: Option<i64>,
    #[serde(default)]
    pub creator_corporation_id: Option<i64>,
    #[serde(default)]
    pub executor_corporation_id: Option<i64>,
    #[serde(default)]
    pub date_founded: Option<DateTime<Utc>>,
    #[serde(default)]
    pub faction_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsiAllianceIcons {
    #[serde(default)]
    pub px64x64: Option<String>,
    #[serde(default)]
    pub px128x128: Option<String>,
}

/// One fan-out call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlliancePart {
    Info(i64),
    Icons(i64),
    Corporations(i64),
}

/// The matching fan-out result.
#[derive(Debug, Clone)]
pub enum AllianceReply {
    Info(i64, EsiAlliance),
    Icons(i64, EsiAllianceIcons),
    Corporations(i64, Vec<i64>),
}

#[derive(Debug, Clone, Default)]
pub struct AllianceBundle {
    pub shard: i64,
    pub alliance_ids: Vec<i64>,
    pub info: HashMap<i64, EsiAlliance>,
    pub icons: HashMap<i64, EsiAllianceIcons>,
    pub corporations: HashMap<i64, Vec<i64>>,
}

impl AllianceBundle {
    pub fn collect(shard: i64, alliance_ids: Vec<i64>, replies: Vec<AllianceReply>) -> Self {
        let mut bundle = Self {
            shard,
            alliance_ids,
            ..Self::default()
        };
        for reply in replies {
            match reply {
                AllianceReply::Info(id, v) => {
                    bundle.info.insert(id, v);
                }
                AllianceReply::Icons(id, v) => {
                    bundle.icons.insert(id, v);
                }
                AllianceReply::Corporations(id, v) => {
                    bundle.corporations.insert(id, v);
                }
            }
        }
        bundle
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alliance {
    pub alliance_id: i64,
    pub executor_corporation_id: i64,
    pub member_count: i64,
    pub name: String,
    pub ticker: String,
    pub date_founded: DateTime<Utc>,
    pub creator_id: i64,
    pub creator_corporation_id: i64,
    pub faction_id: i64,
}

impl RefData for Alliance {
    const KIND: &'static str = "alliance";

    fn natural_key(&self) -> String {
        self.alliance_id.to_string()
    }
}

impl Alliance {
    pub fn from_esi(alliance_id: i64, info: &EsiAlliance, member_count: usize) -> Self {
        Self {
            alliance_id,
            executor_corporation_id: info.executor_corporation_id.unwrap_or(-1),
            member_count: i64::try_from(member_count).unwrap_or(i64::MAX),
            name: info.name.clone(),
            ticker: info.ticker.clone(),
            date_founded: info.date_founded.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            creator_id: info.creator_id.unwrap_or(-1),
            creator_corporation_id: info.creator_corporation_id.unwrap_or(-1),
            faction_id: info.faction_id.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllianceIcon {
    pub alliance_id: i64,
    pub px64x64: Option<String>,
    pub px128x128: Option<String>,
}

impl RefData for AllianceIcon {
    const KIND: &'static str = "alliance_icon";

    fn natural_key(&self) -> String {
        self.alliance_id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllianceMemberCorporation {
    pub alliance_id: i64,
    pub corporation_id: i64,
}

impl RefData for AllianceMemberCorporation {
    const KIND: &'static str = "alliance_member_corporation";

    fn natural_key(&self) -> String {
        composite_key(&[&self.alliance_id, &self.corporation_id])
    }
}

// ── Adapter ──────────────────────────────────────────────────────

pub struct AllianceFeed {
    fetcher: ConcurrentFetcher,
    page_size: usize,
}

impl AllianceFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fetcher: ConcurrentFetcher::new(settings.fetch.clone())
                .with_cancellation(settings.cancel.clone()),
            page_size: settings.page_size,
        }
    }
}

async fn fetch_part(client: SharedClient, part: AlliancePart) -> Result<AllianceReply> {
    let class = RefEndpoint::Alliance.name();
    match part {
        AlliancePart::Info(id) => {
            let req = ApiRequest::get(format!("/alliances/{id}/"));
            let (v, _) = decode_call::<EsiAlliance>(client.as_ref(), class, req).await?;
            Ok(AllianceReply::Info(id, v))
        }
        AlliancePart::Icons(id) => {
            let req = ApiRequest::get(format!("/alliances/{id}/icons/"));
            let (v, _) = decode_call::<EsiAllianceIcons>(client.as_ref(), class, req).await?;
            Ok(AllianceReply::Icons(id, v))
        }
        AlliancePart::Corporations(id) => {
            let req = ApiRequest::get(format!("/alliances/{id}/corporations/"));
            let (v, _) = decode_call::<Vec<i64>>(client.as_ref(), class, req).await?;
            Ok(AllianceReply::Corporations(id, v))
        }
    }
}

#[async_trait]
impl EndpointAdapter for AllianceFeed {
    type Bundle = AllianceBundle;

    fn endpoint(&self) -> Endpoint {
        RefEndpoint::Alliance.endpoint()
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<AllianceBundle>> {
        let class = RefEndpoint::Alliance.name();
        let (all_ids, _meta) =
            call_json::<Vec<i64>>(client.as_ref(), class, ApiRequest::get("/alliances/")).await?;

        let shard = current_shard(tracker);
        let ids: Vec<i64> = all_ids
            .into_iter()
            .filter(|id| shard_of(*id) == shard)
            .collect();
        tracing::debug!(shard, alliances = ids.len(), "processing alliance shard");

        let parts: Vec<AlliancePart> = ids
            .iter()
            .flat_map(|&id| {
                [
                    AlliancePart::Info(id),
                    AlliancePart::Icons(id),
                    AlliancePart::Corporations(id),
                ]
            })
            .collect();
        let replies = self.fetcher.fetch_all(client, class, parts, fetch_part).await?;

        let expiry = sync_time(tracker) + chrono::Duration::minutes(SHARD_EXPIRY_MINUTES);
        Ok(
            ServerResult::new(AllianceBundle::collect(shard, ids, replies), Some(expiry))
                .with_next_context(((shard + 1) % SHARDS).to_string()),
        )
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: AllianceBundle,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        let mut out = Vec::new();
        let reported: HashSet<i64> = bundle.alliance_ids.iter().copied().collect();

        // Alliances of this shard that disappeared take their icon and members with them.
        let stored = scan_all_typed::<Alliance>(store, at, None, self.page_size).await?;
        for (record, alliance) in stored {
            let id = alliance.alliance_id;
            if shard_of(id) != bundle.shard || reported.contains(&id) {
                continue;
            }
            out.push(Candidate::retire(record, at)?);
            if let Some(icon) = store.get(AllianceIcon::KIND, &id.to_string(), at).await? {
                out.push(Candidate::retire(icon, at)?);
            }
            let members = scan_all_typed::<AllianceMemberCorporation>(
                store,
                at,
                Some(&member_prefix(id)),
                self.page_size,
            )
            .await?;
            for (member, _) in members {
                out.push(Candidate::retire(member, at)?);
            }
        }

        for &id in &bundle.alliance_ids {
            let missing = |what: &str| Error::BackendMessage(format!("no {what} for alliance {id}"));
            let info = bundle.info.get(&id).ok_or_else(|| missing("detail"))?;
            let icons = bundle.icons.get(&id).ok_or_else(|| missing("icons"))?;
            let corps = bundle
                .corporations
                .get(&id)
                .ok_or_else(|| missing("corporations"))?;

            out.push(Candidate::upsert(&Alliance::from_esi(id, info, corps.len()))?);
            out.push(Candidate::upsert(&AllianceIcon {
                alliance_id: id,
                px64x64: icons.px64x64.clone(),
                px128x128: icons.px128x128.clone(),
            })?);

            let members: Vec<AllianceMemberCorporation> = corps
                .iter()
                .map(|&corporation_id| AllianceMemberCorporation {
                    alliance_id: id,
                    corporation_id,
                })
                .collect();
            out.extend(upsert_all(&members)?);
            out.extend(
                retire_unreported(store, at, Some(&member_prefix(id)), &members, self.page_size)
                    .await?,
            );
        }
        Ok(out)
    }

    /// A failed run retries the same shard.
    fn next_context(&self, tracker: &SyncTracker) -> Option<String> {
        Some(current_shard(tracker).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refsync_core::models::from_millis;

    fn tracker(context: Option<&str>, started_ms: i64) -> SyncTracker {
        let mut t = SyncTracker::new_unfinished(
            RefEndpoint::Alliance.endpoint(),
            from_millis(0),
            context.map(str::to_string),
        )
        .unwrap();
        t.claim(from_millis(started_ms)).unwrap();
        t
    }

    #[test]
    fn shard_comes_from_context_when_present() {
        assert_eq!(current_shard(&tracker(Some("7"), 0)), 7);
        assert_eq!(current_shard(&tracker(Some("-3"), 0)), 0);
        assert_eq!(current_shard(&tracker(Some("13"), 0)), 3);
    }

    #[test]
    fn shard_falls_back_to_sync_time_seconds() {
        assert_eq!(current_shard(&tracker(None, 1_234_000)), 4);
        assert_eq!(current_shard(&tracker(Some("junk"), 9_000)), 9);
    }

    #[test]
    fn member_keys_share_the_alliance_prefix() {
        let m = AllianceMemberCorporation {
            alliance_id: 99,
            corporation_id: 1001,
        };
        assert!(m.natural_key().starts_with(&member_prefix(99)));
        assert!(!"991/1".starts_with(&member_prefix(99)));
    }

    #[test]
    fn bundle_demultiplexes_replies_by_variant() {
        let replies = vec![
            AllianceReply::Corporations(11, vec![1, 2]),
            AllianceReply::Icons(11, EsiAllianceIcons::default()),
        ];
        let bundle = AllianceBundle::collect(1, vec![11], replies);
        assert_eq!(bundle.corporations[&11], vec![1, 2]);
        assert!(bundle.icons.contains_key(&11));
        assert!(bundle.info.is_empty());
    }
}
