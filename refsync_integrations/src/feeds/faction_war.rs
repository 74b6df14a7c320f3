//! Faction warfare: per-faction statistics, contested systems, wars and leaderboards.

use crate::feeds::{FeedSettings, RefEndpoint, fetch_json, retire_unreported, upsert_all};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refsync_core::client::SharedClient;
use refsync_core::models::Endpoint;
use refsync_core::store::traits::VersionedStore;
use refsync_core::sync::models::ServerResult;
use refsync_core::sync::traits::EndpointAdapter;
use refsync_core::tracker::models::SyncTracker;
use refsync_core::versioned::{Candidate, RefData, composite_key};
use refsync_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EsiWindowedTotals {
    pub last_week: i64,
    pub total: i64,
    pub yesterday: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiFactionStats {
    pub faction_id: i64,
    pub kills: EsiWindowedTotals,
    pub pilots: i64,
    pub systems_controlled: i64,
    pub victory_points: EsiWindowedTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionStats {
    pub faction_id: i64,
    pub kills_last_week: i64,
    pub kills_total: i64,
    pub kills_yesterday: i64,
    pub pilots: i64,
    pub systems_controlled: i64,
    pub victory_points_last_week: i64,
    pub victory_points_total: i64,
    pub victory_points_yesterday: i64,
}

impl RefData for FactionStats {
    const KIND: &'static str = "fw_faction_stats";

    fn natural_key(&self) -> String {
        self.faction_id.to_string()
    }
}

impl From<&EsiFactionStats> for FactionStats {
    fn from(s: &EsiFactionStats) -> Self {
        Self {
            faction_id: s.faction_id,
            kills_last_week: s.kills.last_week,
            kills_total: s.kills.total,
            kills_yesterday: s.kills.yesterday,
            pilots: s.pilots,
            systems_controlled: s.systems_controlled,
            victory_points_last_week: s.victory_points.last_week,
            victory_points_total: s.victory_points.total,
            victory_points_yesterday: s.victory_points.yesterday,
        }
    }
}

pub struct FwStatsFeed {
    fallback_expiry: Duration,
    page_size: usize,
}

impl FwStatsFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fallback_expiry: settings.fallback_expiry,
            page_size: settings.page_size,
        }
    }
}

#[async_trait]
impl EndpointAdapter for FwStatsFeed {
    type Bundle = Vec<EsiFactionStats>;

    fn endpoint(&self) -> Endpoint {
        RefEndpoint::FwStats.endpoint()
    }

    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<Vec<EsiFactionStats>>> {
        fetch_json(
            RefEndpoint::FwStats,
            "/fw/stats/",
            tracker,
            client,
            self.fallback_expiry,
        )
        .await
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: Vec<EsiFactionStats>,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        let stats: Vec<FactionStats> = bundle.iter().map(FactionStats::from).collect();
        let mut out = upsert_all(&stats)?;
        out.extend(retire_unreported(store, at, None, &stats, self.page_size).await?);
        Ok(out)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiFwSystem {
    pub occupier_faction_id: i64,
    pub owner_faction_id: i64,
    pub solar_system_id: i64,
    pub victory_points: i64,
    pub victory_points_threshold: i64,
    /// One of `captured`, `contested`, `uncontested`, `vulnerable`.
    pub contested: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionWarSystem {
    pub solar_system_id: i64,
    pub occupier_faction_id: i64,
    pub owner_faction_id: i64,
    pub victory_points: i64,
    pub victory_points_threshold: i64,
    pub contested: String,
}

impl RefData for FactionWarSystem {
    const KIND: &'static str = "fw_system";

    fn natural_key(&self) -> String {
        self.solar_system_id.to_string()
    }
}

impl From<&EsiFwSystem> for FactionWarSystem {
    fn from(s: &EsiFwSystem) -> Self {
        Self {
            solar_system_id: s.solar_system_id,
            occupier_faction_id: s.occupier_faction_id,
            owner_faction_id: s.owner_faction_id,
            victory_points: s.victory_points,
            victory_points_threshold: s.victory_points_threshold,
            contested: s.contested.clone(),
        }
    }
}

pub struct FwSystemsFeed {
    fallback_expiry: Duration,
    page_size: usize,
}

impl FwSystemsFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fallback_expiry: settings.fallback_expiry,
            page_size: settings.page_size,
        }
    }
}

#[async_trait]
impl EndpointAdapter for FwSystemsFeed {
    type Bundle = Vec<EsiFwSystem>;

    fn endpoint(&self) -> Endpoint {
        RefEndpoint::FwSystems.endpoint()
    }

    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<Vec<EsiFwSystem>>> {
        fetch_json(
            RefEndpoint::FwSystems,
            "/fw/systems/",
            tracker,
            client,
            self.fallback_expiry,
        )
        .await
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: Vec<EsiFwSystem>,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        let systems: Vec<FactionWarSystem> = bundle.iter().map(FactionWarSystem::from).collect();
        let mut out = upsert_all(&systems)?;
        out.extend(retire_unreported(store, at, None, &systems, self.page_size).await?);
        Ok(out)
    }
}

// ── Wars ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EsiFwWar {
    pub against_id: i64,
    pub faction_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionWar {
    pub against_id: i64,
    pub faction_id: i64,
}

impl RefData for FactionWar {
    const KIND: &'static str = "fw_war";

    fn natural_key(&self) -> String {
        composite_key(&[&self.against_id, &self.faction_id])
    }
}

pub struct FwWarsFeed {
    fallback_expiry: Duration,
    page_size: usize,
}

impl FwWarsFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fallback_expiry: settings.fallback_expiry,
            page_size: settings.page_size,
        }
    }
}

#[async_trait]
impl EndpointAdapter for FwWarsFeed {
    type Bundle = Vec<EsiFwWar>;

    fn endpoint(&self) -> Endpoint {
        RefEndpoint::FwWars.endpoint()
    }

    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<Vec<EsiFwWar>>> {
        fetch_json(
            RefEndpoint::FwWars,
            "/fw/wars/",
            tracker,
            client,
            self.fallback_expiry,
        )
        .await
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: Vec<EsiFwWar>,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        let wars: Vec<FactionWar> = bundle
            .iter()
            .map(|w| FactionWar {
                against_id: w.against_id,
                faction_id: w.faction_id,
            })
            .collect();
        let mut out = upsert_all(&wars)?;
        out.extend(retire_unreported(store, at, None, &wars, self.page_size).await?);
        Ok(out)
    }
}

// ── Leaderboards ─────────────────────────────────────────────────

/// What a leaderboard ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardStat {
    Kills,
    VictoryPoints,
}

impl LeaderboardStat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderboardStat::Kills => "kills",
            LeaderboardStat::VictoryPoints => "victory_points",
        }
    }
}

impl fmt::Display for LeaderboardStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The time window a leaderboard entry covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatWindow {
    Total,
    LastWeek,
    Yesterday,
}

impl StatWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatWindow::Total => "total",
            StatWindow::LastWeek => "last_week",
            StatWindow::Yesterday => "yesterday",
        }
    }
}

impl fmt::Display for StatWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked row. Exactly one of the id fields is present, depending on the board.
#[derive(Debug, Clone, Deserialize)]
pub struct EsiLeaderboardEntry {
    #[serde(default)]
    pub faction_id: Option<i64>,
    #[serde(default)]
    pub corporation_id: Option<i64>,
    #[serde(default)]
    pub character_id: Option<i64>,
    #[serde(default)]
    pub amount: Option<i64>,
}

impl EsiLeaderboardEntry {
    fn subject_id(&self) -> Option<i64> {
        self.faction_id
            .or(self.corporation_id)
            .or(self.character_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsiLeaderboardWindows {
    #[serde(default)]
    pub active_total: Vec<EsiLeaderboardEntry>,
    #[serde(default)]
    pub last_week: Vec<EsiLeaderboardEntry>,
    #[serde(default)]
    pub yesterday: Vec<EsiLeaderboardEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsiLeaderboard {
    #[serde(default)]
    pub kills: EsiLeaderboardWindows,
    #[serde(default)]
    pub victory_points: EsiLeaderboardWindows,
}

impl EsiLeaderboard {
    /// Every row as `(stat, window, subject id, amount)`. Rows without an id are dropped.
    pub fn rows(&self) -> Vec<(LeaderboardStat, StatWindow, i64, i64)> {
        let boards = [
            (LeaderboardStat::Kills, &self.kills),
            (LeaderboardStat::VictoryPoints, &self.victory_points),
        ];
        let mut out = Vec::new();
        for (stat, windows) in boards {
            let lists = [
                (StatWindow::Total, &windows.active_total),
                (StatWindow::LastWeek, &windows.last_week),
                (StatWindow::Yesterday, &windows.yesterday),
            ];
            for (window, entries) in lists {
                for entry in entries {
                    match entry.subject_id() {
                        Some(id) => out.push((stat, window, id, entry.amount.unwrap_or(0))),
                        None => tracing::debug!(%stat, %window, "leaderboard row without id"),
                    }
                }
            }
        }
        out
    }
}

/// A record type stored from one of the three leaderboards.
pub trait LeaderboardRecord: RefData + 'static {
    const ENDPOINT: RefEndpoint;
    const PATH: &'static str;

    fn from_row(stat: LeaderboardStat, attribute: StatWindow, id: i64, amount: i64) -> Self;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionLeaderboardStat {
    pub stat: LeaderboardStat,
    pub attribute: StatWindow,
    pub faction_id: i64,
    pub amount: i64,
}

impl RefData for FactionLeaderboardStat {
    const KIND: &'static str = "fw_faction_leaderboard_stat";

    fn natural_key(&self) -> String {
        composite_key(&[&self.stat, &self.attribute, &self.faction_id])
    }
}

impl LeaderboardRecord for FactionLeaderboardStat {
    const ENDPOINT: RefEndpoint = RefEndpoint::FwFactionLeaderboard;
    const PATH: &'static str = "/fw/leaderboards/";

    fn from_row(stat: LeaderboardStat, attribute: StatWindow, id: i64, amount: i64) -> Self {
        Self {
            stat,
            attribute,
            faction_id: id,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporationLeaderboardStat {
    pub stat: LeaderboardStat,
    pub attribute: StatWindow,
    pub corporation_id: i64,
    pub amount: i64,
}

impl RefData for CorporationLeaderboardStat {
    const KIND: &'static str = "fw_corporation_leaderboard_stat";

    fn natural_key(&self) -> String {
        composite_key(&[&self.stat, &self.attribute, &self.corporation_id])
    }
}

impl LeaderboardRecord for CorporationLeaderboardStat {
    const ENDPOINT: RefEndpoint = RefEndpoint::FwCorporationLeaderboard;
    const PATH: &'static str = "/fw/leaderboards/corporations/";

    fn from_row(stat: LeaderboardStat, attribute: StatWindow, id: i64, amount: i64) -> Self {
        Self {
            stat,
            attribute,
            corporation_id: id,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterLeaderboardStat {
    pub stat: LeaderboardStat,
    pub attribute: StatWindow,
    pub character_id: i64,
    pub amount: i64,
}

impl RefData for CharacterLeaderboardStat {
    const KIND: &'static str = "fw_character_leaderboard_stat";

    fn natural_key(&self) -> String {
        composite_key(&[&self.stat, &self.attribute, &self.character_id])
    }
}

impl LeaderboardRecord for CharacterLeaderboardStat {
    const ENDPOINT: RefEndpoint = RefEndpoint::FwCharacterLeaderboard;
    const PATH: &'static str = "/fw/leaderboards/characters/";

    fn from_row(stat: LeaderboardStat, attribute: StatWindow, id: i64, amount: i64) -> Self {
        Self {
            stat,
            attribute,
            character_id: id,
            amount,
        }
    }
}

/// Kills and victory points over three windows for one leaderboard.
pub struct LeaderboardFeed<R> {
    fallback_expiry: Duration,
    page_size: usize,
    _record: PhantomData<fn() -> R>,
}

pub type FwFactionLeaderboardFeed = LeaderboardFeed<FactionLeaderboardStat>;
pub type FwCorporationLeaderboardFeed = LeaderboardFeed<CorporationLeaderboardStat>;
pub type FwCharacterLeaderboardFeed = LeaderboardFeed<CharacterLeaderboardStat>;

impl<R: LeaderboardRecord> LeaderboardFeed<R> {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fallback_expiry: settings.fallback_expiry,
            page_size: settings.page_size,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R: LeaderboardRecord> EndpointAdapter for LeaderboardFeed<R> {
    type Bundle = EsiLeaderboard;

    fn endpoint(&self) -> Endpoint {
        R::ENDPOINT.endpoint()
    }

    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<EsiLeaderboard>> {
        fetch_json(R::ENDPOINT, R::PATH, tracker, client, self.fallback_expiry).await
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: EsiLeaderboard,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        let stats: Vec<R> = bundle
            .rows()
            .into_iter()
            .map(|(stat, window, id, amount)| R::from_row(stat, window, id, amount))
            .collect();
        let mut out = upsert_all(&stats)?;
        out.extend(retire_unreported(store, at, None, &stats, self.page_size).await?);
        Ok(out)
    }
}
