//! Sovereignty map, campaigns (with participants) and structures.

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
use std::time::Duration;

// ── Map ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EsiSovSystem {
    pub system_id: i64,
    #[serde(default)]
    pub alliance_id: Option<i64>,
    #[serde(default)]
    pub corporation_id: Option<i64>,
    #[serde(default)]
    pub faction_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SovereigntyMap {
    pub system_id: i64,
    pub alliance_id: i64,
    pub corporation_id: i64,
    pub faction_id: i64,
}

impl RefData for SovereigntyMap {
    const KIND: &'static str = "sov_map";

    fn natural_key(&self) -> String {
        self.system_id.to_string()
    }
}

impl From<&EsiSovSystem> for SovereigntyMap {
    fn from(s: &EsiSovSystem) -> Self {
        Self {
            system_id: s.system_id,
            alliance_id: s.alliance_id.unwrap_or(0),
            corporation_id: s.corporation_id.unwrap_or(0),
            faction_id: s.faction_id.unwrap_or(0),
        }
    }
}

pub struct SovMapFeed {
    fallback_expiry: Duration,
    page_size: usize,
}

impl SovMapFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fallback_expiry: settings.fallback_expiry,
            page_size: settings.page_size,
        }
    }
}

#[async_trait]
impl EndpointAdapter for SovMapFeed {
    type Bundle = Vec<EsiSovSystem>;

    fn endpoint(&self) -> Endpoint {
        RefEndpoint::SovMap.endpoint()
    }

    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<Vec<EsiSovSystem>>> {
        fetch_json(
            RefEndpoint::SovMap,
            "/sovereignty/map/",
            tracker,
            client,
            self.fallback_expiry,
        )
        .await
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: Vec<EsiSovSystem>,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        let systems: Vec<SovereigntyMap> = bundle.iter().map(SovereigntyMap::from).collect();
        let mut out = upsert_all(&systems)?;
        out.extend(retire_unreported(store, at, None, &systems, self.page_size).await?);
        Ok(out)
    }
}

// ── Campaigns ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EsiCampaignParticipant {
    pub alliance_id: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiCampaign {
    pub campaign_id: i64,
    pub structure_id: i64,
    pub solar_system_id: i64,
    pub constellation_id: i64,
    pub event_type: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub defender_id: Option<i64>,
    #[serde(default)]
    pub defender_score: Option<f64>,
    #[serde(default)]
    pub attackers_score: Option<f64>,
    #[serde(default)]
    pub participants: Vec<EsiCampaignParticipant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SovereigntyCampaign {
    pub campaign_id: i64,
    pub structure_id: i64,
    pub solar_system_id: i64,
    pub constellation_id: i64,
    pub event_type: String,
    pub start_time: DateTime<Utc>,
    pub defender_id: i64,
    pub defender_score: f64,
    pub attackers_score: f64,
}

impl RefData for SovereigntyCampaign {
    const KIND: &'static str = "sov_campaign";

    fn natural_key(&self) -> String {
        self.campaign_id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SovereigntyCampaignParticipant {
    pub campaign_id: i64,
    pub alliance_id: i64,
    pub score: f64,
}

impl RefData for SovereigntyCampaignParticipant {
    const KIND: &'static str = "sov_campaign_participant";

    fn natural_key(&self) -> String {
        composite_key(&[&self.campaign_id, &self.alliance_id])
    }
}

impl From<&EsiCampaign> for SovereigntyCampaign {
    fn from(c: &EsiCampaign) -> Self {
        Self {
            campaign_id: c.campaign_id,
            structure_id: c.structure_id,
            solar_system_id: c.solar_system_id,
            constellation_id: c.constellation_id,
            event_type: c.event_type.clone(),
            start_time: c.start_time,
            defender_id: c.defender_id.unwrap_or(0),
            defender_score: c.defender_score.unwrap_or(0.0),
            attackers_score: c.attackers_score.unwrap_or(0.0),
        }
    }
}

pub struct SovCampaignFeed {
    fallback_expiry: Duration,
    page_size: usize,
}

impl SovCampaignFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fallback_expiry: settings.fallback_expiry,
            page_size: settings.page_size,
        }
    }
}

#[async_trait]
impl EndpointAdapter for SovCampaignFeed {
    type Bundle = Vec<EsiCampaign>;

    fn endpoint(&self) -> Endpoint {
        RefEndpoint::SovCampaign.endpoint()
    }

    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<Vec<EsiCampaign>>> {
        fetch_json(
            RefEndpoint::SovCampaign,
            "/sovereignty/campaigns/",
            tracker,
            client,
            self.fallback_expiry,
        )
        .await
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: Vec<EsiCampaign>,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        let campaigns: Vec<SovereigntyCampaign> =
            bundle.iter().map(SovereigntyCampaign::from).collect();
        let participants: Vec<SovereigntyCampaignParticipant> = bundle
            .iter()
            .flat_map(|c| {
                c.participants
                    .iter()
                    .map(move |p| SovereigntyCampaignParticipant {
                        campaign_id: c.campaign_id,
                        alliance_id: p.alliance_id,
                        score: p.score,
                    })
            })
            .collect();

        let mut out = upsert_all(&campaigns)?;
        out.extend(upsert_all(&participants)?);
        out.extend(retire_unreported(store, at, None, &campaigns, self.page_size).await?);
        out.extend(retire_unreported(store, at, None, &participants, self.page_size).await?);
        Ok(out)
    }
}

// ── Structures ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EsiSovStructure {
    pub alliance_id: i64,
    pub solar_system_id: i64,
    pub structure_id: i64,
    pub structure_type_id: i64,
    #[serde(default)]
    pub vulnerability_occupancy_level: Option<f64>,
    #[serde(default)]
    pub vulnerable_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vulnerable_end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SovereigntyStructure {
    pub structure_id: i64,
    pub alliance_id: i64,
    pub solar_system_id: i64,
    pub structure_type_id: i64,
    pub vulnerability_occupancy_level: f64,
    pub vulnerable_start_time: DateTime<Utc>,
    pub vulnerable_end_time: DateTime<Utc>,
}

impl RefData for SovereigntyStructure {
    const KIND: &'static str = "sov_structure";

    fn natural_key(&self) -> String {
        self.structure_id.to_string()
    }
}

impl From<&EsiSovStructure> for SovereigntyStructure {
    fn from(s: &EsiSovStructure) -> Self {
        Self {
            structure_id: s.structure_id,
            alliance_id: s.alliance_id,
            solar_system_id: s.solar_system_id,
            structure_type_id: s.structure_type_id,
            vulnerability_occupancy_level: s.vulnerability_occupancy_level.unwrap_or(0.0),
            vulnerable_start_time: s.vulnerable_start_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            vulnerable_end_time: s.vulnerable_end_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

pub struct SovStructureFeed {
    fallback_expiry: Duration,
    page_size: usize,
}

impl SovStructureFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fallback_expiry: settings.fallback_expiry,
            page_size: settings.page_size,
        }
    }
}

#[async_trait]
impl EndpointAdapter for SovStructureFeed {
    type Bundle = Vec<EsiSovStructure>;

    fn endpoint(&self) -> Endpoint {
        RefEndpoint::SovStructure.endpoint()
    }

    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<Vec<EsiSovStructure>>> {
        fetch_json(
            RefEndpoint::SovStructure,
            "/sovereignty/structures/",
            tracker,
            client,
            self.fallback_expiry,
        )
        .await
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: Vec<EsiSovStructure>,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        let structures: Vec<SovereigntyStructure> =
            bundle.iter().map(SovereigntyStructure::from).collect();
        let mut out = upsert_all(&structures)?;
        out.extend(retire_unreported(store, at, None, &structures, self.page_size).await?);
        Ok(out)
    }
}
