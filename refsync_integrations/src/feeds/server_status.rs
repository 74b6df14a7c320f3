//! `GET /status/`: a single record describing the game server.

use crate::feeds::{FeedSettings, RefEndpoint, expiry_or_fallback, upsert_all};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refsync_core::client::{ApiRequest, SharedClient, call_json};
use refsync_core::models::Endpoint;
use refsync_core::store::traits::VersionedStore;
use refsync_core::sync::models::ServerResult;
use refsync_core::sync::traits::EndpointAdapter;
use refsync_core::tracker::models::SyncTracker;
use refsync_core::versioned::{Candidate, RefData};
use refsync_core::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EsiStatus {
    pub players: i64,
    pub server_version: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub vip: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub online_players: i64,
    pub server_online: bool,
    pub start_time: DateTime<Utc>,
    pub server_version: String,
    pub vip: bool,
}

impl RefData for ServerStatus {
    const KIND: &'static str = "server_status";

    fn natural_key(&self) -> String {
        // Singleton.
        "server".to_string()
    }
}

impl From<EsiStatus> for ServerStatus {
    fn from(s: EsiStatus) -> Self {
        Self {
            online_players: s.players,
            server_online: true,
            start_time: s.start_time,
            server_version: s.server_version,
            vip: s.vip.unwrap_or(false),
        }
    }
}

pub struct ServerStatusFeed {
    fallback_expiry: Duration,
}

impl ServerStatusFeed {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            fallback_expiry: settings.fallback_expiry,
        }
    }
}

#[async_trait]
impl EndpointAdapter for ServerStatusFeed {
    type Bundle = EsiStatus;

    fn endpoint(&self) -> Endpoint {
        RefEndpoint::ServerStatus.endpoint()
    }

    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<EsiStatus>> {
        let (status, meta) = call_json::<EsiStatus>(
            client.as_ref(),
            RefEndpoint::ServerStatus.name(),
            ApiRequest::get("/status/"),
        )
        .await?;
        let expiry = expiry_or_fallback(&meta, tracker, self.fallback_expiry);
        Ok(ServerResult::new(status, Some(expiry)))
    }

    async fn map_to_records(
        &self,
        _at: DateTime<Utc>,
        bundle: EsiStatus,
        _store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        upsert_all(&[ServerStatus::from(bundle)])
    }
}
