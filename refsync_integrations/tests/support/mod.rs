#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use refsync_core::client::{SharedClient, WorkerPool};
use refsync_core::config::{SyncConfig, ThrottleConfig};
use refsync_core::models::{Clock, Endpoint, ManualClock};
use refsync_core::store::MemoryRefDb;
use refsync_core::store::traits::TrackerStore;
use refsync_core::sync::engine::SyncOrchestrator;
use refsync_core::tracker::models::SyncTracker;
use refsync_core::store::traits::VersionedStore;
use refsync_core::versioned::{Candidate, RefData, evolve_or_add, scan_all_typed};
use refsync_integrations::{EsiClient, EsiClientConfig};
use serde_json::Value;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
}

pub async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_json_expiring(server: &MockServer, route: &str, body: Value, expires: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("expires", expires)
                .set_body_json(body),
        )
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// An `EsiClient` pointed at the mock server with throttling effectively off.
pub fn esi(server: &MockServer) -> SharedClient {
    let throttle = ThrottleConfig {
        default_rate_per_sec: 100_000,
        ..ThrottleConfig::default()
    };
    let client = EsiClient::new(
        EsiClientConfig::new(server.uri()).with_user_agent("refsync-tests"),
        throttle,
        WorkerPool::current(16).unwrap(),
    )
    .unwrap();
    Arc::new(client)
}

pub struct Harness {
    pub db: MemoryRefDb,
    pub clock: ManualClock,
    pub orchestrator: SyncOrchestrator,
}

pub fn harness() -> Harness {
    let db = MemoryRefDb::new();
    let clock = ManualClock::new(t0());
    let orchestrator =
        SyncOrchestrator::new(Arc::new(db.clone()), Arc::new(db.clone()), SyncConfig::default())
            .with_clock(Arc::new(clock.clone()));
    Harness {
        db,
        clock,
        orchestrator,
    }
}

impl Harness {
    pub async fn schedule(&self, endpoint: &Endpoint, context: Option<&str>) -> SyncTracker {
        self.db
            .get_or_create_unfinished(endpoint, self.clock.now(), context.map(str::to_string))
            .await
            .unwrap()
    }

    pub async fn live<T: RefData>(&self) -> Vec<T> {
        scan_all_typed::<T>(&self.db, self.clock.now(), None, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    pub async fn live_at<T: RefData>(&self, at: DateTime<Utc>) -> Vec<T> {
        scan_all_typed::<T>(&self.db, at, None, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }
}

/// Writes `values` as live records set up at `at`.
pub async fn seed<T: RefData>(db: &MemoryRefDb, at: DateTime<Utc>, values: &[T]) {
    let mut txn = db.begin().await.unwrap();
    for v in values {
        evolve_or_add(txn.as_mut(), at, Candidate::upsert(v).unwrap())
            .await
            .unwrap();
    }
    txn.commit().await.unwrap();
}
