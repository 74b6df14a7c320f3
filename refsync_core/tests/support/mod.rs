#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refsync_core::client::{
    ApiRequest, ApiResponse, ClientError, ClientHandle, ResponseMeta, SharedClient, WorkerPool,
    call_json,
};
use refsync_core::config::{SyncConfig, ThrottleConfig};
use refsync_core::models::{Endpoint, ManualClock};
use refsync_core::store::MemoryRefDb;
use refsync_core::store::traits::{StoreTxn, VersionedStore};
use refsync_core::sync::engine::SyncOrchestrator;
use refsync_core::sync::models::ServerResult;
use refsync_core::sync::traits::EndpointAdapter;
use refsync_core::throttle::RateLimiter;
use refsync_core::tracker::models::SyncTracker;
use refsync_core::versioned::{
    Candidate, CommitAction, RefData, evolve_or_add, retire_missing, scan_all_typed,
};
use refsync_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: i64,
    pub v: i64,
}

impl RefData for Widget {
    const KIND: &'static str = "widget";

    fn natural_key(&self) -> String {
        format!("{:06}", self.id)
    }
}

pub fn widgets(pairs: &[(i64, i64)]) -> Vec<Widget> {
    pairs.iter().map(|&(id, v)| Widget { id, v }).collect()
}

/// Canned responses keyed by request path.
pub struct FakeClient {
    responses: Mutex<HashMap<String, Result<ApiResponse>>>,
    calls: AtomicUsize,
    limiter: RateLimiter,
    workers: WorkerPool,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        let limiter = RateLimiter::new(ThrottleConfig {
            default_rate_per_sec: 100_000,
            ..ThrottleConfig::default()
        });
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            limiter,
            workers: WorkerPool::current(16).unwrap(),
        })
    }

    pub fn respond_json(&self, path: &str, body: serde_json::Value) {
        self.responses.lock().unwrap().insert(
            path.to_string(),
            Ok(ApiResponse {
                status: 200,
                meta: ResponseMeta::default(),
                body: Some(body),
            }),
        );
    }

    pub fn fail(&self, path: &str, status: u16) {
        self.responses.lock().unwrap().insert(
            path.to_string(),
            Err(Error::Client(ClientError::status(status, ResponseMeta::default()))),
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientHandle for FakeClient {
    async fn call(&self, _call_class: &str, request: ApiRequest) -> Result<ApiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.lock().unwrap();
        match responses.get(&request.path) {
            Some(Ok(resp)) => Ok(resp.clone()),
            Some(Err(Error::Client(e))) => Err(Error::Client(e.clone())),
            Some(Err(e)) => Err(Error::BackendMessage(e.to_string())),
            None => Err(Error::Client(ClientError::status(404, ResponseMeta::default()))),
        }
    }

    fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn workers(&self) -> &WorkerPool {
        &self.workers
    }
}

pub fn shared(client: &Arc<FakeClient>) -> SharedClient {
    client.clone()
}

/// Feed of widgets served from `/widgets/`, retiring widgets that disappear.
pub struct WidgetAdapter {
    pub endpoint: Endpoint,
    pub expiry: Mutex<Option<DateTime<Utc>>>,
    pub ready: AtomicBool,
    pub fetches: AtomicUsize,
    pub fail_commit_key: Mutex<Option<String>>,
    pub fail_mapping: AtomicBool,
    /// When set, `fetch` waits for a notification before calling out.
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl WidgetAdapter {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: Endpoint::from(endpoint),
            expiry: Mutex::new(None),
            ready: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
            fail_commit_key: Mutex::new(None),
            fail_mapping: AtomicBool::new(false),
            gate: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EndpointAdapter for WidgetAdapter {
    type Bundle = Vec<Widget>;

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    fn prerequisites_satisfied(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn fetch(
        &self,
        _tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<Vec<Widget>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let (data, _meta) =
            call_json::<Vec<Widget>>(client.as_ref(), "widget", ApiRequest::get("/widgets/"))
                .await?;
        let expiry = *self.expiry.lock().unwrap();
        Ok(ServerResult::new(data, expiry))
    }

    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: Vec<Widget>,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>> {
        if self.fail_mapping.load(Ordering::SeqCst) {
            return Err(Error::BackendMessage("mapping failed".to_string()));
        }
        let stored = scan_all_typed::<Widget>(store, at, None, 100).await?;
        let keys: Vec<String> = bundle.iter().map(|w| w.natural_key()).collect();
        let mut out = bundle
            .iter()
            .map(Candidate::upsert)
            .collect::<Result<Vec<_>>>()?;
        out.extend(retire_missing(
            stored.into_iter().map(|(r, _)| r),
            keys.iter().map(String::as_str),
            at,
        )?);
        Ok(out)
    }

    async fn commit(
        &self,
        txn: &mut dyn StoreTxn,
        at: DateTime<Utc>,
        candidate: Candidate,
    ) -> Result<CommitAction> {
        let fail = self.fail_commit_key.lock().unwrap().clone();
        if fail.as_deref() == Some(candidate.record().key.as_str()) {
            return Err(Error::BackendMessage("commit failed".to_string()));
        }
        evolve_or_add(txn, at, candidate).await
    }

    fn next_context(&self, tracker: &SyncTracker) -> Option<String> {
        let n = tracker
            .context
            .as_deref()
            .and_then(|c| c.parse::<u32>().ok())
            .unwrap_or(0);
        Some(((n + 1) % 10).to_string())
    }
}

pub struct Harness {
    pub db: MemoryRefDb,
    pub clock: ManualClock,
    pub orchestrator: SyncOrchestrator,
    pub client: Arc<FakeClient>,
}

pub fn harness(config: SyncConfig, now_ms: i64) -> Harness {
    let db = MemoryRefDb::new();
    let clock = ManualClock::at_millis(now_ms);
    let orchestrator = SyncOrchestrator::new(Arc::new(db.clone()), Arc::new(db.clone()), config)
        .with_clock(Arc::new(clock.clone()));
    Harness {
        db,
        clock,
        orchestrator,
        client: FakeClient::new(),
    }
}
