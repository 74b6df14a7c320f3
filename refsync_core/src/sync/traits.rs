use crate::Result;
use crate::client::SharedClient;
use crate::models::Endpoint;
use crate::store::traits::{StoreTxn, VersionedStore};
use crate::sync::engine::SyncOrchestrator;
use crate::sync::models::{ServerResult, SyncDisposition};
use crate::tracker::models::SyncTracker;
use crate::versioned::models::Candidate;
use crate::versioned::ops::{CommitAction, evolve_or_add};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One data feed: how to fetch it and how it maps onto versioned records.
#[async_trait]
pub trait EndpointAdapter: Send + Sync {
    /// Raw data handed from `fetch` to `map_to_records`.
    type Bundle: Send + 'static;

    fn endpoint(&self) -> Endpoint;

    /// When false the run is deferred and the tracker left untouched.
    fn prerequisites_satisfied(&self) -> bool {
        true
    }

    /// Pulls raw data from the external service.
    async fn fetch(
        &self,
        tracker: &SyncTracker,
        client: &SharedClient,
    ) -> Result<ServerResult<Self::Bundle>>;

    /// Turns fetched data into candidates, including retirements for entities no longer reported.
    async fn map_to_records(
        &self,
        at: DateTime<Utc>,
        bundle: Self::Bundle,
        store: &dyn VersionedStore,
    ) -> Result<Vec<Candidate>>;

    async fn commit(
        &self,
        txn: &mut dyn StoreTxn,
        at: DateTime<Utc>,
        candidate: Candidate,
    ) -> Result<CommitAction> {
        evolve_or_add(txn, at, candidate).await
    }

    /// Context carried into the successor tracker.
    fn next_context(&self, _tracker: &SyncTracker) -> Option<String> {
        None
    }
}

/// Object-safe view of an adapter so schedulers can hold many feeds at once.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    fn target(&self) -> Endpoint;

    async fn sync(
        &self,
        orchestrator: &SyncOrchestrator,
        client: &SharedClient,
    ) -> SyncDisposition;
}

#[async_trait]
impl<A: EndpointAdapter> SyncHandler for A {
    fn target(&self) -> Endpoint {
        self.endpoint()
    }

    async fn sync(
        &self,
        orchestrator: &SyncOrchestrator,
        client: &SharedClient,
    ) -> SyncDisposition {
        orchestrator.run(self, client).await
    }
}
