use crate::client::SharedClient;
use crate::models::Endpoint;
use crate::sync::engine::SyncOrchestrator;
use crate::sync::models::SyncDisposition;
use crate::sync::traits::SyncHandler;
use crate::tracker::models::SyncTracker;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Periodically runs every registered feed whose tracker is due.
///
/// - Endpoints without an unfinished tracker get one scheduled immediately.
/// - Excluded endpoints are never bootstrapped or run.
/// - Due endpoints run concurrently, one task each.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    client: SharedClient,
    handlers: Vec<Arc<dyn SyncHandler>>,
}

/// Latest outcome and pending tracker for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub endpoint: Endpoint,
    pub excluded: bool,
    pub latest_finished: Option<SyncTracker>,
    pub pending: Option<SyncTracker>,
}

impl SyncScheduler {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(orchestrator: Arc<SyncOrchestrator>, client: SharedClient) -> Self {
        Self {
            orchestrator,
            client,
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn SyncHandler>) -> Result<()> {
        let endpoint = handler.target();
        if self.handlers.iter().any(|h| h.target() == endpoint) {
            return Err(Error::Conflict(format!(
                "endpoint '{endpoint}' already registered"
            )));
        }
        self.handlers.push(handler);
        Ok(())
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.handlers.iter().map(|h| h.target()).collect()
    }

    /// Excluded names that match no registered endpoint.
    pub fn unknown_exclusions(&self) -> Vec<Endpoint> {
        let known: BTreeSet<Endpoint> = self.endpoints().into_iter().collect();
        self.orchestrator
            .config()
            .excluded_endpoints
            .iter()
            .filter(|e| !known.contains(*e))
            .cloned()
            .collect()
    }

    /// Run the scheduler loop until `cancel` fires.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run_loop(&self, cancel: CancellationToken) -> Result<()> {
        for unknown in self.unknown_exclusions() {
            tracing::warn!(endpoint = %unknown, "ignoring unknown excluded endpoint");
        }

        let mut ticker = tokio::time::interval(self.orchestrator.config().poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("sync scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // Best-effort tick; errors are logged but do not stop scheduling.
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "sync scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Bootstraps missing trackers and runs every due endpoint once.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tick(&self) -> Result<Vec<(Endpoint, SyncDisposition)>> {
        let now = self.orchestrator.now();
        let config = self.orchestrator.config();
        let trackers = self.orchestrator.trackers();
        let mut set = JoinSet::new();

        for handler in &self.handlers {
            let endpoint = handler.target();
            if config.is_excluded(&endpoint) {
                tracing::debug!(endpoint = %endpoint, "endpoint excluded from sync");
                continue;
            }

            let tracker = match trackers.get_or_create_unfinished(&endpoint, now, None).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "failed to bootstrap tracker");
                    continue;
                }
            };
            // Claimed trackers still run so the staleness check can fire.
            if !tracker.is_due(now) && !tracker.is_claimed() {
                continue;
            }

            let handler = handler.clone();
            let orchestrator = self.orchestrator.clone();
            let client = self.client.clone();
            set.spawn(async move {
                let disposition = handler.sync(&orchestrator, &client).await;
                (endpoint, disposition)
            });
        }

        let mut out = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(res) => out.push(res),
                Err(e) => tracing::warn!(error = %e, "sync task failed"),
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn status(&self) -> Result<Vec<EndpointStatus>> {
        let config = self.orchestrator.config();
        let trackers = self.orchestrator.trackers();
        let mut out = Vec::with_capacity(self.handlers.len());
        for endpoint in self.endpoints() {
            out.push(EndpointStatus {
                excluded: config.is_excluded(&endpoint),
                latest_finished: trackers.get_latest_finished(&endpoint).await?,
                pending: trackers.get_unfinished(&endpoint).await?,
                endpoint,
            });
        }
        Ok(out)
    }
}
