//! Fan-out/fan-in of many independent calls to the external service.
//!
//! Units are spawned chunk by chunk onto the client's worker pool. Each unit takes a rate-limit
//! token before running and reports error-budget metadata when it fails. Results land in a slot
//! per submission index, so the output order always matches the input order.

use crate::client::{ClientHandle, SharedClient};
use crate::config::FetchConfig;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct ConcurrentFetcher {
    config: FetchConfig,
    cancel: CancellationToken,
}

impl Default for ConcurrentFetcher {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

impl ConcurrentFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Aborts outstanding units when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Runs `unit` once per item and returns results in submission order.
    ///
    /// The first failure in submission order fails the whole fetch; later chunks are not started.
    #[tracing::instrument(level = "info", skip(self, client, items, unit), fields(total = items.len()))]
    pub async fn fetch_all<I, T, F, Fut>(
        &self,
        client: &SharedClient,
        call_class: &str,
        items: Vec<I>,
        unit: F,
    ) -> Result<Vec<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(SharedClient, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let deadline = self.config.deadline.map(|d| Instant::now() + d);
        let unit = Arc::new(unit);
        let mut out = Vec::with_capacity(items.len());
        let mut items = items.into_iter();

        loop {
            let chunk: Vec<I> = items.by_ref().take(self.config.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let results = self
                .run_chunk(client, call_class, chunk, unit.clone(), deadline)
                .await?;
            out.extend(results);
        }
        Ok(out)
    }

    async fn run_chunk<I, T, F, Fut>(
        &self,
        client: &SharedClient,
        call_class: &str,
        chunk: Vec<I>,
        unit: Arc<F>,
        deadline: Option<Instant>,
    ) -> Result<Vec<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(SharedClient, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let size = chunk.len();
        let mut slots: Vec<Option<Result<T>>> = (0..size).map(|_| None).collect();
        let mut set = JoinSet::new();

        for (idx, item) in chunk.into_iter().enumerate() {
            let client = client.clone();
            let unit = unit.clone();
            let call_class = call_class.to_string();
            let permits = client.workers().permits();
            let handle = client.workers().handle().clone();
            set.spawn_on(
                async move {
                    let res = match permits.acquire_owned().await {
                        Ok(_permit) => run_unit(client, &call_class, item, unit.as_ref()).await,
                        Err(e) => Err(Error::backend("worker_pool", e)),
                    };
                    (idx, res)
                },
                &handle,
            );
        }

        let mut outstanding = size;
        let mut liveness = tokio::time::interval(self.config.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        liveness.tick().await;

        while outstanding > 0 {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    set.abort_all();
                    return Err(Error::BackendMessage("fan-out cancelled".to_string()));
                }
                _ = sleep_until_deadline(deadline) => {
                    set.abort_all();
                    tracing::warn!(outstanding, size, "fan-out deadline exceeded");
                    return Err(Error::BackendMessage("fan-out deadline exceeded".to_string()));
                }
                joined = set.join_next() => match joined {
                    Some(Ok((idx, res))) => {
                        slots[idx] = Some(res);
                        outstanding -= 1;
                    }
                    Some(Err(e)) => return Err(Error::backend("fan-out unit", e)),
                    None => break,
                },
                _ = liveness.tick() => {
                    tracing::info!(outstanding, size, "waiting for fan-out units");
                }
            }
        }

        let mut out = Vec::with_capacity(size);
        for (idx, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(Ok(v)) => out.push(v),
                Some(Err(e)) => {
                    tracing::debug!(idx, error = %e, "fan-out unit failed");
                    return Err(e);
                }
                None => {
                    return Err(Error::BackendMessage(format!(
                        "fan-out unit {idx} produced no result"
                    )));
                }
            }
        }
        Ok(out)
    }
}

async fn run_unit<I, T, F, Fut>(
    client: SharedClient,
    call_class: &str,
    item: I,
    unit: &F,
) -> Result<T>
where
    F: Fn(SharedClient, I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let limiter = ClientHandle::limiter(client.as_ref());
    limiter.acquire(call_class).await;
    let res = unit(client.clone(), item).await;
    if let Err(Error::Client(e)) = &res {
        limiter.observe(&e.meta).await;
    }
    res
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
