//! Wiring from CLI arguments to a running scheduler.

use crate::cli::EsiArgs;
use anyhow::Context;
use refsync_core::client::{SharedClient, WorkerPool};
use refsync_core::config::{FetchConfig, SyncConfig, ThrottleConfig};
use refsync_core::store::SqliteRefDb;
use refsync_core::store::traits::VersionedStore;
use refsync_core::sync::engine::SyncOrchestrator;
use refsync_core::sync::schedule::SyncScheduler;
use refsync_integrations::{EsiClient, EsiClientConfig, FeedSettings, registry};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DB_FILE: &str = "refsync.db";

pub async fn open_store(data_dir: &Path) -> anyhow::Result<SqliteRefDb> {
    let path = data_dir.join(DB_FILE);
    SqliteRefDb::new(&path)
        .await
        .with_context(|| format!("opening store at {}", path.display()))
}

/// Scheduler over every compiled-in feed, reading config from `REFSYNC_*` variables.
pub fn build_scheduler(
    db: &SqliteRefDb,
    esi: &EsiArgs,
    cancel: CancellationToken,
) -> anyhow::Result<SyncScheduler> {
    let sync = SyncConfig::from_env()?;
    let throttle = ThrottleConfig::from_env()?;
    let fetch = FetchConfig::from_env()?;

    let client = esi_client(esi, throttle, &fetch)?;
    let settings = FeedSettings::new(&sync, fetch, cancel);

    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        sync,
    ));
    let mut scheduler = SyncScheduler::new(orchestrator, client);
    for handler in registry(&settings) {
        scheduler.register(handler)?;
    }
    Ok(scheduler)
}

fn esi_client(
    esi: &EsiArgs,
    throttle: ThrottleConfig,
    fetch: &FetchConfig,
) -> anyhow::Result<SharedClient> {
    let config = EsiClientConfig::new(esi.esi_base_url.clone())
        .with_user_agent(esi.user_agent.clone())
        .with_timeout(Duration::from_secs(esi.timeout));
    config.validate()?;
    let pool = WorkerPool::current(fetch.max_concurrency)?;
    Ok(Arc::new(EsiClient::new(config, throttle, pool)?))
}

/// Runs until ctrl-c.
pub async fn run(data_dir: &Path, esi: &EsiArgs) -> anyhow::Result<()> {
    let db = open_store(data_dir).await?;
    let cancel = CancellationToken::new();
    let scheduler = build_scheduler(&db, esi, cancel.clone())?;
    tracing::info!(endpoints = scheduler.endpoints().len(), "sync scheduler starting");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        shutdown.cancel();
    });

    scheduler.run_loop(cancel).await?;
    Ok(())
}

pub async fn tick(data_dir: &Path, esi: &EsiArgs) -> anyhow::Result<()> {
    let db = open_store(data_dir).await?;
    let scheduler = build_scheduler(&db, esi, CancellationToken::new())?;
    for (endpoint, disposition) in scheduler.tick().await? {
        println!("{endpoint}\t{disposition:?}");
    }
    Ok(())
}

pub async fn status(data_dir: &Path) -> anyhow::Result<serde_json::Value> {
    let db = open_store(data_dir).await?;
    let scheduler = build_scheduler(&db, &EsiArgs::default(), CancellationToken::new())?;
    let rows = scheduler
        .status()
        .await?
        .into_iter()
        .map(|s| {
            serde_json::json!({
                "endpoint": s.endpoint.as_str(),
                "excluded": s.excluded,
                "latest_finished": s.latest_finished,
                "pending": s.pending,
            })
        })
        .collect();
    Ok(serde_json::Value::Array(rows))
}

pub async fn history(data_dir: &Path, kind: &str, key: &str) -> anyhow::Result<serde_json::Value> {
    let db = open_store(data_dir).await?;
    let versions = db.history(kind, key).await?;
    Ok(serde_json::to_value(versions)?)
}
