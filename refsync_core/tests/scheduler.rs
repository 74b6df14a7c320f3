mod support;

use refsync_core::Error;
use refsync_core::config::SyncConfig;
use refsync_core::models::{Endpoint, ManualClock, from_millis};
use refsync_core::store::MemoryRefDb;
use refsync_core::store::traits::TrackerStore;
use refsync_core::sync::models::SyncDisposition;
use refsync_core::sync::schedule::SyncScheduler;
use refsync_core::tracker::models::SyncStatus;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use support::{FakeClient, Harness, WidgetAdapter, harness, shared};

/// Handles the tests keep after the orchestrator moves into the scheduler.
struct Parts {
    db: MemoryRefDb,
    clock: ManualClock,
    client: Arc<FakeClient>,
}

fn scheduler(h: Harness, adapters: Vec<Arc<WidgetAdapter>>) -> (SyncScheduler, Parts) {
    let Harness {
        db,
        clock,
        orchestrator,
        client,
    } = h;
    let mut scheduler = SyncScheduler::new(Arc::new(orchestrator), shared(&client));
    for adapter in adapters {
        scheduler.register(adapter).unwrap();
    }
    (scheduler, Parts { db, clock, client })
}

fn excluding(names: &[&str]) -> SyncConfig {
    SyncConfig {
        excluded_endpoints: names.iter().map(|n| Endpoint::from(*n)).collect::<BTreeSet<_>>(),
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn first_tick_bootstraps_and_runs_every_endpoint() {
    let h = harness(SyncConfig::default(), 5_000);
    h.client.respond_json("/widgets/", json!([{"id": 1, "v": 1}]));
    let a = Arc::new(WidgetAdapter::new("alpha"));
    let b = Arc::new(WidgetAdapter::new("beta"));
    let db = h.db.clone();
    let orchestrator = Arc::new(h.orchestrator);
    let mut scheduler = SyncScheduler::new(orchestrator, shared(&h.client));
    scheduler.register(a.clone()).unwrap();
    scheduler.register(b.clone()).unwrap();

    let results = scheduler.tick().await.unwrap();

    let names: Vec<_> = results.iter().map(|(e, _)| e.as_str().to_string()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert!(results.iter().all(|(_, d)| matches!(
        d,
        SyncDisposition::Completed {
            status: SyncStatus::Finished,
            ..
        }
    )));
    assert_eq!(a.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(b.fetches.load(Ordering::SeqCst), 1);

    // Each endpoint now has one finished tracker and one successor five minutes out.
    for ep in ["alpha", "beta"] {
        let ep = Endpoint::from(ep);
        assert!(db.get_latest_finished(&ep).await.unwrap().is_some());
        let next = db.get_unfinished(&ep).await.unwrap().unwrap();
        assert_eq!(next.scheduled_at, from_millis(5_000 + 300_000));
    }
}

#[tokio::test]
async fn trackers_that_are_not_due_are_left_alone() {
    let h = harness(SyncConfig::default(), 5_000);
    let adapter = Arc::new(WidgetAdapter::new("alpha"));
    let ep = Endpoint::from("alpha");
    h.db
        .get_or_create_unfinished(&ep, from_millis(9_000), None)
        .await
        .unwrap();
    let (scheduler, h) = scheduler(h, vec![adapter.clone()]);

    assert!(scheduler.tick().await.unwrap().is_empty());
    assert_eq!(adapter.fetches.load(Ordering::SeqCst), 0);

    h.client.respond_json("/widgets/", json!([]));
    h.clock.set_millis(9_000);
    let results = scheduler.tick().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(adapter.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn excluded_endpoints_are_never_bootstrapped() {
    let h = harness(excluding(&["beta"]), 5_000);
    h.client.respond_json("/widgets/", json!([]));
    let a = Arc::new(WidgetAdapter::new("alpha"));
    let b = Arc::new(WidgetAdapter::new("beta"));
    let (scheduler, h) = scheduler(h, vec![a.clone(), b.clone()]);

    let results = scheduler.tick().await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, Endpoint::from("alpha"));
    assert_eq!(b.fetches.load(Ordering::SeqCst), 0);
    assert!(h.db.get_unfinished(&Endpoint::from("beta")).await.unwrap().is_none());
    assert!(h.db.get_latest_finished(&Endpoint::from("beta")).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_exclusions_are_reported() {
    let h = harness(excluding(&["beta", "not_a_feed"]), 0);
    let (scheduler, _h) = scheduler(
        h,
        vec![
            Arc::new(WidgetAdapter::new("alpha")),
            Arc::new(WidgetAdapter::new("beta")),
        ],
    );
    assert_eq!(
        scheduler.unknown_exclusions(),
        vec![Endpoint::from("not_a_feed")]
    );
}

#[tokio::test]
async fn registering_an_endpoint_twice_is_rejected() {
    let h = harness(SyncConfig::default(), 0);
    let mut scheduler = SyncScheduler::new(Arc::new(h.orchestrator), shared(&h.client));
    scheduler
        .register(Arc::new(WidgetAdapter::new("alpha")))
        .unwrap();
    let err = scheduler
        .register(Arc::new(WidgetAdapter::new("alpha")))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(scheduler.endpoints(), vec![Endpoint::from("alpha")]);
}

#[tokio::test]
async fn status_reports_latest_and_pending_trackers() {
    let h = harness(excluding(&["beta"]), 5_000);
    h.client.fail("/widgets/", 503);
    let (scheduler, _h) = scheduler(
        h,
        vec![
            Arc::new(WidgetAdapter::new("alpha")),
            Arc::new(WidgetAdapter::new("beta")),
        ],
    );
    scheduler.tick().await.unwrap();

    let status = scheduler.status().await.unwrap();
    assert_eq!(status.len(), 2);

    let alpha = &status[0];
    assert_eq!(alpha.endpoint, Endpoint::from("alpha"));
    assert!(!alpha.excluded);
    assert_eq!(
        alpha.latest_finished.as_ref().map(|t| t.status),
        Some(SyncStatus::Error)
    );
    assert!(alpha.pending.is_some());

    let beta = &status[1];
    assert!(beta.excluded);
    assert!(beta.latest_finished.is_none());
    assert!(beta.pending.is_none());
}
