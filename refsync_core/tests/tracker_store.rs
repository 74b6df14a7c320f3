use refsync_core::Error;
use refsync_core::models::{Endpoint, from_millis};
use refsync_core::store::traits::TrackerStore;
use refsync_core::store::{MemoryRefDb, SqliteRefDb};
use refsync_core::tracker::models::{SyncStatus, SyncTracker, TrackerQuery};
use std::sync::Arc;

async fn backends() -> (Vec<Arc<dyn TrackerStore>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteRefDb::new(dir.path().join("refsync.db")).await.unwrap();
    (vec![Arc::new(MemoryRefDb::new()), Arc::new(sqlite)], dir)
}

async fn finished(
    store: &dyn TrackerStore,
    ep: &Endpoint,
    scheduled_ms: i64,
    ended_ms: i64,
    status: SyncStatus,
) -> SyncTracker {
    let mut t = store
        .get_or_create_unfinished(ep, from_millis(scheduled_ms), None)
        .await
        .unwrap();
    t.claim(from_millis(scheduled_ms)).unwrap();
    store.update(&t).await.unwrap();
    t.set_outcome(status, "done");
    store.finish(&mut t, from_millis(ended_ms)).await.unwrap();
    t
}

#[tokio::test]
async fn get_or_create_returns_the_existing_unfinished_tracker() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("alliance");
        let a = store
            .get_or_create_unfinished(&ep, from_millis(10), Some("4".into()))
            .await
            .unwrap();
        let b = store
            .get_or_create_unfinished(&ep, from_millis(99), None)
            .await
            .unwrap();

        assert_eq!(a.tracker_id, b.tracker_id);
        assert_eq!(b.scheduled_at, from_millis(10));
        assert_eq!(b.context.as_deref(), Some("4"));
        assert_eq!(b.status, SyncStatus::NotProcessed);

        let fetched = store.get_unfinished(&ep).await.unwrap().unwrap();
        assert_eq!(fetched, a);
        assert!(
            store
                .get_unfinished(&Endpoint::from("sovereignty_map"))
                .await
                .unwrap()
                .is_none()
        );
    }
}

#[tokio::test]
async fn claim_is_persisted_by_update() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("server_status");
        let mut t = store
            .get_or_create_unfinished(&ep, from_millis(1_234), None)
            .await
            .unwrap();
        t.claim(from_millis(1_238)).unwrap();
        store.update(&t).await.unwrap();

        let stored = store.get_unfinished(&ep).await.unwrap().unwrap();
        assert_eq!(stored.sync_started_at, Some(from_millis(1_238)));
        assert!(stored.is_claimed());
    }
}

#[tokio::test]
async fn only_the_first_claim_wins() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("sov_map");
        let fresh = store
            .get_or_create_unfinished(&ep, from_millis(1_000), None)
            .await
            .unwrap();
        let mut first = fresh.clone();
        let mut second = fresh.clone();

        assert!(store.claim(&mut first, from_millis(1_100)).await.unwrap());
        assert_eq!(first.sync_started_at, Some(from_millis(1_100)));

        assert!(!store.claim(&mut second, from_millis(1_101)).await.unwrap());
        assert_eq!(second.sync_started_at, None);

        let stored = store.get_unfinished(&ep).await.unwrap().unwrap();
        assert_eq!(stored.sync_started_at, Some(from_millis(1_100)));
    }
}

#[tokio::test]
async fn finished_or_unknown_trackers_cannot_be_claimed() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("sov_map");
        let mut done = finished(store.as_ref(), &ep, 100, 150, SyncStatus::Finished).await;
        assert!(!store.claim(&mut done, from_millis(200)).await.unwrap());

        let mut stray = SyncTracker::new_unfinished(ep.clone(), from_millis(300), None).unwrap();
        let err = store.claim(&mut stray, from_millis(400)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "{err}");
    }
}

#[tokio::test]
async fn finishing_frees_the_endpoint_for_a_successor() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("server_status");
        let done = finished(store.as_ref(), &ep, 100, 150, SyncStatus::Finished).await;
        assert_eq!(done.sync_ended_at, Some(from_millis(150)));
        assert!(store.get_unfinished(&ep).await.unwrap().is_none());

        let next = store
            .get_or_create_unfinished(&ep, from_millis(400), None)
            .await
            .unwrap();
        assert_ne!(next.tracker_id, done.tracker_id);

        let latest = store.get_latest_finished(&ep).await.unwrap().unwrap();
        assert_eq!(latest.tracker_id, done.tracker_id);
        assert_eq!(latest.detail.as_deref(), Some("done"));
    }
}

#[tokio::test]
async fn finish_requires_an_outcome() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("server_status");
        let mut t = store
            .get_or_create_unfinished(&ep, from_millis(100), None)
            .await
            .unwrap();
        let err = store.finish(&mut t, from_millis(200)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
        assert!(!t.is_finished());
        assert!(store.get_unfinished(&ep).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn finished_trackers_cannot_be_changed() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("server_status");
        let mut done = finished(store.as_ref(), &ep, 100, 150, SyncStatus::Error).await;

        let err = store.finish(&mut done, from_millis(300)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "{err}");

        // A stale copy taken before finishing must not resurrect the tracker.
        let mut stale = done.clone();
        stale.sync_ended_at = None;
        let err = store.update(&stale).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "{err}");
    }
}

#[tokio::test]
async fn unknown_tracker_is_not_found() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ghost =
            SyncTracker::new_unfinished(Endpoint::from("alliance"), from_millis(1), None).unwrap();
        let err = store.update(&ghost).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "{err}");
    }
}

#[tokio::test]
async fn latest_finished_is_ordered_by_end_time() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("faction_war_stats");
        finished(store.as_ref(), &ep, 100, 110, SyncStatus::Finished).await;
        let last = finished(store.as_ref(), &ep, 200, 210, SyncStatus::Warning).await;
        finished(
            store.as_ref(),
            &Endpoint::from("other"),
            300,
            310,
            SyncStatus::Finished,
        )
        .await;

        let latest = store.get_latest_finished(&ep).await.unwrap().unwrap();
        assert_eq!(latest.tracker_id, last.tracker_id);
        assert_eq!(latest.status, SyncStatus::Warning);
    }
}

#[tokio::test]
async fn list_trackers_filters_and_pages_newest_first() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let ep = Endpoint::from("alliance");
        for i in 0..5 {
            let status = if i % 2 == 0 {
                SyncStatus::Finished
            } else {
                SyncStatus::Error
            };
            finished(store.as_ref(), &ep, i * 100, i * 100 + 10, status).await;
        }
        finished(
            store.as_ref(),
            &Endpoint::from("other"),
            50,
            60,
            SyncStatus::Finished,
        )
        .await;

        let all = store
            .list_trackers(&TrackerQuery {
                endpoint: Some(ep.clone()),
                ..TrackerQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].scheduled_at > w[1].scheduled_at));

        let errors = store
            .list_trackers(&TrackerQuery {
                endpoint: Some(ep.clone()),
                status: Some(SyncStatus::Error),
                ..TrackerQuery::default()
            })
            .await
            .unwrap();
        let scheduled: Vec<_> = errors.iter().map(|t| t.scheduled_at).collect();
        assert_eq!(scheduled, vec![from_millis(300), from_millis(100)]);

        let page = store
            .list_trackers(&TrackerQuery {
                limit: 2,
                offset: 1,
                ..TrackerQuery::default()
            })
            .await
            .unwrap();
        let scheduled: Vec<_> = page.iter().map(|t| t.scheduled_at).collect();
        assert_eq!(scheduled, vec![from_millis(300), from_millis(200)]);
    }
}
