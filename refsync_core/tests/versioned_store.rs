use refsync_core::models::from_millis;
use refsync_core::store::traits::VersionedStore;
use refsync_core::store::{MemoryRefDb, SqliteRefDb};
use refsync_core::versioned::{
    Candidate, CommitAction, LivePager, ScanQuery, VersionedRecord, evolve_or_add, scan_all,
};
use refsync_core::Error;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn record(kind: &str, key: &str, v: i64) -> VersionedRecord {
    VersionedRecord::draft(kind, key, json!({ "v": v }))
}

async fn seed(store: &dyn VersionedStore, kind: &str, keys: &[String], at_ms: i64) {
    let mut txn = store.begin().await.unwrap();
    for k in keys {
        evolve_or_add(
            txn.as_mut(),
            from_millis(at_ms),
            Candidate::Upsert(record(kind, k, 1)),
        )
        .await
        .unwrap();
    }
    txn.commit().await.unwrap();
}

async fn backends() -> (Vec<Arc<dyn VersionedStore>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteRefDb::new(dir.path().join("refsync.db")).await.unwrap();
    (
        vec![Arc::new(MemoryRefDb::new()), Arc::new(sqlite)],
        dir,
    )
}

#[tokio::test]
async fn evolve_or_add_inserts_skips_and_evolves() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let mut txn = store.begin().await.unwrap();
        let a = evolve_or_add(txn.as_mut(), from_millis(100), Candidate::Upsert(record("w", "5", 1)))
            .await
            .unwrap();
        let b = evolve_or_add(txn.as_mut(), from_millis(150), Candidate::Upsert(record("w", "5", 1)))
            .await
            .unwrap();
        let c = evolve_or_add(txn.as_mut(), from_millis(200), Candidate::Upsert(record("w", "5", 2)))
            .await
            .unwrap();
        txn.commit().await.unwrap();
        assert_eq!(
            (a, b, c),
            (
                CommitAction::Inserted,
                CommitAction::Unchanged,
                CommitAction::Evolved
            )
        );

        let old = store.get("w", "5", from_millis(199)).await.unwrap().unwrap();
        assert_eq!(old.payload["v"], 1);
        assert_eq!(old.valid_to, Some(from_millis(200)));
        let new = store.get("w", "5", from_millis(200)).await.unwrap().unwrap();
        assert_eq!(new.payload["v"], 2);
        assert!(new.valid_to.is_none());
        assert!(store.get("w", "5", from_millis(99)).await.unwrap().is_none());
        assert_eq!(store.history("w", "5").await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn retirement_closes_without_successor() {
    let (stores, _dir) = backends().await;
    for store in stores {
        seed(store.as_ref(), "w", &["2".to_string()], 100).await;
        let live = store.get("w", "2", from_millis(100)).await.unwrap().unwrap();

        let mut txn = store.begin().await.unwrap();
        let action = evolve_or_add(
            txn.as_mut(),
            from_millis(300),
            Candidate::retire(live, from_millis(300)).unwrap(),
        )
        .await
        .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(action, CommitAction::Retired);
        assert!(store.get("w", "2", from_millis(300)).await.unwrap().is_none());
        assert!(store.get("w", "2", from_millis(299)).await.unwrap().is_some());
        let mut txn = store.begin().await.unwrap();
        assert!(txn.get_live("w", "2").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn uncommitted_transaction_rolls_back() {
    let (stores, _dir) = backends().await;
    for store in stores {
        {
            let mut txn = store.begin().await.unwrap();
            evolve_or_add(txn.as_mut(), from_millis(100), Candidate::Upsert(record("w", "1", 1)))
                .await
                .unwrap();
        }
        assert!(store.get("w", "1", from_millis(100)).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn second_open_version_is_rejected() {
    let (stores, _dir) = backends().await;
    for store in stores {
        seed(store.as_ref(), "w", &["1".to_string()], 100).await;
        let mut dup = record("w", "1", 2);
        dup.setup(from_millis(200));
        let mut txn = store.begin().await.unwrap();
        let err = txn.put(&dup).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "{err}");
    }
}

#[tokio::test]
async fn scan_of_empty_kind_terminates_immediately() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let mut pager =
            LivePager::new(store.as_ref(), ScanQuery::live("w", from_millis(0)), 10).unwrap();
        assert!(pager.next_page().await.unwrap().is_none());
        assert!(pager.next_page().await.unwrap().is_none());
    }
}

#[tokio::test]
async fn exactly_one_page_needs_a_trailing_empty_page() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let keys: Vec<String> = (0..10).map(|i| format!("{i:03}")).collect();
        seed(store.as_ref(), "w", &keys, 100).await;

        let mut pager =
            LivePager::new(store.as_ref(), ScanQuery::live("w", from_millis(100)), 10).unwrap();
        assert_eq!(pager.next_page().await.unwrap().unwrap().len(), 10);
        assert!(pager.next_page().await.unwrap().is_none());
    }
}

#[tokio::test]
async fn large_scan_returns_every_live_key_once() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let keys: Vec<String> = (0..1_234).map(|i| format!("{i:05}")).collect();
        seed(store.as_ref(), "w", &keys, 100).await;
        seed(store.as_ref(), "other", &keys[..50], 100).await;

        let all = scan_all(store.as_ref(), ScanQuery::live("w", from_millis(100)), 100)
            .await
            .unwrap();
        assert_eq!(all.len(), 1_234);
        let unique: HashSet<&str> = all.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(unique.len(), 1_234);
        assert!(all.windows(2).all(|w| w[0].key < w[1].key));

        let before = scan_all(store.as_ref(), ScanQuery::live("w", from_millis(99)), 100)
            .await
            .unwrap();
        assert!(before.is_empty());
    }
}

#[tokio::test]
async fn scan_respects_as_of_and_key_prefix() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let keys = vec![
            "99/1".to_string(),
            "99/2".to_string(),
            "991/1".to_string(),
            "100/1".to_string(),
        ];
        seed(store.as_ref(), "member", &keys, 100).await;
        let live = store.get("member", "99/2", from_millis(100)).await.unwrap().unwrap();
        let mut txn = store.begin().await.unwrap();
        evolve_or_add(
            txn.as_mut(),
            from_millis(200),
            Candidate::retire(live, from_millis(200)).unwrap(),
        )
        .await
        .unwrap();
        txn.commit().await.unwrap();

        let q = ScanQuery::live("member", from_millis(150)).with_key_prefix("99/");
        let at_150: Vec<String> = scan_all(store.as_ref(), q, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(at_150, vec!["99/1", "99/2"]);

        let q = ScanQuery::live("member", from_millis(250)).with_key_prefix("99/");
        let at_250 = scan_all(store.as_ref(), q, 1).await.unwrap();
        assert_eq!(at_250.len(), 1);
        assert_eq!(at_250[0].key, "99/1");
    }
}

#[tokio::test]
async fn zero_page_size_is_rejected() {
    let store = MemoryRefDb::new();
    assert!(LivePager::new(&store, ScanQuery::live("w", from_millis(0)), 0).is_err());
}
