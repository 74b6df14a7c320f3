//! SQLite-backed tracker and versioned record store.
//!
//! Single WAL-mode file. Timestamps are stored as epoch milliseconds; an open validity interval
//! is stored as `i64::MAX` so point-in-time predicates stay plain integer comparisons.
//!
//! Usage:
//! ```ignore
//! let db = SqliteRefDb::new("/path/to/refsync.db").await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error as CoreError, Result as CoreResult};
use crate::models::{Endpoint, from_millis, to_millis};
use crate::store::traits::{StoreTxn, TrackerStore, VersionedStore};
use crate::tracker::models::{SyncStatus, SyncTracker, TrackerQuery};
use crate::versioned::models::VersionedRecord;
use crate::versioned::paging::ScanQuery;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const OPEN_MS: i64 = i64::MAX;

#[derive(Clone)]
pub struct SqliteRefDb {
    pool: SqlitePool,
}

impl SqliteRefDb {
    /// Create (or open) the store at `path`, creating parent directories and tables as needed.
    pub async fn new(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::backend("sqlite_ref_db", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| CoreError::backend("sqlite_ref_db", e))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| CoreError::backend("sqlite_ref_db", e))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CoreError::backend("sqlite_ref_db_schema", e))?;

        Ok(Self { pool })
    }

    /// Distinguishes a missing tracker from a finished one after a guarded update touched no rows.
    async fn unfinished_guard_failed(&self, tracker_id: Uuid) -> CoreError {
        let row = sqlx::query("SELECT sync_ended_at_ms FROM sync_trackers WHERE tracker_id = ?1")
            .bind(tracker_id.to_string())
            .fetch_optional(&self.pool)
            .await;
        match row {
            Ok(Some(_)) => CoreError::Conflict(format!("tracker {tracker_id} is finished")),
            Ok(None) => CoreError::NotFound(format!("tracker {tracker_id}")),
            Err(e) => db_err(e),
        }
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_trackers (
    tracker_id TEXT PRIMARY KEY,
    endpoint TEXT NOT NULL,
    scheduled_at_ms INTEGER NOT NULL,
    sync_started_at_ms INTEGER,
    sync_ended_at_ms INTEGER,
    status TEXT NOT NULL,
    detail TEXT,
    context TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS sync_trackers_unfinished_idx
    ON sync_trackers(endpoint) WHERE sync_ended_at_ms IS NULL;

CREATE INDEX IF NOT EXISTS sync_trackers_endpoint_idx
    ON sync_trackers(endpoint, sync_ended_at_ms);

CREATE TABLE IF NOT EXISTS versioned_records (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    payload TEXT NOT NULL,
    valid_from_ms INTEGER NOT NULL,
    valid_to_ms INTEGER NOT NULL,
    PRIMARY KEY (kind, key, valid_from_ms)
);

CREATE INDEX IF NOT EXISTS versioned_records_valid_to_idx
    ON versioned_records(kind, key, valid_to_ms);

CREATE UNIQUE INDEX IF NOT EXISTS versioned_records_open_idx
    ON versioned_records(kind, key) WHERE valid_to_ms = 9223372036854775807;
"#;

const TRACKER_COLUMNS: &str = "tracker_id, endpoint, scheduled_at_ms, sync_started_at_ms, \
     sync_ended_at_ms, status, detail, context";

const RECORD_COLUMNS: &str = "kind, key, payload, valid_from_ms, valid_to_ms";

// ── Helpers ──────────────────────────────────────────────────────

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::backend("sqlite_ref_db", e)
}

/// Unique-index violations are conflicts, everything else is a backend failure.
fn write_err(e: sqlx::Error) -> CoreError {
    let unique = e
        .as_database_error()
        .is_some_and(|d| d.is_unique_violation());
    if unique {
        CoreError::Conflict(e.to_string())
    } else {
        db_err(e)
    }
}

// ── TrackerStore impl ────────────────────────────────────────────

#[async_trait]
impl TrackerStore for SqliteRefDb {
    async fn get_unfinished(&self, endpoint: &Endpoint) -> CoreResult<Option<SyncTracker>> {
        let sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM sync_trackers
             WHERE endpoint = ?1 AND sync_ended_at_ms IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(endpoint.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_tracker).transpose()
    }

    async fn get_or_create_unfinished(
        &self,
        endpoint: &Endpoint,
        scheduled_at: DateTime<Utc>,
        context: Option<String>,
    ) -> CoreResult<SyncTracker> {
        let fresh = SyncTracker::new_unfinished(endpoint.clone(), scheduled_at, context)?;
        sqlx::query(
            "INSERT INTO sync_trackers (tracker_id, endpoint, scheduled_at_ms, status, context)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT DO NOTHING",
        )
        .bind(fresh.tracker_id.to_string())
        .bind(fresh.endpoint.as_str())
        .bind(to_millis(fresh.scheduled_at))
        .bind(fresh.status.as_str())
        .bind(&fresh.context)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        self.get_unfinished(endpoint)
            .await?
            .ok_or_else(|| CoreError::BackendMessage(format!("no unfinished tracker for {endpoint}")))
    }

    async fn claim(&self, tracker: &mut SyncTracker, at: DateTime<Utc>) -> CoreResult<bool> {
        let started_ms = to_millis(at);
        let res = sqlx::query(
            "UPDATE sync_trackers SET sync_started_at_ms = ?2
             WHERE tracker_id = ?1 AND sync_ended_at_ms IS NULL AND sync_started_at_ms IS NULL",
        )
        .bind(tracker.tracker_id.to_string())
        .bind(started_ms)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        if res.rows_affected() == 0 {
            // Finished or claimed by someone else both surface as a conflict here.
            return match self.unfinished_guard_failed(tracker.tracker_id).await {
                CoreError::NotFound(msg) => Err(CoreError::NotFound(msg)),
                CoreError::Conflict(_) => Ok(false),
                other => Err(other),
            };
        }
        tracker.sync_started_at = Some(from_millis(started_ms));
        Ok(true)
    }

    async fn update(&self, tracker: &SyncTracker) -> CoreResult<()> {
        if tracker.is_finished() {
            return Err(CoreError::InvalidInput(
                "use finish to end a tracker".to_string(),
            ));
        }
        let res = sqlx::query(
            "UPDATE sync_trackers SET
               scheduled_at_ms = ?2,
               sync_started_at_ms = ?3,
               status = ?4,
               detail = ?5,
               context = ?6
             WHERE tracker_id = ?1 AND sync_ended_at_ms IS NULL",
        )
        .bind(tracker.tracker_id.to_string())
        .bind(to_millis(tracker.scheduled_at))
        .bind(tracker.sync_started_at.map(to_millis))
        .bind(tracker.status.as_str())
        .bind(&tracker.detail)
        .bind(&tracker.context)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        if res.rows_affected() == 0 {
            return Err(self.unfinished_guard_failed(tracker.tracker_id).await);
        }
        Ok(())
    }

    async fn finish(&self, tracker: &mut SyncTracker, at: DateTime<Utc>) -> CoreResult<()> {
        let mut finished = tracker.clone();
        finished.mark_finished(at)?;

        let res = sqlx::query(
            "UPDATE sync_trackers SET
               sync_started_at_ms = ?2,
               sync_ended_at_ms = ?3,
               status = ?4,
               detail = ?5,
               context = ?6
             WHERE tracker_id = ?1 AND sync_ended_at_ms IS NULL",
        )
        .bind(finished.tracker_id.to_string())
        .bind(finished.sync_started_at.map(to_millis))
        .bind(finished.sync_ended_at.map(to_millis))
        .bind(finished.status.as_str())
        .bind(&finished.detail)
        .bind(&finished.context)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        if res.rows_affected() == 0 {
            return Err(self.unfinished_guard_failed(finished.tracker_id).await);
        }
        *tracker = finished;
        Ok(())
    }

    async fn get_latest_finished(&self, endpoint: &Endpoint) -> CoreResult<Option<SyncTracker>> {
        let sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM sync_trackers
             WHERE endpoint = ?1 AND sync_ended_at_ms IS NOT NULL
             ORDER BY sync_ended_at_ms DESC, scheduled_at_ms DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(endpoint.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_tracker).transpose()
    }

    async fn list_trackers(&self, query: &TrackerQuery) -> CoreResult<Vec<SyncTracker>> {
        let mut conditions = vec!["1 = 1".to_string()];
        let mut next_param = 1;

        if query.endpoint.is_some() {
            conditions.push(format!("endpoint = ?{next_param}"));
            next_param += 1;
        }
        if query.status.is_some() {
            conditions.push(format!("status = ?{next_param}"));
            next_param += 1;
        }

        let sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM sync_trackers WHERE {}
             ORDER BY scheduled_at_ms DESC
             LIMIT ?{next_param} OFFSET ?{}",
            conditions.join(" AND "),
            next_param + 1,
        );

        let mut q = sqlx::query(&sql);
        if let Some(endpoint) = &query.endpoint {
            q = q.bind(endpoint.as_str().to_string());
        }
        if let Some(status) = &query.status {
            q = q.bind(status.as_str());
        }
        q = q.bind(query.limit as i64);
        q = q.bind(query.offset as i64);

        let rows = q.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(row_to_tracker).collect()
    }
}

// ── VersionedStore impl ──────────────────────────────────────────

#[async_trait]
impl VersionedStore for SqliteRefDb {
    async fn get(
        &self,
        kind: &str,
        key: &str,
        as_of: DateTime<Utc>,
    ) -> CoreResult<Option<VersionedRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM versioned_records
             WHERE kind = ?1 AND key = ?2 AND valid_from_ms <= ?3 AND valid_to_ms > ?3
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(kind)
            .bind(key)
            .bind(to_millis(as_of))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn history(&self, kind: &str, key: &str) -> CoreResult<Vec<VersionedRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM versioned_records
             WHERE kind = ?1 AND key = ?2
             ORDER BY valid_from_ms ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(kind)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn page(
        &self,
        query: &ScanQuery,
        after: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<VersionedRecord>> {
        let mut conditions = vec![
            "kind = ?1".to_string(),
            "valid_from_ms <= ?2".to_string(),
            "valid_to_ms > ?2".to_string(),
        ];
        let mut next_param = 3;

        if after.is_some() {
            conditions.push(format!("key > ?{next_param}"));
            next_param += 1;
        }
        if query.key_prefix.is_some() {
            conditions.push(format!(
                "substr(key, 1, length(?{next_param})) = ?{next_param}"
            ));
            next_param += 1;
        }

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM versioned_records WHERE {}
             ORDER BY key ASC
             LIMIT ?{next_param}",
            conditions.join(" AND "),
        );

        let mut q = sqlx::query(&sql)
            .bind(query.kind.clone())
            .bind(to_millis(query.as_of));
        if let Some(cursor) = after {
            q = q.bind(cursor.to_string());
        }
        if let Some(prefix) = &query.key_prefix {
            q = q.bind(prefix.clone());
        }
        q = q.bind(limit as i64);

        let rows = q.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn begin(&self) -> CoreResult<Box<dyn StoreTxn>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(SqliteTxn { tx }))
    }
}

struct SqliteTxn {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTxn for SqliteTxn {
    async fn get_live(&mut self, kind: &str, key: &str) -> CoreResult<Option<VersionedRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM versioned_records
             WHERE kind = ?1 AND key = ?2 AND valid_to_ms = ?3"
        );
        let row = sqlx::query(&sql)
            .bind(kind)
            .bind(key)
            .bind(OPEN_MS)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn put(&mut self, record: &VersionedRecord) -> CoreResult<()> {
        let Some(from) = record.valid_from else {
            return Err(CoreError::InvalidInput(format!(
                "{}/{} has no valid_from",
                record.kind, record.key
            )));
        };
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| CoreError::backend("sqlite_ref_db_payload", e))?;
        sqlx::query(
            "INSERT INTO versioned_records (kind, key, payload, valid_from_ms, valid_to_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kind, key, valid_from_ms) DO UPDATE SET
               payload = excluded.payload,
               valid_to_ms = excluded.valid_to_ms",
        )
        .bind(&record.kind)
        .bind(&record.key)
        .bind(payload)
        .bind(to_millis(from))
        .bind(record.valid_to.map(to_millis).unwrap_or(OPEN_MS))
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.tx.commit().await.map_err(db_err)
    }
}

// ── Row mapping helpers ──────────────────────────────────────────

fn row_to_tracker(r: &sqlx::sqlite::SqliteRow) -> CoreResult<SyncTracker> {
    let tracker_id_str: String = r.get("tracker_id");
    let endpoint: String = r.get("endpoint");
    let scheduled_at_ms: i64 = r.get("scheduled_at_ms");
    let sync_started_at_ms: Option<i64> = r.get("sync_started_at_ms");
    let sync_ended_at_ms: Option<i64> = r.get("sync_ended_at_ms");
    let status_str: String = r.get("status");

    Ok(SyncTracker {
        tracker_id: Uuid::parse_str(&tracker_id_str)
            .map_err(|e| CoreError::backend("sqlite_ref_db_tracker_id", e))?,
        endpoint: Endpoint::from(endpoint),
        scheduled_at: from_millis(scheduled_at_ms),
        sync_started_at: sync_started_at_ms.map(from_millis),
        sync_ended_at: sync_ended_at_ms.map(from_millis),
        status: SyncStatus::from_str(&status_str)?,
        detail: r.get("detail"),
        context: r.get("context"),
    })
}

fn row_to_record(r: &sqlx::sqlite::SqliteRow) -> CoreResult<VersionedRecord> {
    let payload_str: String = r.get("payload");
    let valid_from_ms: i64 = r.get("valid_from_ms");
    let valid_to_ms: i64 = r.get("valid_to_ms");

    Ok(VersionedRecord {
        kind: r.get("kind"),
        key: r.get("key"),
        payload: serde_json::from_str(&payload_str)
            .map_err(|e| CoreError::backend("sqlite_ref_db_payload", e))?,
        valid_from: Some(from_millis(valid_from_ms)),
        valid_to: (valid_to_ms != OPEN_MS).then(|| from_millis(valid_to_ms)),
    })
}
