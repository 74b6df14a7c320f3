//! refsync core library: the generic engine that keeps external reference data in a
//! locally-owned, time-versioned store.
//!
//! Building blocks, leaf first:
//! - `throttle`: per-call-class token buckets plus a process-wide cooldown
//! - `versioned`: bitemporal records, evolve/commit discipline and cursor scans
//! - `tracker`: the persisted per-endpoint scheduling state machine
//! - `fetch`: fan-out/fan-in of many small calls to the external service
//! - `sync`: the orchestrator control loop, the adapter contract and the scheduler
//! - `store`: storage contracts with in-memory and SQLite backends

pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod o11y;
pub mod store;
pub mod sync;
pub mod throttle;
pub mod tracker;
pub mod versioned;

pub use client::{ApiRequest, ApiResponse, ClientError, ClientHandle, ResponseMeta, WorkerPool};
pub use config::{FetchConfig, SyncConfig, ThrottleConfig};
pub use error::{Error, Result};
pub use fetch::ConcurrentFetcher;
pub use models::{Clock, Endpoint, ManualClock, SystemClock};
pub use store::traits::{StoreTxn, TrackerStore, VersionedStore};
pub use sync::engine::SyncOrchestrator;
pub use sync::models::{FetchOutcome, ServerResult, SyncDisposition};
pub use sync::schedule::SyncScheduler;
pub use sync::traits::{EndpointAdapter, SyncHandler};
pub use throttle::RateLimiter;
pub use tracker::models::{SyncStatus, SyncTracker, TrackerQuery};
pub use versioned::models::{Candidate, RefData, VersionedRecord};
