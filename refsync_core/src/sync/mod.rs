//! The sync control loop.
//!
//! This module ties the pieces together:
//! - `EndpointAdapter` describes one feed (fetch, map, commit, carry-forward context)
//! - `SyncOrchestrator` drives one tracker through claim, fetch, batched commit and rescheduling
//! - `SyncScheduler` bootstraps trackers and runs due feeds concurrently on a timer

pub mod engine;
pub mod models;
pub mod schedule;
pub mod traits;
