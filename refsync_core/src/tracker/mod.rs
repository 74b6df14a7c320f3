//! Per-endpoint sync trackers.
//!
//! A tracker records one synchronization attempt: when it becomes eligible, when it was claimed,
//! how it ended. Exactly one unfinished tracker exists per endpoint between runs; persistence
//! lives behind `store::traits::TrackerStore`.

pub mod models;
