//! Bitemporal reference records.
//!
//! Each (kind, key) pair owns a chain of versions with non-overlapping validity intervals; at most
//! one version is open (`valid_to == None`). Upstream changes close the live version and open a
//! successor at the same instant, unchanged data is never re-versioned, and entities that vanish
//! upstream are closed with no successor.

pub mod models;
pub mod ops;
pub mod paging;

pub use models::{Candidate, RefData, VersionedRecord, composite_key};
pub use ops::{CommitAction, evolve_or_add, retire_missing};
pub use paging::{LivePager, ScanQuery, scan_all, scan_all_typed};
