//! Storage contracts and backends.
//!
//! `MemoryRefDb` serves tests and single-process experiments; `SqliteRefDb` is the durable
//! backend used by the server.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryRefDb;
pub use sqlite::SqliteRefDb;
