//! satindex-storage — pluggable key-value backends for SatIndex.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement [`satindex_core::store::KvStore`]: ordered byte keys,
//! atomic write batches, and read-only snapshots.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryStorage, MemorySnapshot};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
