//! In-memory storage backend.
//!
//! Keeps every key in an ordered map in RAM. Useful for testing and
//! short-lived indexers that don't need persistence.
//!
//! Snapshots share the map, and the first write after a snapshot copies it
//! once. While a reader keeps the latest snapshot published, every flush
//! pays for one copy of the key space. Fine for tests and small chains; use
//! the SQLite backend for a full index.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use satindex_core::error::IndexerError;
use satindex_core::store::{prefix_end, BatchOp, KvRead, KvStore, WriteBatch};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

fn scan(map: &Map, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let upper = match prefix_end(prefix) {
        Some(end) => Bound::Excluded(end),
        None => Bound::Unbounded,
    };
    map.range((Bound::Included(prefix.to_vec()), upper))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// In-memory key-value store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    map: RwLock<Arc<Map>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvRead for InMemoryStorage {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.map.read().unwrap().get(key).cloned())
    }

    async fn batch_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, IndexerError> {
        let map = self.map.read().unwrap();
        Ok(keys.iter().map(|k| map.get(k).cloned()).collect())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError> {
        Ok(scan(&self.map.read().unwrap(), prefix))
    }
}

#[async_trait]
impl KvStore for InMemoryStorage {
    async fn write(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        let count = batch.len();
        // One write lock for the whole batch: readers see all of it or none.
        let mut guard = self.map.write().unwrap();
        // Copies only while a snapshot still holds the current map.
        let map = Arc::make_mut(&mut guard);
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        tracing::trace!(ops = count, keys = map.len(), "memory batch applied");
        Ok(())
    }

    async fn snapshot(&self) -> Result<Box<dyn KvRead>, IndexerError> {
        Ok(Box::new(MemorySnapshot {
            map: Arc::clone(&self.map.read().unwrap()),
        }))
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// A frozen copy of an ordered key space.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    map: Arc<Map>,
}

impl MemorySnapshot {
    pub fn new(map: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self { map: Arc::new(map) }
    }
}

#[async_trait]
impl KvRead for MemorySnapshot {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.map.get(key).cloned())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError> {
        Ok(scan(&self.map, prefix))
    }
}
