//! Key-value store contract.
//!
//! The indexer needs very little from its storage engine: point reads, batched
//! point reads, ordered prefix scans, a read-only snapshot, and one atomic
//! write batch per flush. Keys compare as raw bytes; the sorted-batch
//! resolution strategy depends on prefix scans returning keys in byte
//! lexicographic order.
//!
//! Implementations live in `satindex-storage` (`InMemoryStorage`,
//! `SqliteStorage`).

use async_trait::async_trait;

use crate::error::IndexerError;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered list of mutations applied atomically.
///
/// Batches are write-only: nothing in a batch is visible to reads until the
/// store has committed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Delete `key`. Deleting a key that does not exist is a no-op.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Read access to a store or to a snapshot of it.
#[async_trait]
pub trait KvRead: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError>;

    /// Read `keys` in the order given, returning one slot per key.
    ///
    /// Callers sort the keys first so the engine sees a sequential scan
    /// instead of random reads.
    async fn batch_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, IndexerError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// All entries whose key starts with `prefix`, in byte lexicographic order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError>;
}

/// A transactional store.
#[async_trait]
pub trait KvStore: KvRead {
    /// Apply every operation of `batch` atomically.
    async fn write(&self, batch: WriteBatch) -> Result<(), IndexerError>;

    /// A read-only view that does not observe later writes.
    async fn snapshot(&self) -> Result<Box<dyn KvRead>, IndexerError>;

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), IndexerError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch).await
    }

    async fn delete(&self, key: Vec<u8>) -> Result<(), IndexerError> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch).await
    }
}

/// The smallest key strictly greater than every key starting with `prefix`.
///
/// Returns `None` when no such key exists (empty prefix or all `0xff`).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
