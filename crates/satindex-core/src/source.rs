//! Chain data source contract.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::IndexerError;

/// Where raw blocks come from (a node's RPC, a block file reader, ...).
///
/// Failures are returned as errors, never panics, so the pipeline can log and
/// give up on a single height.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Height of the current chain tip.
    async fn get_chain_height(&self) -> Result<u64, IndexerError>;

    /// Canonical block hash at `height`.
    async fn get_block_hash(&self, height: u64) -> Result<String, IndexerError>;

    /// Consensus-encoded block bytes.
    async fn get_raw_block(&self, hash: &str) -> Result<Vec<u8>, IndexerError>;
}

// ─── In-memory source ────────────────────────────────────────────────────────

/// In-memory chain for tests and replay tools.
///
/// Heights are dense from 0; [`MemorySource::truncate`] followed by pushes
/// simulates a reorg.
#[derive(Default)]
pub struct MemorySource {
    blocks: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block at the next height.
    pub fn push(&self, hash: impl Into<String>, raw: Vec<u8>) {
        self.blocks.lock().unwrap().push((hash.into(), raw));
    }

    /// Drop every block at `height` and above.
    pub fn truncate(&self, height: u64) {
        self.blocks.lock().unwrap().truncate(height as usize);
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChainSource for MemorySource {
    async fn get_chain_height(&self) -> Result<u64, IndexerError> {
        let len = self.len() as u64;
        len.checked_sub(1)
            .ok_or_else(|| IndexerError::Rpc("chain is empty".into()))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, IndexerError> {
        self.blocks
            .lock()
            .unwrap()
            .get(height as usize)
            .map(|(hash, _)| hash.clone())
            .ok_or_else(|| IndexerError::Rpc(format!("no block at height {height}")))
    }

    async fn get_raw_block(&self, hash: &str) -> Result<Vec<u8>, IndexerError> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|(h, _)| h == hash)
            .map(|(_, raw)| raw.clone())
            .ok_or_else(|| IndexerError::Rpc(format!("unknown block {hash}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_serves_blocks() {
        let source = MemorySource::new();
        assert!(source.get_chain_height().await.is_err());

        source.push("a", vec![1]);
        source.push("b", vec![2]);
        assert_eq!(source.get_chain_height().await.unwrap(), 1);
        assert_eq!(source.get_block_hash(1).await.unwrap(), "b");
        assert_eq!(source.get_raw_block("a").await.unwrap(), vec![1]);
        assert!(source.get_block_hash(2).await.is_err());
    }

    #[tokio::test]
    async fn truncate_replaces_tip() {
        let source = MemorySource::new();
        source.push("a", vec![]);
        source.push("b", vec![]);
        source.truncate(1);
        source.push("b2", vec![]);
        assert_eq!(source.get_block_hash(1).await.unwrap(), "b2");
        assert!(source.get_raw_block("b").await.is_err());
    }
}
