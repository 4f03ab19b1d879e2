//! Error types for the satindex pipeline.

use thiserror::Error;

use crate::range::RangeError;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// The index no longer conserves satoshis or references data it never wrote.
    #[error("Index corruption at height {height}: {reason}")]
    Corruption { height: u64, reason: String },

    #[error("Reorg at height {height} is deeper than the {retained} retained blocks")]
    DeepReorg { height: u64, retained: usize },

    #[error("Schema version mismatch: store has {found}, expected {expected}")]
    SchemaMismatch { found: u64, expected: u64 },

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for a [`IndexerError::Corruption`] at `height`.
    pub fn corruption(height: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            height,
            reason: reason.into(),
        }
    }

    /// Wrap a range algebra violation observed while processing `height`.
    pub fn from_range(height: u64, err: RangeError) -> Self {
        Self::corruption(height, err.to_string())
    }

    /// Returns `true` if the process must stop without advancing state.
    ///
    /// Fetch failures are the only errors an operator can clear by simply
    /// restarting; everything else means the index cannot be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Rpc(_) | Self::Aborted { .. })
    }

    /// Returns `true` if the error is an index corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
