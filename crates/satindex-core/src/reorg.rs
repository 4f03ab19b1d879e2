//! Reorg detection.
//!
//! Every fetched block is checked against the hash of the previously indexed
//! block. On a mismatch the detector walks back through its window, asking
//! the chain source for the canonical hash at each height, until the stored
//! and canonical hashes agree. That height is the fork point. A fork below
//! the window cannot be located and requires a full resync.

use crate::error::IndexerError;
use crate::source::ChainSource;
use crate::tracker::HashWindow;

/// Describes a located chain reorganization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorgEvent {
    /// Height of the block whose parent did not match.
    pub detected_at: u64,
    /// Highest height at which the indexed and canonical chains agree.
    pub fork_height: u64,
    /// Number of indexed blocks that are no longer canonical.
    pub depth: u64,
}

/// Detects chain reorganizations and locates the fork height.
pub struct ReorgDetector {
    window: HashWindow,
}

impl ReorgDetector {
    /// `keep_block_history` bounds how deep a reorg can be recovered from.
    pub fn new(keep_block_history: usize) -> Self {
        Self {
            window: HashWindow::new(keep_block_history),
        }
    }

    /// Returns `true` if a block at `height` with parent `prev_hash` extends
    /// the indexed chain. An empty window accepts anything.
    pub fn extends(&self, height: u64, prev_hash: &str) -> bool {
        match self.window.head() {
            None => true,
            Some((head, hash)) => head + 1 == height && hash == prev_hash,
        }
    }

    /// Record a block that has been accepted.
    pub fn record(&mut self, height: u64, hash: impl Into<String>) {
        self.window.push(height, hash);
    }

    /// Height and hash of the last accepted block.
    pub fn head(&self) -> Option<(u64, &str)> {
        self.window.head()
    }

    pub fn window(&self) -> &HashWindow {
        &self.window
    }

    /// Forget all retained hashes.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Walk back from the head until the stored hash matches the canonical one.
    ///
    /// `detected_at` is the height of the block that failed [`Self::extends`].
    pub async fn find_fork<S>(
        &self,
        source: &S,
        detected_at: u64,
    ) -> Result<ReorgEvent, IndexerError>
    where
        S: ChainSource + ?Sized,
    {
        let (head, _) = self.window.head().ok_or(IndexerError::DeepReorg {
            height: detected_at,
            retained: 0,
        })?;
        let oldest = self.window.oldest().unwrap_or(head);

        for height in (oldest..=head).rev() {
            let Some(stored) = self.window.get(height) else {
                continue;
            };
            let canonical = source.get_block_hash(height).await?;
            if stored == canonical {
                let depth = head - height;
                tracing::warn!(
                    detected_at,
                    fork_height = height,
                    depth,
                    "Reorg detected"
                );
                return Ok(ReorgEvent {
                    detected_at,
                    fork_height: height,
                    depth,
                });
            }
            tracing::debug!(height, stored, %canonical, "Block no longer canonical");
        }

        tracing::error!(
            detected_at,
            retained = self.window.len(),
            "No common ancestor within retained history"
        );
        Err(IndexerError::DeepReorg {
            height: detected_at,
            retained: self.window.len(),
        })
    }
}
