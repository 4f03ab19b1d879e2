//! Undoing durable blocks after a reorg.

use chrono::Utc;

use satindex_core::error::IndexerError;
use satindex_core::store::{KvStore, WriteBatch};

use crate::flush::{delete_utxo, put_utxo};
use crate::keys;
use crate::reader::{read_block, read_change};
use crate::types::SyncStats;

/// Roll the store back so that `fork_height` is the durable head.
///
/// Blocks are undone newest first from their change records, all in one
/// atomic batch. A missing record means the reorg reaches below the retained
/// undo log. Address bindings are kept; ids stay dense and unique.
pub async fn rollback<K>(
    store: &K,
    stats: &SyncStats,
    fork_height: u64,
    keep_block_history: usize,
) -> Result<SyncStats, IndexerError>
where
    K: KvStore + ?Sized,
{
    let Some(durable) = stats.sync_height else {
        return Ok(stats.clone());
    };
    if fork_height >= durable {
        return Ok(stats.clone());
    }

    let mut next = stats.clone();
    let mut batch = WriteBatch::new();
    let mut restored = 0usize;
    let mut removed = 0usize;

    for height in ((fork_height + 1)..=durable).rev() {
        let record = read_change(store, height).await?.ok_or(IndexerError::DeepReorg {
            height,
            retained: keep_block_history,
        })?;

        for created in &record.created {
            delete_utxo(&mut batch, created);
            next.utxo_count = next.utxo_count.saturating_sub(1);
            removed += 1;
        }
        for output in &record.spent {
            put_utxo(&mut batch, output)?;
            next.utxo_count += 1;
            restored += 1;
        }
        batch.delete(keys::block(height));
        batch.delete(keys::change(height));
    }

    let first_undone = read_block(store, fork_height + 1).await?.ok_or_else(|| {
        IndexerError::corruption(fork_height + 1, "block summary missing during rollback")
    })?;
    let fork_block = read_block(store, fork_height).await?.ok_or_else(|| {
        IndexerError::corruption(fork_height, "fork block summary missing")
    })?;

    next.sync_height = Some(fork_height);
    next.sync_block_hash = Some(fork_block.hash);
    next.total_sats = first_undone.ordinals.start;
    next.updated_at = Some(Utc::now());
    batch.put(keys::STATS.to_vec(), serde_json::to_vec(&next)?);

    store.write(batch).await?;

    tracing::warn!(
        from = durable,
        to = fork_height,
        removed,
        restored,
        "Rolled back durable blocks"
    );
    Ok(next)
}
