//! Persisting a buffer clone in one atomic batch.

use std::collections::BTreeMap;

use chrono::Utc;

use satindex_core::error::IndexerError;
use satindex_core::store::{KvStore, WriteBatch};

use crate::buffer::UtxoBuffer;
use crate::handler::HandlerRegistry;
use crate::keys;
use crate::resolve::resolve_addresses;
use crate::types::{ChangeRecord, CreatedUtxo, Output, SyncStats};

/// Lowest height that still gets an undo record, given the chain tip.
pub fn undo_floor(chain_tip: u64, keep_block_history: usize) -> u64 {
    (chain_tip + 1).saturating_sub(keep_block_history as u64)
}

/// Write a durable output: record, id binding, and one value record per address.
pub(crate) fn put_utxo(batch: &mut WriteBatch, output: &Output) -> Result<(), IndexerError> {
    let id = output.utxo_id.ok_or_else(|| {
        IndexerError::Other(format!("output {} has no utxo id", output.outpoint))
    })?;
    let key = keys::utxo(&output.outpoint);
    batch.put(key.clone(), serde_json::to_vec(output)?);
    batch.put(keys::utxo_id(id), key);
    for (index, address_id) in output.address_refs.iter().enumerate() {
        batch.put(
            keys::address_value(*address_id, id, output.script_type, index as u32),
            keys::encode_u64(output.value as u64),
        );
    }
    Ok(())
}

/// Delete everything [`put_utxo`] wrote for the output.
pub(crate) fn delete_utxo(batch: &mut WriteBatch, created: &CreatedUtxo) {
    batch.delete(keys::utxo(&created.outpoint));
    batch.delete(keys::utxo_id(created.utxo_id));
    for (index, address_id) in created.address_refs.iter().enumerate() {
        batch.delete(keys::address_value(
            *address_id,
            created.utxo_id,
            created.script_type,
            index as u32,
        ));
    }
}

fn created_entry(output: &Output, utxo_id: u64) -> CreatedUtxo {
    CreatedUtxo {
        outpoint: output.outpoint,
        utxo_id,
        script_type: output.script_type,
        address_refs: output.address_refs.clone(),
    }
}

/// Persist `flushed` (a clone of the live buffer) on top of `stats`.
///
/// Handlers commit first; the store write then advances the durable height.
/// Returns the stats as written. Nothing is written when the clone holds no
/// blocks.
pub async fn flush<K>(
    store: &K,
    flushed: &UtxoBuffer,
    stats: &SyncStats,
    chain_tip: u64,
    keep_block_history: usize,
    handlers: &HandlerRegistry,
) -> Result<SyncStats, IndexerError>
where
    K: KvStore + ?Sized,
{
    let Some(head) = flushed.blocks.last() else {
        return Ok(stats.clone());
    };
    let mut next = stats.clone();
    let mut batch = WriteBatch::new();

    let book = resolve_addresses(
        store,
        flushed
            .new_outputs()
            .chain(flushed.pending_deletes.iter().map(|p| &p.output)),
        &mut next.address_count,
    )
    .await?;

    // ── Blocks ────────────────────────────────────────────────────────────────
    for block in &flushed.blocks {
        batch.put(keys::block(block.height), serde_json::to_vec(block)?);
    }

    // ── Deletions ─────────────────────────────────────────────────────────────
    // Before the puts: a repeated coinbase outpoint deletes and rewrites `u/`.
    let mut spent: BTreeMap<u64, Vec<Output>> = BTreeMap::new();
    for pending in &flushed.pending_deletes {
        let mut output = pending.output.clone();
        if output.address_refs.len() != output.addresses.len() {
            output.address_refs = book.refs(&output.addresses)?;
        }
        match output.utxo_id {
            Some(id) => delete_utxo(&mut batch, &created_entry(&output, id)),
            // Never written; the heuristic tolerates it.
            None => batch.delete(keys::utxo(&output.outpoint)),
        }
        next.utxo_count = next.utxo_count.saturating_sub(1);
        spent.entry(pending.spent_height).or_default().push(output);
    }

    // ── New UTXOs ─────────────────────────────────────────────────────────────
    let mut fresh: Vec<&Output> = flushed.new_outputs().collect();
    fresh.sort_by_cached_key(|o| (o.height, keys::utxo(&o.outpoint)));

    let mut created: BTreeMap<u64, Vec<CreatedUtxo>> = BTreeMap::new();
    for output in fresh {
        let id = next.all_utxo_count;
        next.all_utxo_count += 1;
        next.utxo_count += 1;

        let mut record = output.clone();
        record.utxo_id = Some(id);
        record.address_refs = book.refs(&output.addresses)?;
        put_utxo(&mut batch, &record)?;
        created
            .entry(record.height)
            .or_default()
            .push(created_entry(&record, id));
    }

    // ── Address bindings ──────────────────────────────────────────────────────
    let minted = book.minted();
    for (address, id) in &minted {
        batch.put(keys::address(address), keys::encode_u64(*id));
        batch.put(keys::address_id(*id), address.as_bytes().to_vec());
    }

    // ── Undo log ──────────────────────────────────────────────────────────────
    let floor = undo_floor(chain_tip, keep_block_history);
    let mut records = 0;
    for block in flushed.blocks.iter().filter(|b| b.height >= floor) {
        let record = ChangeRecord {
            height: block.height,
            created: created.remove(&block.height).unwrap_or_default(),
            spent: spent.remove(&block.height).unwrap_or_default(),
        };
        batch.put(keys::change(block.height), serde_json::to_vec(&record)?);
        records += 1;
    }
    for (key, _) in store.scan_prefix(keys::CHANGE).await? {
        if keys::decode_height(&key)? < floor {
            batch.delete(key);
        }
    }

    // ── Stats ─────────────────────────────────────────────────────────────────
    next.chain_tip = chain_tip.max(head.height);
    next.sync_height = Some(head.height);
    next.sync_block_hash = Some(head.hash.clone());
    next.total_sats = head.ordinals.end();
    next.updated_at = Some(Utc::now());
    batch.put(keys::STATS.to_vec(), serde_json::to_vec(&next)?);

    handlers.commit(head.height).await?;

    let ops = batch.len();
    store.write(batch).await?;

    tracing::info!(
        height = head.height,
        blocks = flushed.blocks.len(),
        utxos = next.utxo_count,
        addresses = next.address_count,
        new_addresses = minted.len(),
        undo_records = records,
        ops,
        "Flushed"
    );
    Ok(next)
}
