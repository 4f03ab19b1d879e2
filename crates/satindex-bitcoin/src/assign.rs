//! Ordinal assignment.
//!
//! Walks a block in order and moves sat ranges from spent outputs to new
//! ones, first in first out. Each transaction's leftover pool is its fee and
//! joins the coinbase pool behind the block's newly minted range. Nothing is
//! read from storage here; every input must already be in the buffer.

use bitcoin::{OutPoint, Txid};

use satindex_core::error::IndexerError;
use satindex_core::range::{append, total_size, transfer, Range, RangeList};
use satindex_core::types::Network;

use crate::buffer::UtxoBuffer;
use crate::parse::{ParsedBlock, ParsedOutput};
use crate::subsidy::{check_claimed, SubsidyExceptions};
use crate::types::{BlockValueInDB, IndexedBlock, Output, ScriptType, SpentOutput};

/// Assign ordinals for `block` on top of `buffer`.
///
/// `last_sats` is the first sat the block may mint; it is advanced by the
/// minted amount on success. On error the buffer is left half-updated and the
/// caller must not continue.
pub fn assign_block(
    buffer: &mut UtxoBuffer,
    last_sats: &mut i64,
    block: &ParsedBlock,
    exceptions: &SubsidyExceptions,
    network: Network,
) -> Result<IndexedBlock, IndexerError> {
    let height = block.height;
    let (coinbase, txs) = block
        .txs
        .split_first()
        .ok_or_else(|| IndexerError::corruption(height, "block has no transactions"))?;

    // Spends of outputs older than this are spends of durable outputs.
    let window_start = buffer.window_start().unwrap_or(height);
    let first = *last_sats;

    let mut coinbase_pool: RangeList = vec![Range::new(first, 0)];
    let mut sats_in = 0i64;
    let mut sats_out = 0i64;
    let mut created = Vec::new();
    let mut spent = Vec::new();

    for tx in txs {
        let mut pool = RangeList::new();
        for outpoint in &tx.inputs {
            let prev = buffer.utxos.remove(outpoint).ok_or_else(|| {
                IndexerError::corruption(
                    height,
                    format!("input {outpoint} of {} not found in the UTXO index", tx.txid),
                )
            })?;
            sats_in += prev.value;
            append(&mut pool, &prev.ordinals);
            if prev.height < window_start {
                buffer.pending_deletes.push(SpentOutput {
                    output: prev.clone(),
                    spent_height: height,
                });
            }
            spent.push(prev);
        }

        for (vout, out) in tx.outputs.iter().enumerate() {
            let (taken, rest) =
                transfer(&pool, out.value).map_err(|e| IndexerError::from_range(height, e))?;
            pool = rest;
            sats_out += out.value;
            if let Some(output) = insert_output(buffer, height, tx.txid, vout as u32, out, taken) {
                created.push(output);
            }
        }

        // Whatever the outputs did not claim is the fee.
        append(&mut coinbase_pool, &pool);
    }

    let coinbase_out: i64 = coinbase.outputs.iter().map(|o| o.value).sum();
    let total_out = sats_out + coinbase_out;
    let reward = total_out - sats_in;
    let minted = reward.max(0);
    coinbase_pool[0].size = minted;

    let mut pool = coinbase_pool;
    for (vout, out) in coinbase.outputs.iter().enumerate() {
        let (taken, rest) =
            transfer(&pool, out.value).map_err(|e| IndexerError::from_range(height, e))?;
        pool = rest;
        if let Some(output) = insert_output(buffer, height, coinbase.txid, vout as u32, out, taken) {
            created.push(output);
        }
    }

    let lost_sats = total_size(&pool);
    if lost_sats != 0 {
        if !exceptions.contains(height) {
            return Err(IndexerError::corruption(
                height,
                format!("coinbase left {lost_sats} fee sats unclaimed"),
            ));
        }
        tracing::warn!(height, lost_sats, "Coinbase forfeits fee sats at listed exception height");
    } else {
        check_claimed(network, height, reward);
    }

    *last_sats = first + minted;

    let summary = BlockValueInDB {
        height,
        hash: block.hash.clone(),
        prev_hash: block.prev_hash.clone(),
        timestamp: block.timestamp,
        tx_count: block.txs.len() as u32,
        input_sats: sats_in,
        output_sats: total_out,
        ordinals: Range::new(first, minted),
        utxo_added: created.len() as u32,
        utxo_removed: spent.len() as u32,
        lost_sats,
    };
    buffer.blocks.push(summary.clone());

    tracing::debug!(
        height,
        txs = summary.tx_count,
        minted,
        added = summary.utxo_added,
        removed = summary.utxo_removed,
        "Block assigned"
    );

    Ok(IndexedBlock {
        summary,
        created,
        spent,
    })
}

fn insert_output(
    buffer: &mut UtxoBuffer,
    height: u64,
    txid: Txid,
    vout: u32,
    parsed: &ParsedOutput,
    ordinals: RangeList,
) -> Option<Output> {
    if parsed.script_type == ScriptType::OpReturn {
        if parsed.value == 0 {
            return None;
        }
        tracing::warn!(height, %txid, vout, value = parsed.value, "OP_RETURN output carries value");
    }

    let output = Output {
        outpoint: OutPoint { txid, vout },
        height,
        value: parsed.value,
        script_type: parsed.script_type,
        addresses: parsed.addresses.clone(),
        address_refs: Vec::new(),
        ordinals,
        utxo_id: None,
    };
    if let Some(old) = buffer.utxos.insert(output.outpoint, output.clone()) {
        tracing::warn!(
            height,
            outpoint = %output.outpoint,
            replaced_height = old.height,
            durable = old.is_durable(),
            "Duplicate outpoint replaces an unspent output"
        );
        // The stored record, its id binding and its address values must go.
        if old.is_durable() {
            buffer.pending_deletes.push(SpentOutput {
                output: old,
                spent_height: height,
            });
        }
    }
    Some(output)
}
