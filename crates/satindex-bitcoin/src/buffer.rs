//! The in-memory delta between the store and the indexed chain.

use std::collections::HashMap;

use bitcoin::OutPoint;

use satindex_core::snapshot::{subtract_prefix, subtract_unchanged, Buffered};

use crate::types::{BlockValueInDB, Output, SpentOutput};

/// Unflushed index state.
///
/// `utxos` holds every output created since the last flush plus the durable
/// outputs loaded from the store to resolve inputs. `pending_deletes` holds
/// durable outputs spent since the last flush. `blocks` holds the summaries of
/// every buffered block, oldest first.
#[derive(Debug, Clone, Default)]
pub struct UtxoBuffer {
    pub utxos: HashMap<OutPoint, Output>,
    pub pending_deletes: Vec<SpentOutput>,
    pub blocks: Vec<BlockValueInDB>,
}

impl UtxoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Height of the oldest buffered block, if any.
    pub fn window_start(&self) -> Option<u64> {
        self.blocks.first().map(|b| b.height)
    }

    /// Height of the newest buffered block, if any.
    pub fn head(&self) -> Option<u64> {
        self.blocks.last().map(|b| b.height)
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty() && self.pending_deletes.is_empty() && self.blocks.is_empty()
    }

    /// Outputs that have not been written yet.
    pub fn new_outputs(&self) -> impl Iterator<Item = &Output> {
        self.utxos.values().filter(|o| !o.is_durable())
    }
}

impl Buffered for UtxoBuffer {
    fn clone_delta(&self) -> Self {
        self.clone()
    }

    fn subtract(&mut self, flushed: &Self) {
        subtract_unchanged(&mut self.utxos, &flushed.utxos);
        subtract_prefix(&mut self.pending_deletes, flushed.pending_deletes.len());
        subtract_prefix(&mut self.blocks, flushed.blocks.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScriptType;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;
    use satindex_core::range::Range;

    fn output(n: u8, height: u64) -> Output {
        Output {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([n; 32]),
                vout: 0,
            },
            height,
            value: 10,
            script_type: ScriptType::P2pkh,
            addresses: vec![format!("addr{n}")],
            address_refs: vec![],
            ordinals: vec![Range::new(n as i64 * 10, 10)],
            utxo_id: None,
        }
    }

    fn summary(height: u64) -> BlockValueInDB {
        BlockValueInDB {
            height,
            hash: format!("h{height}"),
            prev_hash: String::new(),
            timestamp: 0,
            tx_count: 1,
            input_sats: 0,
            output_sats: 0,
            ordinals: Range::new(0, 0),
            utxo_added: 0,
            utxo_removed: 0,
            lost_sats: 0,
        }
    }

    #[test]
    fn subtract_keeps_only_post_clone_changes() {
        let mut live = UtxoBuffer::new();
        for n in 1..=3 {
            let out = output(n, 5);
            live.utxos.insert(out.outpoint, out);
        }
        live.blocks.push(summary(5));
        live.pending_deletes.push(SpentOutput {
            output: output(9, 1),
            spent_height: 5,
        });

        let flushed = live.clone_delta();

        // After the clone: one output spent, one replaced, one created, one more block.
        let gone = output(1, 5).outpoint;
        live.utxos.remove(&gone);
        let mut replaced = output(2, 6);
        replaced.value = 99;
        live.utxos.insert(replaced.outpoint, replaced.clone());
        let fresh = output(4, 6);
        live.utxos.insert(fresh.outpoint, fresh.clone());
        live.blocks.push(summary(6));

        live.subtract(&flushed);

        assert_eq!(live.utxos.len(), 2);
        assert_eq!(live.utxos.get(&replaced.outpoint), Some(&replaced));
        assert_eq!(live.utxos.get(&fresh.outpoint), Some(&fresh));
        assert!(live.pending_deletes.is_empty());
        assert_eq!(live.blocks, vec![summary(6)]);
    }

    #[test]
    fn clone_is_independent() {
        let mut live = UtxoBuffer::new();
        let out = output(1, 0);
        live.utxos.insert(out.outpoint, out.clone());
        let snapshot = live.clone_delta();
        live.utxos.clear();
        assert_eq!(snapshot.utxos.len(), 1);
        assert_eq!(snapshot.window_start(), None);
    }

    #[test]
    fn subtract_of_full_clone_empties_buffer() {
        let mut live = UtxoBuffer::new();
        let out = output(3, 2);
        live.utxos.insert(out.outpoint, out);
        live.blocks.push(summary(2));
        let flushed = live.clone_delta();
        live.subtract(&flushed);
        assert!(live.is_empty());
    }
}
