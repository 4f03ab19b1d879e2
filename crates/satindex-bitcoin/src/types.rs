//! Data model of the sat index.

use bitcoin::OutPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use satindex_core::range::{Range, RangeList};

// ─── Script types ────────────────────────────────────────────────────────────

/// Output script template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
    P2pk,
    Multisig,
    OpReturn,
    NonStandard,
}

impl ScriptType {
    /// Stable one-byte tag used inside storage keys.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::P2pkh => 1,
            Self::P2sh => 2,
            Self::P2wpkh => 3,
            Self::P2wsh => 4,
            Self::P2tr => 5,
            Self::P2pk => 6,
            Self::Multisig => 7,
            Self::OpReturn => 8,
            Self::NonStandard => 0,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::NonStandard,
            1 => Self::P2pkh,
            2 => Self::P2sh,
            3 => Self::P2wpkh,
            4 => Self::P2wsh,
            5 => Self::P2tr,
            6 => Self::P2pk,
            7 => Self::Multisig,
            8 => Self::OpReturn,
            _ => return None,
        })
    }
}

// ─── UTXOs ───────────────────────────────────────────────────────────────────

/// An unspent transaction output and the sats it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub outpoint: OutPoint,
    /// Height of the block that created the output.
    pub height: u64,
    pub value: i64,
    pub script_type: ScriptType,
    /// Address strings, one per key for bare multisig.
    pub addresses: Vec<String>,
    /// Address ids parallel to `addresses`; empty until the output is flushed.
    #[serde(default)]
    pub address_refs: Vec<u64>,
    pub ordinals: RangeList,
    /// Dense numeric id, assigned when the output becomes durable.
    #[serde(default)]
    pub utxo_id: Option<u64>,
}

impl Output {
    /// Returns `true` once the output has been written to the store.
    pub fn is_durable(&self) -> bool {
        self.utxo_id.is_some()
    }
}

/// A durable output spent inside the current buffering window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentOutput {
    pub output: Output,
    pub spent_height: u64,
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

/// Per-block summary, persisted verbatim under `b/<height>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockValueInDB {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    pub timestamp: u32,
    pub tx_count: u32,
    pub input_sats: i64,
    pub output_sats: i64,
    /// Sats first minted by this block (the subsidy actually claimed).
    pub ordinals: Range,
    pub utxo_added: u32,
    pub utxo_removed: u32,
    /// Fee sats that no coinbase output claimed.
    pub lost_sats: i64,
}

/// Result of assigning ordinals to one block.
#[derive(Debug, Clone)]
pub struct IndexedBlock {
    pub summary: BlockValueInDB,
    /// Outputs created by the block with their ordinals filled in. Zero-value
    /// `OP_RETURN` outputs are not included.
    pub created: Vec<Output>,
    /// Outputs consumed by the block.
    pub spent: Vec<Output>,
}

// ─── Sync stats ──────────────────────────────────────────────────────────────

/// Singleton persisted state under `m/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub chain_tip: u64,
    /// Highest durable height; `None` on an empty index.
    pub sync_height: Option<u64>,
    pub sync_block_hash: Option<String>,
    /// Heights at which reorgs were detected.
    pub reorgs_detected: Vec<u64>,
    /// Next address id to assign.
    pub address_count: u64,
    /// Live UTXOs in the store.
    pub utxo_count: u64,
    /// Next UTXO id to assign.
    pub all_utxo_count: u64,
    /// Sats minted so far; the next block's range starts here.
    pub total_sats: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncStats {
    /// First height not yet durable.
    pub fn next_height(&self) -> u64 {
        self.sync_height.map_or(0, |h| h + 1)
    }
}

// ─── Addresses ───────────────────────────────────────────────────────────────

/// Resolution state of an address string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressStatus {
    pub id: u64,
    pub op: AddressOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressOp {
    /// Already bound in the store.
    Existing,
    /// Minted in the current window; the binding must be written.
    Minted,
}

// ─── Undo log ────────────────────────────────────────────────────────────────

/// A UTXO a block wrote to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedUtxo {
    pub outpoint: OutPoint,
    pub utxo_id: u64,
    pub script_type: ScriptType,
    pub address_refs: Vec<u64>,
}

/// Everything needed to undo one flushed block, stored under `c/<height>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub height: u64,
    pub created: Vec<CreatedUtxo>,
    /// Full records of the durable outputs the block spent.
    pub spent: Vec<Output>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_tags_roundtrip() {
        for st in [
            ScriptType::P2pkh,
            ScriptType::P2sh,
            ScriptType::P2wpkh,
            ScriptType::P2wsh,
            ScriptType::P2tr,
            ScriptType::P2pk,
            ScriptType::Multisig,
            ScriptType::OpReturn,
            ScriptType::NonStandard,
        ] {
            assert_eq!(ScriptType::from_u8(st.as_u8()), Some(st));
        }
        assert_eq!(ScriptType::from_u8(200), None);
    }

    #[test]
    fn empty_stats_start_at_genesis() {
        let stats = SyncStats::default();
        assert_eq!(stats.next_height(), 0);
        let stats = SyncStats {
            sync_height: Some(9),
            ..Default::default()
        };
        assert_eq!(stats.next_height(), 10);
    }
}
