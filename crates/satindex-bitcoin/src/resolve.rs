//! Batched, key-sorted lookups against the store.
//!
//! Both input loading and address resolution turn their lookups into storage
//! keys, sort them, and issue a single batch read in that order, so the
//! engine sees one forward sweep instead of scattered point reads.

use std::collections::{HashMap, HashSet};

use bitcoin::{OutPoint, Txid};

use satindex_core::error::IndexerError;
use satindex_core::store::KvRead;

use crate::buffer::UtxoBuffer;
use crate::keys;
use crate::parse::ParsedBlock;
use crate::types::{AddressOp, AddressStatus, Output};

/// Load every durable output `block` spends that is not already buffered.
///
/// The coinbase's own outpoints are looked up in the same batch: a coinbase
/// can repeat an earlier txid, and the stored output it replaces has to be
/// deleted at flush.
///
/// Returns the number of outputs loaded. Inputs the store does not know are
/// left for the assignment engine to report.
pub async fn load_inputs<R>(
    store: &R,
    buffer: &mut UtxoBuffer,
    block: &ParsedBlock,
) -> Result<usize, IndexerError>
where
    R: KvRead + ?Sized,
{
    let created_here: HashSet<Txid> = block.txs.iter().map(|tx| tx.txid).collect();

    let spent = block
        .spent_outpoints()
        .copied()
        .filter(|op| !created_here.contains(&op.txid));
    let coinbase = block.txs.first().into_iter().flat_map(|tx| {
        (0..tx.outputs.len() as u32).map(move |vout| OutPoint { txid: tx.txid, vout })
    });

    let mut wanted: Vec<(Vec<u8>, OutPoint)> = spent
        .chain(coinbase)
        .filter(|op| !buffer.utxos.contains_key(op))
        .map(|op| (keys::utxo(&op), op))
        .collect();
    if wanted.is_empty() {
        return Ok(0);
    }
    wanted.sort_by(|a, b| a.0.cmp(&b.0));
    wanted.dedup_by(|a, b| a.0 == b.0);

    let lookup: Vec<Vec<u8>> = wanted.iter().map(|(key, _)| key.clone()).collect();
    let values = store.batch_get(&lookup).await?;

    let mut loaded = 0;
    for ((_, outpoint), value) in wanted.into_iter().zip(values) {
        let Some(bytes) = value else {
            continue;
        };
        let output: Output = serde_json::from_slice(&bytes)?;
        buffer.utxos.insert(outpoint, output);
        loaded += 1;
    }

    tracing::trace!(height = block.height, loaded, "Inputs loaded");
    Ok(loaded)
}

// ─── Addresses ───────────────────────────────────────────────────────────────

/// Address ids for one flush.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    entries: HashMap<String, AddressStatus>,
}

impl AddressBook {
    pub fn get(&self, address: &str) -> Option<AddressStatus> {
        self.entries.get(address).copied()
    }

    /// Ids for `addresses`, in order.
    pub fn refs(&self, addresses: &[String]) -> Result<Vec<u64>, IndexerError> {
        addresses
            .iter()
            .map(|a| {
                self.get(a).map(|s| s.id).ok_or_else(|| {
                    IndexerError::Other(format!("address {a} was not resolved before flush"))
                })
            })
            .collect()
    }

    /// Bindings created in this window, sorted by id.
    pub fn minted(&self) -> Vec<(&str, u64)> {
        let mut minted: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, s)| s.op == AddressOp::Minted)
            .map(|(a, s)| (a.as_str(), s.id))
            .collect();
        minted.sort_by_key(|(_, id)| *id);
        minted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve the addresses of every output lacking address ids.
///
/// Unknown addresses are minted from `next_id`, which is advanced.
pub async fn resolve_addresses<'a, R, I>(
    store: &R,
    outputs: I,
    next_id: &mut u64,
) -> Result<AddressBook, IndexerError>
where
    R: KvRead + ?Sized,
    I: IntoIterator<Item = &'a Output>,
{
    let distinct: HashSet<&str> = outputs
        .into_iter()
        .filter(|o| o.address_refs.len() != o.addresses.len())
        .flat_map(|o| o.addresses.iter().map(String::as_str))
        .collect();
    if distinct.is_empty() {
        return Ok(AddressBook::default());
    }

    let mut wanted: Vec<(Vec<u8>, &str)> = distinct
        .into_iter()
        .map(|a| (keys::address(a), a))
        .collect();
    wanted.sort_by(|a, b| a.0.cmp(&b.0));

    let lookup: Vec<Vec<u8>> = wanted.iter().map(|(key, _)| key.clone()).collect();
    let values = store.batch_get(&lookup).await?;

    let mut book = AddressBook::default();
    let mut minted = 0usize;
    for ((_, address), value) in wanted.into_iter().zip(values) {
        let status = match value {
            Some(bytes) => AddressStatus {
                id: keys::decode_u64(&bytes)?,
                op: AddressOp::Existing,
            },
            None => {
                let id = *next_id;
                *next_id += 1;
                minted += 1;
                AddressStatus {
                    id,
                    op: AddressOp::Minted,
                }
            }
        };
        book.entries.insert(address.to_string(), status);
    }

    tracing::debug!(resolved = book.len(), minted, "Addresses resolved");
    Ok(book)
}
