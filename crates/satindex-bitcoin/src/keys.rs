//! Storage key layout.
//!
//! Every key is a one-byte table tag, `/`, and a fixed-width body. Integers
//! are big-endian so prefix scans return them in numeric order.
//!
//! | prefix | key body                                         | value            |
//! |--------|--------------------------------------------------|------------------|
//! | `b/`   | height                                           | `BlockValueInDB` |
//! | `u/`   | txid ‖ vout                                      | `Output`         |
//! | `i/`   | utxo id                                          | `u/` key         |
//! | `v/`   | address id ‖ utxo id ‖ script type ‖ addr index  | value (i64)      |
//! | `a/`   | address string                                   | address id       |
//! | `d/`   | address id                                       | address string   |
//! | `c/`   | height                                           | `ChangeRecord`   |
//! | `m/`   | `stats`, `schema`                                | stats / version  |

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Txid};

use satindex_core::error::IndexerError;

use crate::types::ScriptType;

pub const BLOCK: &[u8] = b"b/";
pub const UTXO: &[u8] = b"u/";
pub const UTXO_ID: &[u8] = b"i/";
pub const ADDRESS_VALUE: &[u8] = b"v/";
pub const ADDRESS: &[u8] = b"a/";
pub const ADDRESS_ID: &[u8] = b"d/";
pub const CHANGE: &[u8] = b"c/";
pub const STATS: &[u8] = b"m/stats";
pub const SCHEMA: &[u8] = b"m/schema";

/// Bumped whenever the layout or a value encoding changes.
pub const SCHEMA_VERSION: u64 = 1;

fn with_prefix(prefix: &[u8], body: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + body.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(body);
    key
}

pub fn block(height: u64) -> Vec<u8> {
    with_prefix(BLOCK, &height.to_be_bytes())
}

pub fn utxo(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(UTXO.len() + 36);
    key.extend_from_slice(UTXO);
    key.extend_from_slice(&outpoint.txid.to_byte_array());
    key.extend_from_slice(&outpoint.vout.to_be_bytes());
    key
}

pub fn utxo_id(id: u64) -> Vec<u8> {
    with_prefix(UTXO_ID, &id.to_be_bytes())
}

pub fn address_value(
    address_id: u64,
    utxo_id: u64,
    script_type: ScriptType,
    address_index: u32,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(ADDRESS_VALUE.len() + 21);
    key.extend_from_slice(ADDRESS_VALUE);
    key.extend_from_slice(&address_id.to_be_bytes());
    key.extend_from_slice(&utxo_id.to_be_bytes());
    key.push(script_type.as_u8());
    key.extend_from_slice(&address_index.to_be_bytes());
    key
}

/// Prefix of every value record owned by `address_id`.
pub fn address_values_of(address_id: u64) -> Vec<u8> {
    with_prefix(ADDRESS_VALUE, &address_id.to_be_bytes())
}

pub fn address(address: &str) -> Vec<u8> {
    with_prefix(ADDRESS, address.as_bytes())
}

pub fn address_id(id: u64) -> Vec<u8> {
    with_prefix(ADDRESS_ID, &id.to_be_bytes())
}

pub fn change(height: u64) -> Vec<u8> {
    with_prefix(CHANGE, &height.to_be_bytes())
}

// ─── Decoding ────────────────────────────────────────────────────────────────

fn body<'a>(key: &'a [u8], prefix: &[u8], len: usize) -> Result<&'a [u8], IndexerError> {
    key.strip_prefix(prefix)
        .filter(|b| b.len() == len)
        .ok_or_else(|| IndexerError::Decode(format!("malformed key {}", hex::encode(key))))
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

/// Height encoded in a `b/` or `c/` key.
pub fn decode_height(key: &[u8]) -> Result<u64, IndexerError> {
    let prefix = &key[..key.len().min(2)];
    if prefix != BLOCK && prefix != CHANGE {
        return Err(IndexerError::Decode(format!(
            "not a height key: {}",
            hex::encode(key)
        )));
    }
    Ok(be_u64(body(key, prefix, 8)?))
}

/// Outpoint encoded in a `u/` key.
pub fn decode_utxo(key: &[u8]) -> Result<OutPoint, IndexerError> {
    let b = body(key, UTXO, 36)?;
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&b[..32]);
    let mut vout = [0u8; 4];
    vout.copy_from_slice(&b[32..]);
    Ok(OutPoint {
        txid: Txid::from_byte_array(txid),
        vout: u32::from_be_bytes(vout),
    })
}

/// Fields of a `v/` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressValueKey {
    pub address_id: u64,
    pub utxo_id: u64,
    pub script_type: ScriptType,
    pub address_index: u32,
}

pub fn decode_address_value(key: &[u8]) -> Result<AddressValueKey, IndexerError> {
    let b = body(key, ADDRESS_VALUE, 21)?;
    let script_type = ScriptType::from_u8(b[16])
        .ok_or_else(|| IndexerError::Decode(format!("unknown script type tag {}", b[16])))?;
    let mut index = [0u8; 4];
    index.copy_from_slice(&b[17..]);
    Ok(AddressValueKey {
        address_id: be_u64(&b[..8]),
        utxo_id: be_u64(&b[8..16]),
        script_type,
        address_index: u32::from_be_bytes(index),
    })
}

/// Integer values (address ids, schema version, address values).
pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_u64(value: &[u8]) -> Result<u64, IndexerError> {
    if value.len() != 8 {
        return Err(IndexerError::Decode(format!(
            "expected 8-byte integer, got {} bytes",
            value.len()
        )));
    }
    Ok(be_u64(value))
}
