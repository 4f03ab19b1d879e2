//! Block decoding.
//!
//! Turns consensus-encoded block bytes into the flat shape the assignment
//! engine walks: transactions in block order, coinbase first, each output
//! classified and attributed to its address strings.

use bitcoin::consensus::encode::deserialize;
use bitcoin::{Address, Block, OutPoint, PublicKey, Script, Txid};

use satindex_core::error::IndexerError;
use satindex_core::prefetch::RawBlock;
use satindex_core::types::Network;

use crate::types::ScriptType;

/// A decoded block ready for assignment.
#[derive(Debug, Clone)]
pub struct ParsedBlock {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    pub timestamp: u32,
    /// Coinbase first; its `inputs` are empty.
    pub txs: Vec<ParsedTx>,
}

#[derive(Debug, Clone)]
pub struct ParsedTx {
    pub txid: Txid,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<ParsedOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutput {
    pub value: i64,
    pub script_type: ScriptType,
    pub addresses: Vec<String>,
}

impl ParsedBlock {
    /// Every outpoint spent by a non-coinbase transaction, in block order.
    pub fn spent_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.txs.iter().skip(1).flat_map(|tx| tx.inputs.iter())
    }
}

/// Map the indexer network onto the `bitcoin` crate's.
pub fn bitcoin_network(network: Network) -> bitcoin::Network {
    match network {
        Network::Mainnet => bitcoin::Network::Bitcoin,
        Network::Testnet => bitcoin::Network::Testnet,
        Network::Signet => bitcoin::Network::Signet,
        Network::Regtest => bitcoin::Network::Regtest,
    }
}

/// Decode a fetched block.
///
/// The hash the source reported must match the decoded header.
pub fn decode_block(raw: RawBlock, network: Network) -> Result<ParsedBlock, IndexerError> {
    let block: Block = deserialize(&raw.bytes).map_err(|e| {
        IndexerError::Decode(format!("block {} at height {}: {e}", raw.hash, raw.height))
    })?;

    let hash = block.block_hash().to_string();
    if hash != raw.hash {
        return Err(IndexerError::Decode(format!(
            "block at height {} hashes to {hash}, source reported {}",
            raw.height, raw.hash
        )));
    }

    match block.txdata.first() {
        Some(tx) if tx.is_coinbase() => {}
        _ => {
            return Err(IndexerError::Decode(format!(
                "block {hash} does not start with a coinbase"
            )))
        }
    }

    let network = bitcoin_network(network);
    let mut txs = Vec::with_capacity(block.txdata.len());
    for (index, tx) in block.txdata.iter().enumerate() {
        let inputs = if index == 0 {
            Vec::new()
        } else {
            tx.input.iter().map(|input| input.previous_output).collect()
        };

        let mut outputs = Vec::with_capacity(tx.output.len());
        for out in &tx.output {
            let value = i64::try_from(out.value.to_sat()).map_err(|_| {
                IndexerError::Decode(format!("output value {} out of range", out.value))
            })?;
            let (script_type, addresses) = classify(&out.script_pubkey, network);
            outputs.push(ParsedOutput {
                value,
                script_type,
                addresses,
            });
        }

        txs.push(ParsedTx {
            txid: tx.compute_txid(),
            inputs,
            outputs,
        });
    }

    Ok(ParsedBlock {
        height: raw.height,
        hash,
        prev_hash: block.header.prev_blockhash.to_string(),
        timestamp: block.header.time,
        txs,
    })
}

// ─── Script classification ───────────────────────────────────────────────────

const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;

/// Classify an output script and derive its address strings.
///
/// Bare public keys (P2PK and multisig members) are attributed to the P2PKH
/// address of the key. Anything unrecognized is keyed by the script hex.
pub fn classify(script: &Script, network: bitcoin::Network) -> (ScriptType, Vec<String>) {
    if script.is_op_return() {
        return (ScriptType::OpReturn, Vec::new());
    }

    let standard = if script.is_p2pkh() {
        Some(ScriptType::P2pkh)
    } else if script.is_p2sh() {
        Some(ScriptType::P2sh)
    } else if script.is_p2wpkh() {
        Some(ScriptType::P2wpkh)
    } else if script.is_p2wsh() {
        Some(ScriptType::P2wsh)
    } else if script.is_p2tr() {
        Some(ScriptType::P2tr)
    } else {
        None
    };
    if let Some(script_type) = standard {
        if let Ok(address) = Address::from_script(script, network) {
            return (script_type, vec![address.to_string()]);
        }
    }

    if let Some(key) = p2pk_key(script.as_bytes()) {
        return (ScriptType::P2pk, vec![key_address(&key, network)]);
    }

    if let Some(keys) = multisig_keys(script.as_bytes()) {
        let addresses = keys.iter().map(|key| key_address(key, network)).collect();
        return (ScriptType::Multisig, addresses);
    }

    let addresses = if script.is_empty() {
        Vec::new()
    } else {
        vec![hex::encode(script.as_bytes())]
    };
    (ScriptType::NonStandard, addresses)
}

fn key_address(key: &PublicKey, network: bitcoin::Network) -> String {
    Address::p2pkh(key.pubkey_hash(), network).to_string()
}

/// `<pubkey> OP_CHECKSIG` with a valid compressed or uncompressed key.
fn p2pk_key(bytes: &[u8]) -> Option<PublicKey> {
    let key = match bytes.len() {
        35 if bytes[0] == 33 && bytes[34] == OP_CHECKSIG => &bytes[1..34],
        67 if bytes[0] == 65 && bytes[66] == OP_CHECKSIG => &bytes[1..66],
        _ => return None,
    };
    PublicKey::from_slice(key).ok()
}

/// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG` with `1 <= m <= n <= 16`.
fn multisig_keys(bytes: &[u8]) -> Option<Vec<PublicKey>> {
    let (&first, rest) = bytes.split_first()?;
    let (&last, rest) = rest.split_last()?;
    let (&n_op, mut pushes) = rest.split_last()?;
    if last != OP_CHECKMULTISIG || !(OP_1..=OP_16).contains(&first) || !(OP_1..=OP_16).contains(&n_op) {
        return None;
    }
    let m = first - OP_1 + 1;
    let n = n_op - OP_1 + 1;
    if m > n {
        return None;
    }

    let mut keys = Vec::with_capacity(n as usize);
    while let Some((&len, tail)) = pushes.split_first() {
        let len = len as usize;
        if (len != 33 && len != 65) || tail.len() < len {
            return None;
        }
        keys.push(PublicKey::from_slice(&tail[..len]).ok()?);
        pushes = &tail[len..];
    }

    (keys.len() == n as usize).then_some(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{PubkeyHash, ScriptBuf};

    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const G2: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    fn key(hex_key: &str) -> Vec<u8> {
        hex::decode(hex_key).unwrap()
    }

    #[test]
    fn p2pkh_gets_its_address() {
        let script = ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([1; 20]));
        let (st, addrs) = classify(&script, bitcoin::Network::Bitcoin);
        assert_eq!(st, ScriptType::P2pkh);
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].starts_with('1'));
    }

    #[test]
    fn op_return_has_no_address() {
        let script = ScriptBuf::from_bytes(vec![0x6a, 0x01, 0x00]);
        assert_eq!(
            classify(&script, bitcoin::Network::Bitcoin),
            (ScriptType::OpReturn, vec![])
        );
    }

    #[test]
    fn p2pk_maps_to_key_hash_address() {
        let mut bytes = vec![33];
        bytes.extend(key(G));
        bytes.push(OP_CHECKSIG);
        let (st, addrs) = classify(&ScriptBuf::from_bytes(bytes), bitcoin::Network::Bitcoin);
        assert_eq!(st, ScriptType::P2pk);
        // Well-known P2PKH address of the generator point.
        assert_eq!(addrs, vec!["1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH".to_string()]);
    }

    #[test]
    fn bare_multisig_yields_one_address_per_key() {
        let mut bytes = vec![OP_1];
        for k in [G, G2] {
            bytes.push(33);
            bytes.extend(key(k));
        }
        bytes.push(OP_1 + 1);
        bytes.push(OP_CHECKMULTISIG);
        let (st, addrs) = classify(&ScriptBuf::from_bytes(bytes), bitcoin::Network::Bitcoin);
        assert_eq!(st, ScriptType::Multisig);
        assert_eq!(addrs.len(), 2);
        assert_ne!(addrs[0], addrs[1]);
    }

    #[test]
    fn multisig_with_wrong_key_count_is_nonstandard() {
        let mut bytes = vec![OP_1, 33];
        bytes.extend(key(G));
        bytes.push(OP_1 + 1); // claims two keys
        bytes.push(OP_CHECKMULTISIG);
        let (st, addrs) = classify(&ScriptBuf::from_bytes(bytes.clone()), bitcoin::Network::Bitcoin);
        assert_eq!(st, ScriptType::NonStandard);
        assert_eq!(addrs, vec![hex::encode(bytes)]);
    }

    #[test]
    fn empty_script_has_no_address() {
        let (st, addrs) = classify(&ScriptBuf::new(), bitcoin::Network::Regtest);
        assert_eq!(st, ScriptType::NonStandard);
        assert!(addrs.is_empty());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let raw = RawBlock {
            height: 0,
            hash: "00".into(),
            bytes: vec![1, 2, 3],
        };
        assert!(matches!(
            decode_block(raw, Network::Regtest),
            Err(IndexerError::Decode(_))
        ));
    }
}
