//! End-to-end sync over real consensus-encoded blocks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version};
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::script::Builder;
use bitcoin::{
    transaction, Amount, Block, BlockHash, CompactTarget, OutPoint, PubkeyHash, ScriptBuf,
    Sequence, Transaction, TxIn, TxMerkleNode, TxOut, Witness,
};

use satindex_bitcoin::keys;
use satindex_bitcoin::reader::{read_block, read_stats, read_utxo};
use satindex_bitcoin::{IndexedBlock, IndexerBuilder, OutputHandler, ScriptType};
use satindex_core::error::IndexerError;
use satindex_core::indexer::IndexerState;
use satindex_core::range::{total_size, Range, RangeList};
use satindex_core::source::{ChainSource, MemorySource};
use satindex_core::store::{KvRead, KvStore};
use satindex_core::types::Network;
use satindex_storage::InMemoryStorage;

const SUBSIDY: u64 = 5_000_000_000;
const FEE: u64 = 1_000;

const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
const G2: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

// ─── Block construction ──────────────────────────────────────────────────────

fn pkh(n: u8) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([n; 20]))
}

fn multisig() -> ScriptBuf {
    let mut bytes = vec![0x51];
    for key in [G, G2] {
        bytes.push(33);
        bytes.extend(hex::decode(key).unwrap());
    }
    bytes.extend([0x52, 0xae]);
    ScriptBuf::from_bytes(bytes)
}

fn op_return() -> ScriptBuf {
    ScriptBuf::from_bytes(vec![0x6a, 0x04, b'o', b'r', b'd', b'!'])
}

fn out(value: u64, script: ScriptBuf) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey: script,
    }
}

fn coinbase(height: u64, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: Builder::new().push_int(height as i64 + 1).into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs,
    }
}

fn spend(inputs: &[OutPoint], outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|previous_output| TxIn {
                previous_output: *previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    }
}

fn block(prev: BlockHash, height: u64, txdata: Vec<Transaction>) -> Block {
    let mut block = Block {
        header: Header {
            version: Version::TWO,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_700_000_000 + height as u32,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: 0,
        },
        txdata,
    };
    block.header.merkle_root = block.compute_merkle_root().unwrap();
    block
}

fn first_out(tx: &Transaction, vout: u32) -> OutPoint {
    OutPoint {
        txid: tx.compute_txid(),
        vout,
    }
}

/// A five block regtest chain:
///
/// * 0, 1: plain coinbases
/// * 2: spends coinbase 0 into two outputs plus an empty OP_RETURN, paying a fee
/// * 3: bare multisig coinbase; spends the first output of block 2
/// * 4: plain coinbase
fn main_chain() -> Vec<Block> {
    let cb0 = coinbase(0, vec![out(SUBSIDY, pkh(1))]);
    let b0 = block(BlockHash::all_zeros(), 0, vec![cb0.clone()]);
    let b1 = block(b0.block_hash(), 1, vec![coinbase(1, vec![out(SUBSIDY, pkh(2))])]);

    let split = spend(
        &[first_out(&cb0, 0)],
        vec![
            out(3_000_000_000, pkh(4)),
            out(SUBSIDY - 3_000_000_000 - FEE, pkh(5)),
            out(0, op_return()),
        ],
    );
    let b2 = block(
        b1.block_hash(),
        2,
        vec![coinbase(2, vec![out(SUBSIDY + FEE, pkh(3))]), split.clone()],
    );

    let forward = spend(&[first_out(&split, 0)], vec![out(3_000_000_000, pkh(6))]);
    let b3 = block(
        b2.block_hash(),
        3,
        vec![coinbase(3, vec![out(SUBSIDY, multisig())]), forward],
    );
    let b4 = block(b3.block_hash(), 4, vec![coinbase(4, vec![out(SUBSIDY, pkh(1))])]);

    vec![b0, b1, b2, b3, b4]
}

/// Blocks 0..=2 of the main chain, then a three block branch where block 3
/// spends the second output of block 2 instead.
fn fork_chain() -> Vec<Block> {
    let mut chain = main_chain();
    chain.truncate(3);
    let split = chain[2].txdata[1].clone();

    let b3 = block(
        chain[2].block_hash(),
        3,
        vec![
            coinbase(3, vec![out(SUBSIDY, pkh(7))]),
            spend(&[first_out(&split, 1)], vec![out(SUBSIDY - 3_000_000_000 - FEE, pkh(8))]),
        ],
    );
    let b4 = block(b3.block_hash(), 4, vec![coinbase(4, vec![out(SUBSIDY, pkh(9))])]);
    let b5 = block(b4.block_hash(), 5, vec![coinbase(5, vec![out(SUBSIDY, pkh(9))])]);
    chain.extend([b3, b4, b5]);
    chain
}

fn source_of(blocks: &[Block]) -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    for b in blocks {
        source.push(b.block_hash().to_string(), serialize(b));
    }
    source
}

// ─── Store inspection ────────────────────────────────────────────────────────

type UtxoView = BTreeMap<String, (i64, RangeList, ScriptType, Vec<String>)>;

/// Durable UTXO set without the store-assigned ids.
async fn utxo_set(store: &InMemoryStorage) -> UtxoView {
    let mut view = BTreeMap::new();
    for (key, _) in store.scan_prefix(keys::UTXO).await.unwrap() {
        let outpoint = keys::decode_utxo(&key).unwrap();
        let utxo = read_utxo(store, &outpoint).await.unwrap().unwrap();
        view.insert(
            outpoint.to_string(),
            (utxo.value, utxo.ordinals, utxo.script_type, utxo.addresses),
        );
    }
    view
}

fn view_total(view: &UtxoView) -> i64 {
    view.values().map(|(_, ordinals, _, _)| total_size(ordinals)).sum()
}

#[derive(Default)]
struct Recorder {
    blocks: Mutex<Vec<u64>>,
    commits: Mutex<Vec<u64>>,
    reorgs: Mutex<Vec<u64>>,
}

#[async_trait]
impl OutputHandler for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn on_block(&self, block: &IndexedBlock) -> Result<(), IndexerError> {
        self.blocks.lock().unwrap().push(block.summary.height);
        Ok(())
    }

    async fn on_commit(&self, height: u64) -> Result<(), IndexerError> {
        self.commits.lock().unwrap().push(height);
        Ok(())
    }

    async fn on_reorg(&self, resume_height: u64) -> Result<(), IndexerError> {
        self.reorgs.lock().unwrap().push(resume_height);
        Ok(())
    }
}

/// Serves `inner` but fails every block hash lookup from `fail_at` on.
struct FailingSource {
    inner: Arc<MemorySource>,
    fail_at: u64,
}

#[async_trait]
impl ChainSource for FailingSource {
    async fn get_chain_height(&self) -> Result<u64, IndexerError> {
        self.inner.get_chain_height().await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, IndexerError> {
        if height >= self.fail_at {
            return Err(IndexerError::Rpc(format!("connection reset at {height}")));
        }
        self.inner.get_block_hash(height).await
    }

    async fn get_raw_block(&self, hash: &str) -> Result<Vec<u8>, IndexerError> {
        self.inner.get_raw_block(hash).await
    }
}

/// Serves `inner`, except that the first lookup of `stale_height` returns a
/// block from another branch, as a node switching tips mid-fetch would.
struct StaleOnceSource {
    inner: Arc<MemorySource>,
    stale_height: u64,
    stale: Block,
    served: AtomicBool,
}

#[async_trait]
impl ChainSource for StaleOnceSource {
    async fn get_chain_height(&self) -> Result<u64, IndexerError> {
        self.inner.get_chain_height().await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, IndexerError> {
        if height == self.stale_height && !self.served.swap(true, Ordering::SeqCst) {
            return Ok(self.stale.block_hash().to_string());
        }
        self.inner.get_block_hash(height).await
    }

    async fn get_raw_block(&self, hash: &str) -> Result<Vec<u8>, IndexerError> {
        if hash == self.stale.block_hash().to_string() {
            return Ok(serialize(&self.stale));
        }
        self.inner.get_raw_block(hash).await
    }
}

fn regtest() -> IndexerBuilder {
    IndexerBuilder::new()
        .network(Network::Regtest)
        .fetch_retries(0, 1)
}

async fn index(blocks: &[Block], builder: IndexerBuilder) -> Arc<InMemoryStorage> {
    let store = Arc::new(InMemoryStorage::new());
    let mut indexer = builder.build(source_of(blocks), store.clone()).await.unwrap();
    indexer.run().await.unwrap();
    store
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn syncs_to_tip_and_conserves_sats() {
    let chain = main_chain();
    let store = index(&chain, regtest()).await;

    let stats = read_stats(store.as_ref()).await.unwrap().unwrap();
    assert_eq!(stats.sync_height, Some(4));
    assert_eq!(stats.sync_block_hash, Some(chain[4].block_hash().to_string()));
    assert_eq!(stats.total_sats, 5 * SUBSIDY as i64);
    // Zero-value OP_RETURN is never stored; coinbase 0 and split:0 are spent.
    assert_eq!(stats.utxo_count, 6);
    assert_eq!(stats.all_utxo_count, 8);

    let view = utxo_set(store.as_ref()).await;
    assert_eq!(view.len(), 6);
    assert_eq!(view_total(&view), stats.total_sats);
}

#[tokio::test]
async fn first_sats_follow_the_first_input() {
    let chain = main_chain();
    let store = index(&chain, regtest()).await;

    let split = &chain[2].txdata[1];
    let forward = &chain[3].txdata[1];

    // Genesis sats went split:0 -> forward:0.
    let moved = read_utxo(store.as_ref(), &first_out(forward, 0)).await.unwrap().unwrap();
    assert_eq!(moved.ordinals, vec![Range::new(0, 3_000_000_000)]);

    let change = read_utxo(store.as_ref(), &first_out(split, 1)).await.unwrap().unwrap();
    assert_eq!(
        change.ordinals,
        vec![Range::new(3_000_000_000, (SUBSIDY - 3_000_000_000 - FEE) as i64)]
    );

    // The block 2 coinbase gets its own subsidy, then the fee.
    let reward = read_utxo(store.as_ref(), &first_out(&chain[2].txdata[0], 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        reward.ordinals,
        vec![
            Range::new(2 * SUBSIDY as i64, SUBSIDY as i64),
            Range::new((SUBSIDY - FEE) as i64, FEE as i64),
        ]
    );

    let summary = read_block(store.as_ref(), 2).await.unwrap().unwrap();
    assert_eq!(summary.ordinals, Range::new(2 * SUBSIDY as i64, SUBSIDY as i64));
    assert_eq!(summary.lost_sats, 0);
}

#[tokio::test]
async fn bare_multisig_is_indexed_per_key() {
    let chain = main_chain();
    let store = index(&chain, regtest()).await;

    let utxo = read_utxo(store.as_ref(), &first_out(&chain[3].txdata[0], 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(utxo.script_type, ScriptType::Multisig);
    assert_eq!(utxo.addresses.len(), 2);
    assert_eq!(utxo.address_refs.len(), 2);
    assert_ne!(utxo.address_refs[0], utxo.address_refs[1]);
}

#[tokio::test]
async fn buffered_and_per_block_flushes_agree() {
    let chain = main_chain();
    let per_block = index(&chain, regtest()).await;
    // One flush at the tip; every spend happens inside the buffer.
    let batched = index(&chain, regtest().keep_block_history(1).flush_interval(100)).await;

    assert_eq!(utxo_set(&per_block).await, utxo_set(&batched).await);

    // Only the newest block keeps an undo record.
    assert!(batched.get(&keys::change(3)).await.unwrap().is_none());
    assert!(batched.get(&keys::change(4)).await.unwrap().is_some());
}

#[tokio::test]
async fn stops_at_stop_height_and_resumes() {
    let chain = main_chain();
    let source = source_of(&chain);
    let store = Arc::new(InMemoryStorage::new());

    let mut first = regtest()
        .stop_height(2)
        .build(source.clone(), store.clone())
        .await
        .unwrap();
    let stats = first.run().await.unwrap();
    assert_eq!(stats.sync_height, Some(2));
    assert_eq!(stats.total_sats, 3 * SUBSIDY as i64);
    assert_eq!(first.state(), IndexerState::Stopped);
    assert!(read_block(store.as_ref(), 3).await.unwrap().is_none());

    // Reopen over the same store and finish the chain.
    let mut second = regtest().build(source, store.clone()).await.unwrap();
    second.run().await.unwrap();

    let direct = index(&chain, regtest()).await;
    assert_eq!(utxo_set(&store).await, utxo_set(&direct).await);
}

#[tokio::test]
async fn reorg_rolls_back_and_replays_the_branch() {
    let store = Arc::new(InMemoryStorage::new());
    let source = source_of(&main_chain());
    let recorder = Arc::new(Recorder::default());

    let mut indexer = regtest()
        .handler(recorder.clone())
        .build(source.clone(), store.clone())
        .await
        .unwrap();
    indexer.run().await.unwrap();

    // Replace blocks 3 and 4 with a longer branch.
    let fork = fork_chain();
    source.truncate(3);
    for b in &fork[3..] {
        source.push(b.block_hash().to_string(), serialize(b));
    }

    let stats = indexer.run().await.unwrap();
    assert_eq!(stats.sync_height, Some(5));
    assert_eq!(stats.reorgs_detected, vec![5]);
    assert_eq!(*recorder.reorgs.lock().unwrap(), vec![3]);
    assert_eq!(
        *recorder.blocks.lock().unwrap(),
        vec![0, 1, 2, 3, 4, 3, 4, 5]
    );

    let direct = index(&fork, regtest()).await;
    let direct_stats = read_stats(direct.as_ref()).await.unwrap().unwrap();
    assert_eq!(stats.total_sats, direct_stats.total_sats);
    assert_eq!(stats.utxo_count, direct_stats.utxo_count);
    assert_eq!(utxo_set(&store).await, utxo_set(&direct).await);

    // The reader was republished after the replay.
    let published = indexer.reader().stats().await.unwrap();
    assert_eq!(published.sync_height, Some(5));
}

#[tokio::test]
async fn reorg_deeper_than_history_is_fatal() {
    let store = Arc::new(InMemoryStorage::new());
    let source = source_of(&main_chain());

    let mut indexer = regtest()
        .keep_block_history(1)
        .build(source.clone(), store.clone())
        .await
        .unwrap();
    indexer.run().await.unwrap();
    let before = read_stats(store.as_ref()).await.unwrap();

    let fork = fork_chain();
    source.truncate(3);
    for b in &fork[3..] {
        source.push(b.block_hash().to_string(), serialize(b));
    }

    let err = indexer.run().await.unwrap_err();
    assert!(matches!(err, IndexerError::DeepReorg { .. }));
    assert!(err.is_fatal());
    assert_eq!(indexer.state(), IndexerState::Error);
    // Durable state is untouched.
    assert_eq!(read_stats(store.as_ref()).await.unwrap(), before);
}

#[tokio::test]
async fn schema_mismatch_refuses_to_open() {
    let store = Arc::new(InMemoryStorage::new());
    store
        .put(keys::SCHEMA.to_vec(), keys::encode_u64(keys::SCHEMA_VERSION + 1))
        .await
        .unwrap();

    let result = regtest().build(source_of(&main_chain()), store).await;
    assert!(matches!(
        result,
        Err(IndexerError::SchemaMismatch { found, expected })
            if found == keys::SCHEMA_VERSION + 1 && expected == keys::SCHEMA_VERSION
    ));
}

#[tokio::test]
async fn stop_request_returns_before_indexing() {
    let store = Arc::new(InMemoryStorage::new());
    let mut indexer = regtest()
        .build(source_of(&main_chain()), store.clone())
        .await
        .unwrap();
    indexer.stop_handle().store(true, Ordering::SeqCst);

    let stats = indexer.run().await.unwrap();
    assert_eq!(stats.sync_height, None);
    assert_eq!(indexer.state(), IndexerState::Stopped);
    assert!(read_stats(store.as_ref()).await.unwrap().is_none());
}

#[tokio::test]
async fn fetch_failure_flushes_buffered_blocks() {
    let store = Arc::new(InMemoryStorage::new());
    let source = Arc::new(FailingSource {
        inner: source_of(&main_chain()),
        fail_at: 3,
    });

    // Nothing would flush before the tip: blocks 0..=2 sit in the buffer.
    let mut indexer = regtest()
        .keep_block_history(1)
        .flush_interval(100)
        .build(source, store.clone())
        .await
        .unwrap();

    let err = indexer.run().await.unwrap_err();
    assert!(matches!(err, IndexerError::Rpc(_)));
    assert!(!err.is_fatal());
    assert_eq!(indexer.state(), IndexerState::Error);
    assert_eq!(indexer.buffered_blocks(), 0);

    let stats = read_stats(store.as_ref()).await.unwrap().unwrap();
    assert_eq!(stats.sync_height, Some(2));
    assert_eq!(stats.total_sats, 3 * SUBSIDY as i64);
    assert!(read_block(store.as_ref(), 2).await.unwrap().is_some());
}

#[tokio::test]
async fn large_buffer_forces_a_flush() {
    let chain = main_chain();
    let store = Arc::new(InMemoryStorage::new());
    let recorder = Arc::new(Recorder::default());

    let mut indexer = regtest()
        .keep_block_history(1)
        .flush_interval(100)
        .max_buffered_utxos(1)
        .handler(recorder.clone())
        .build(source_of(&chain), store.clone())
        .await
        .unwrap();
    indexer.run().await.unwrap();

    // Block 0 leaves one buffered output; every later block pushes past it.
    assert_eq!(*recorder.commits.lock().unwrap(), vec![1, 2, 3, 4]);

    let direct = index(&chain, regtest()).await;
    assert_eq!(utxo_set(&store).await, utxo_set(&direct).await);
}

#[tokio::test]
async fn stale_block_restarts_the_pipeline() {
    let chain = main_chain();
    let store = Arc::new(InMemoryStorage::new());
    let recorder = Arc::new(Recorder::default());
    let source = Arc::new(StaleOnceSource {
        inner: source_of(&chain),
        stale_height: 4,
        stale: fork_chain().swap_remove(4),
        served: AtomicBool::new(false),
    });

    let mut indexer = regtest()
        .handler(recorder.clone())
        .build(source.clone(), store.clone())
        .await
        .unwrap();
    let stats = indexer.run().await.unwrap();

    assert!(source.served.load(Ordering::SeqCst));
    assert_eq!(stats.sync_height, Some(4));
    assert!(stats.reorgs_detected.is_empty());
    assert!(recorder.reorgs.lock().unwrap().is_empty());
    assert_eq!(*recorder.blocks.lock().unwrap(), vec![0, 1, 2, 3, 4]);

    let direct = index(&chain, regtest()).await;
    assert_eq!(utxo_set(&store).await, utxo_set(&direct).await);
}

#[tokio::test]
async fn repeated_coinbase_keeps_only_the_newest_output() {
    // Same coinbase transaction in two blocks: the second overwrites the first.
    let cb = coinbase(0, vec![out(SUBSIDY, pkh(1))]);
    let b0 = block(BlockHash::all_zeros(), 0, vec![cb.clone()]);
    let b1 = block(b0.block_hash(), 1, vec![cb.clone()]);
    let chain = vec![b0, b1];

    let per_block = index(&chain, regtest()).await;
    let batched = index(&chain, regtest().keep_block_history(1).flush_interval(100)).await;

    for store in [&per_block, &batched] {
        let stats = read_stats(store.as_ref()).await.unwrap().unwrap();
        assert_eq!(stats.sync_height, Some(1));
        assert_eq!(stats.utxo_count, 1);
        assert_eq!(store.scan_prefix(keys::UTXO).await.unwrap().len(), 1);

        let utxo = read_utxo(store.as_ref(), &first_out(&cb, 0)).await.unwrap().unwrap();
        assert_eq!(utxo.ordinals, vec![Range::new(SUBSIDY as i64, SUBSIDY as i64)]);
    }
    assert_eq!(utxo_set(&per_block).await, utxo_set(&batched).await);
}
