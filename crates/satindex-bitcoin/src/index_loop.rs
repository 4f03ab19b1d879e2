//! The main index loop — fetch, verify, assign, buffer, flush.
//!
//! # Catch-up
//! Blocks from the first height not yet indexed up to the tip (or
//! `stop_height`) stream in through the prefetch pipeline. Each one is checked
//! against the hash window, its inputs are loaded in one sorted batch, and its
//! ordinals are assigned into the buffer. The buffer is flushed every
//! `flush_interval` blocks, when it grows past `max_buffered_utxos`, and after
//! every block once within `keep_block_history` of the tip.
//!
//! # Live
//! With `follow` set, the loop polls the tip every `poll_interval_ms` and
//! indexes new blocks as they arrive.
//!
//! # Reorgs
//! A parent hash mismatch stops the pipeline and locates the fork. Unflushed
//! blocks are discarded, durable blocks above the fork are rolled back from
//! their change records, and ingestion resumes at
//! `min(fork, durable height) + 1`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use satindex_core::error::IndexerError;
use satindex_core::indexer::{IndexerConfig, IndexerState};
use satindex_core::prefetch::{PrefetchConfig, Prefetcher};
use satindex_core::reorg::ReorgDetector;
use satindex_core::snapshot::Buffered;
use satindex_core::source::ChainSource;
use satindex_core::store::{KvStore, WriteBatch};

use crate::assign::assign_block;
use crate::buffer::UtxoBuffer;
use crate::flush::flush;
use crate::handler::HandlerRegistry;
use crate::keys;
use crate::parse::{decode_block, ParsedBlock};
use crate::reader::{read_block, read_schema, read_stats, ReadHandle};
use crate::resolve::load_inputs;
use crate::rollback::rollback;
use crate::subsidy::SubsidyExceptions;
use crate::types::SyncStats;

/// Blocks between progress log lines while catching up.
const PROGRESS_EVERY: u64 = 1000;

/// How a pass over a height range ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Done,
    Reorged,
    Stopped,
}

/// The ingestion task.
pub struct IndexLoop<S, K>
where
    S: ChainSource + ?Sized + 'static,
    K: KvStore + ?Sized + 'static,
{
    config: IndexerConfig,
    source: Arc<S>,
    store: Arc<K>,
    handlers: HandlerRegistry,
    detector: ReorgDetector,
    exceptions: SubsidyExceptions,
    buffer: UtxoBuffer,
    stats: SyncStats,
    /// First sat the next block mints.
    last_sats: i64,
    /// Last indexed height, buffered or durable.
    head: Option<u64>,
    chain_tip: u64,
    since_flush: u64,
    reader: ReadHandle,
    stop: Arc<AtomicBool>,
    state: IndexerState,
}

impl<S, K> IndexLoop<S, K>
where
    S: ChainSource + ?Sized + 'static,
    K: KvStore + ?Sized + 'static,
{
    /// Open the index: check the schema, load stats, and seed the hash window
    /// from the stored block summaries.
    pub async fn open(
        config: IndexerConfig,
        source: Arc<S>,
        store: Arc<K>,
        handlers: HandlerRegistry,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let stats = Self::check_schema(store.as_ref()).await?;

        let mut this = Self {
            detector: ReorgDetector::new(config.keep_block_history),
            exceptions: SubsidyExceptions::new(config.network, &config.subsidy_exceptions),
            buffer: UtxoBuffer::new(),
            last_sats: stats.total_sats,
            head: stats.sync_height,
            chain_tip: stats.chain_tip,
            since_flush: 0,
            reader: ReadHandle::new(),
            stop: Arc::new(AtomicBool::new(false)),
            state: IndexerState::Idle,
            stats,
            config,
            source,
            store,
            handlers,
        };
        this.seed_window().await?;
        this.publish().await?;

        tracing::info!(
            id = %this.config.id,
            network = %this.config.network,
            next_height = this.next_height(),
            utxos = this.stats.utxo_count,
            "Index opened"
        );
        Ok(this)
    }

    async fn check_schema(store: &K) -> Result<SyncStats, IndexerError> {
        match read_schema(store).await? {
            Some(found) if found != keys::SCHEMA_VERSION => Err(IndexerError::SchemaMismatch {
                found,
                expected: keys::SCHEMA_VERSION,
            }),
            Some(_) => Ok(read_stats(store).await?.unwrap_or_default()),
            None => {
                if read_stats(store).await?.is_some() {
                    return Err(IndexerError::SchemaMismatch {
                        found: 0,
                        expected: keys::SCHEMA_VERSION,
                    });
                }
                let mut batch = WriteBatch::new();
                batch.put(keys::SCHEMA.to_vec(), keys::encode_u64(keys::SCHEMA_VERSION));
                store.write(batch).await?;
                tracing::info!(version = keys::SCHEMA_VERSION, "Initialized empty index");
                Ok(SyncStats::default())
            }
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// Handle for client reads, updated after every flush.
    pub fn reader(&self) -> ReadHandle {
        self.reader.clone()
    }

    /// Set to `true` to stop after the current block. Buffered blocks are
    /// flushed before `run` returns.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Durable stats.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Blocks indexed but not yet flushed.
    pub fn buffered_blocks(&self) -> usize {
        self.buffer.blocks.len()
    }

    fn next_height(&self) -> u64 {
        self.head.map_or(0, |h| h + 1)
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    // ─── Main loop ────────────────────────────────────────────────────────────

    /// Run until the tip (or `stop_height`) is reached, a stop is requested,
    /// or an error occurs. Returns the durable stats.
    pub async fn run(&mut self) -> Result<SyncStats, IndexerError> {
        self.state = IndexerState::Syncing;
        match self.sync().await {
            Ok(()) => {
                self.state = IndexerState::Stopped;
                tracing::info!(
                    height = ?self.stats.sync_height,
                    utxos = self.stats.utxo_count,
                    total_sats = self.stats.total_sats,
                    "Indexer stopped"
                );
                Ok(self.stats.clone())
            }
            Err(err) => {
                self.state = IndexerState::Error;
                tracing::error!(error = %err, fatal = err.is_fatal(), "Indexer stopped with error");
                Err(err)
            }
        }
    }

    async fn sync(&mut self) -> Result<(), IndexerError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if self.stop_requested() {
                return self.flush_buffer().await;
            }

            let tip = match self.source.get_chain_height().await {
                Ok(tip) => tip,
                Err(err) => {
                    self.flush_buffer().await?;
                    return Err(err);
                }
            };
            self.chain_tip = tip;

            let next = self.next_height();
            if let Some(stop) = self.config.stop_height {
                if next > stop {
                    tracing::info!(stop_height = stop, "Reached stop height");
                    return self.flush_buffer().await;
                }
            }

            let target = self.config.stop_height.map_or(tip, |stop| stop.min(tip));
            if next > target {
                self.flush_buffer().await?;
                if !self.config.follow {
                    tracing::info!(tip, "Caught up with chain tip");
                    return Ok(());
                }
                if self.state != IndexerState::Live {
                    tracing::info!(tip, poll_ms = self.config.poll_interval_ms, "Following chain tip");
                    self.state = IndexerState::Live;
                }
                tokio::time::sleep(poll).await;
                continue;
            }

            match self.sync_range(next, target).await? {
                Pass::Done | Pass::Reorged => continue,
                Pass::Stopped => return self.flush_buffer().await,
            }
        }
    }

    async fn sync_range(&mut self, from: u64, to: u64) -> Result<Pass, IndexerError> {
        tracing::info!(from, to, tip = self.chain_tip, "Syncing blocks");

        let network = self.config.network;
        let prefetch_config = PrefetchConfig {
            depth: self.config.prefetch_depth,
            retries: self.config.fetch_retries,
            initial_backoff: Duration::from_millis(self.config.fetch_backoff_ms),
        };
        let mut prefetch = Prefetcher::spawn(
            self.source.clone(),
            from..=to,
            prefetch_config,
            move |raw| decode_block(raw, network),
        );

        while let Some(item) = prefetch.recv().await {
            let block = match item {
                Ok(block) => block,
                Err(err) => {
                    prefetch.stop().await;
                    // Everything buffered is still consistent; keep it.
                    self.flush_buffer().await?;
                    return Err(err);
                }
            };

            if !self.detector.extends(block.height, &block.prev_hash) {
                let discarded = prefetch.stop().await;
                tracing::debug!(discarded, "Prefetch pipeline drained");
                self.recover(block.height).await?;
                return Ok(Pass::Reorged);
            }

            if let Err(err) = self.process(block).await {
                prefetch.stop().await;
                return Err(err);
            }

            if self.stop_requested() {
                prefetch.stop().await;
                return Ok(Pass::Stopped);
            }

            if self.should_flush() {
                if let Err(err) = self.flush_buffer().await {
                    prefetch.stop().await;
                    return Err(err);
                }
            }
        }

        Ok(Pass::Done)
    }

    async fn process(&mut self, block: ParsedBlock) -> Result<(), IndexerError> {
        load_inputs(self.store.as_ref(), &mut self.buffer, &block).await?;
        let indexed = assign_block(
            &mut self.buffer,
            &mut self.last_sats,
            &block,
            &self.exceptions,
            self.config.network,
        )?;
        self.handlers.dispatch_block(&indexed).await?;

        self.detector.record(block.height, block.hash);
        self.head = Some(block.height);
        self.since_flush += 1;

        if block.height % PROGRESS_EVERY == 0 {
            tracing::info!(
                height = block.height,
                tip = self.chain_tip,
                buffered_utxos = self.buffer.utxos.len(),
                "Sync progress"
            );
        }
        Ok(())
    }

    fn should_flush(&self) -> bool {
        let Some(head) = self.head else {
            return false;
        };
        self.since_flush >= self.config.flush_interval
            || self.buffer.utxos.len() > self.config.max_buffered_utxos
            || self.chain_tip.saturating_sub(head) < self.config.keep_block_history as u64
            || self.config.stop_height == Some(head)
    }

    // ─── Persistence ──────────────────────────────────────────────────────────

    /// Clone the buffer, persist the clone, then subtract it from the buffer.
    async fn flush_buffer(&mut self) -> Result<(), IndexerError> {
        if self.buffer.blocks.is_empty() {
            return Ok(());
        }
        let previous = self.state;
        self.state = IndexerState::Flushing;

        let flushed = self.buffer.clone_delta();
        let stats = flush(
            self.store.as_ref(),
            &flushed,
            &self.stats,
            self.chain_tip,
            self.config.keep_block_history,
            &self.handlers,
        )
        .await?;
        self.buffer.subtract(&flushed);
        self.stats = stats;
        self.since_flush = 0;
        self.publish().await?;

        self.state = previous;
        Ok(())
    }

    async fn publish(&self) -> Result<(), IndexerError> {
        let view = self.store.snapshot().await?;
        self.reader.publish(self.stats.clone(), view).await;
        Ok(())
    }

    async fn seed_window(&mut self) -> Result<(), IndexerError> {
        self.detector.reset();
        let Some(durable) = self.stats.sync_height else {
            return Ok(());
        };
        let from = (durable + 1).saturating_sub(self.config.keep_block_history as u64);
        for height in from..=durable {
            if let Some(block) = read_block(self.store.as_ref(), height).await? {
                self.detector.record(height, block.hash);
            }
        }
        tracing::debug!(from, to = durable, "Hash window seeded");
        Ok(())
    }

    // ─── Reorg recovery ───────────────────────────────────────────────────────

    async fn recover(&mut self, detected_at: u64) -> Result<(), IndexerError> {
        let previous = self.state;
        self.state = IndexerState::ReorgRecovery;

        let event = self
            .detector
            .find_fork(self.source.as_ref(), detected_at)
            .await?;
        if event.depth == 0 {
            // Only the fetched block was stale; everything indexed is canonical.
            tracing::info!(detected_at, "Stale block fetched, restarting pipeline");
            self.state = previous;
            return Ok(());
        }

        let discarded = self.buffer.blocks.len();
        self.buffer = UtxoBuffer::new();
        self.since_flush = 0;

        let mut stats = self.stats.clone();
        stats.reorgs_detected.push(detected_at);
        self.stats = match stats.sync_height {
            Some(durable) if event.fork_height < durable => {
                rollback(
                    self.store.as_ref(),
                    &stats,
                    event.fork_height,
                    self.config.keep_block_history,
                )
                .await?
            }
            _ => stats,
        };
        self.last_sats = self.stats.total_sats;
        self.head = self.stats.sync_height;
        self.seed_window().await?;

        let resume = self.next_height();
        self.handlers.dispatch_reorg(resume).await?;
        self.publish().await?;

        tracing::warn!(
            detected_at,
            fork_height = event.fork_height,
            depth = event.depth,
            discarded,
            resume,
            "Recovered from reorg"
        );
        self.state = previous;
        Ok(())
    }
}
