//! Fluent builder API for creating ordinal indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use satindex_bitcoin::IndexerBuilder;
//! use satindex_core::types::Network;
//!
//! let config = IndexerBuilder::new()
//!     .network(Network::Testnet)
//!     .stop_height(2_500_000)
//!     .flush_interval(5_000)
//!     .build_config();
//! ```

use std::sync::Arc;

use satindex_core::error::IndexerError;
use satindex_core::indexer::IndexerConfig;
use satindex_core::source::ChainSource;
use satindex_core::store::KvStore;
use satindex_core::types::Network;

use crate::handler::{HandlerRegistry, OutputHandler};
use crate::index_loop::IndexLoop;

/// Fluent builder for `IndexerConfig` and the handlers riding on the loop.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    handlers: HandlerRegistry,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config (e.g. one loaded from a file).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
        }
    }

    /// Set the indexer ID (shows up in logs).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the network. Also resets `keep_block_history` to the network's
    /// default, so call this first.
    pub fn network(mut self, network: Network) -> Self {
        self.config.network = network;
        self.config.keep_block_history = network.default_keep_block_history();
        self
    }

    /// Index up to and including `height`, then stop.
    pub fn stop_height(mut self, height: u64) -> Self {
        self.config.stop_height = Some(height);
        self
    }

    /// Keep following the tip once caught up.
    pub fn follow(mut self, follow: bool) -> Self {
        self.config.follow = follow;
        self
    }

    pub fn keep_block_history(mut self, blocks: usize) -> Self {
        self.config.keep_block_history = blocks;
        self
    }

    pub fn prefetch_depth(mut self, depth: usize) -> Self {
        self.config.prefetch_depth = depth;
        self
    }

    /// Set fetch retries and the initial backoff (milliseconds).
    pub fn fetch_retries(mut self, retries: u32, backoff_ms: u64) -> Self {
        self.config.fetch_retries = retries;
        self.config.fetch_backoff_ms = backoff_ms;
        self
    }

    /// Flush every N blocks while catching up.
    pub fn flush_interval(mut self, blocks: u64) -> Self {
        self.config.flush_interval = blocks;
        self
    }

    pub fn max_buffered_utxos(mut self, utxos: usize) -> Self {
        self.config.max_buffered_utxos = utxos;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Allow a coinbase at `height` to forfeit fee sats.
    pub fn subsidy_exception(mut self, height: u64) -> Self {
        self.config.subsidy_exceptions.push(height);
        self
    }

    /// Register an output handler.
    pub fn handler(mut self, handler: Arc<dyn OutputHandler>) -> Self {
        self.handlers.register(handler);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Open an index loop over `source` and `store`.
    pub async fn build<S, K>(
        self,
        source: Arc<S>,
        store: Arc<K>,
    ) -> Result<IndexLoop<S, K>, IndexerError>
    where
        S: ChainSource + ?Sized + 'static,
        K: KvStore + ?Sized + 'static,
    {
        IndexLoop::open(self.config, source, store, self.handlers).await
    }
}
