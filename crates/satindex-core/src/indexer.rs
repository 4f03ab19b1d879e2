//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::prefetch::DEFAULT_PREFETCH_DEPTH;
use crate::types::Network;

/// Configuration for an indexer instance.
///
/// When deserialized, missing fields take the defaults of the configured
/// `network` (see [`IndexerConfig::for_network`]), not mainnet's.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ConfigFile")]
pub struct IndexerConfig {
    /// Unique name for this indexer (shows up in logs).
    pub id: String,
    /// Chain to index.
    pub network: Network,
    /// Last height to index. `None` = up to the tip.
    pub stop_height: Option<u64>,
    /// Keep polling for new blocks once the tip is reached.
    pub follow: bool,
    /// Recent block hashes retained for reorg detection; also bounds how many
    /// blocks below the tip keep undo records.
    pub keep_block_history: usize,
    /// Prefetch queue depth.
    pub prefetch_depth: usize,
    /// Retries per block before a fetch error is surfaced.
    pub fetch_retries: u32,
    /// Initial retry backoff (milliseconds).
    pub fetch_backoff_ms: u64,
    /// Flush every N blocks while catching up.
    pub flush_interval: u64,
    /// Flush early once this many UTXOs are buffered.
    pub max_buffered_utxos: usize,
    /// Tip polling interval in follow mode (milliseconds).
    pub poll_interval_ms: u64,
    /// Extra heights at which a coinbase may forfeit fee sats, on top of the
    /// built-in table for `network`.
    pub subsidy_exceptions: Vec<u64>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

impl IndexerConfig {
    /// Defaults tuned for `network`.
    pub fn for_network(network: Network) -> Self {
        Self {
            id: "satindex".into(),
            network,
            stop_height: None,
            follow: false,
            keep_block_history: network.default_keep_block_history(),
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
            fetch_retries: 5,
            fetch_backoff_ms: 500,
            flush_interval: 1000,
            max_buffered_utxos: 2_000_000,
            poll_interval_ms: 5000,
            subsidy_exceptions: Vec::new(),
        }
    }

    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, IndexerError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.keep_block_history == 0 {
            return Err(IndexerError::Other("keep_block_history must be at least 1".into()));
        }
        if self.prefetch_depth == 0 {
            return Err(IndexerError::Other("prefetch_depth must be at least 1".into()));
        }
        if self.flush_interval == 0 {
            return Err(IndexerError::Other("flush_interval must be at least 1".into()));
        }
        Ok(())
    }
}

/// Serialized shape of [`IndexerConfig`]; every field is optional.
#[derive(Deserialize)]
struct ConfigFile {
    id: Option<String>,
    network: Option<Network>,
    stop_height: Option<u64>,
    follow: Option<bool>,
    keep_block_history: Option<usize>,
    prefetch_depth: Option<usize>,
    fetch_retries: Option<u32>,
    fetch_backoff_ms: Option<u64>,
    flush_interval: Option<u64>,
    max_buffered_utxos: Option<usize>,
    poll_interval_ms: Option<u64>,
    subsidy_exceptions: Option<Vec<u64>>,
}

impl From<ConfigFile> for IndexerConfig {
    fn from(file: ConfigFile) -> Self {
        let defaults = Self::for_network(file.network.unwrap_or(Network::Mainnet));
        Self {
            id: file.id.unwrap_or(defaults.id),
            network: defaults.network,
            stop_height: file.stop_height,
            follow: file.follow.unwrap_or(defaults.follow),
            keep_block_history: file.keep_block_history.unwrap_or(defaults.keep_block_history),
            prefetch_depth: file.prefetch_depth.unwrap_or(defaults.prefetch_depth),
            fetch_retries: file.fetch_retries.unwrap_or(defaults.fetch_retries),
            fetch_backoff_ms: file.fetch_backoff_ms.unwrap_or(defaults.fetch_backoff_ms),
            flush_interval: file.flush_interval.unwrap_or(defaults.flush_interval),
            max_buffered_utxos: file.max_buffered_utxos.unwrap_or(defaults.max_buffered_utxos),
            poll_interval_ms: file.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            subsidy_exceptions: file.subsidy_exceptions.unwrap_or(defaults.subsidy_exceptions),
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Syncing historical blocks up to the current tip.
    Syncing,
    /// Following the chain tip.
    Live,
    /// Rolling back after a reorg.
    ReorgRecovery,
    /// Persisting the buffer.
    Flushing,
    /// Terminated.
    Stopped,
    /// Encountered an unrecoverable error.
    Error,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Live => write!(f, "live"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Flushing => write!(f, "flushing"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}
