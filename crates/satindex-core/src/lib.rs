//! satindex-core — chain-agnostic foundation for the ordinal range indexer.
//!
//! # Architecture
//!
//! ```text
//! ChainSource ──► Prefetcher ──► IndexLoop (satindex-bitcoin)
//!                                   ├── range      (sat range algebra)
//!                                   ├── ReorgDetector / HashWindow
//!                                   ├── Buffered   (clone → flush → subtract)
//!                                   └── KvStore    (memory / SQLite)
//! ```

pub mod error;
pub mod indexer;
pub mod prefetch;
pub mod range;
pub mod reorg;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod tracker;
pub mod types;

pub use error::IndexerError;
pub use indexer::{IndexerConfig, IndexerState};
pub use prefetch::{PrefetchConfig, Prefetcher, RawBlock};
pub use range::{Range, RangeError, RangeList};
pub use reorg::{ReorgDetector, ReorgEvent};
pub use snapshot::Buffered;
pub use source::{ChainSource, MemorySource};
pub use store::{BatchOp, KvRead, KvStore, WriteBatch};
pub use tracker::HashWindow;
pub use types::Network;
