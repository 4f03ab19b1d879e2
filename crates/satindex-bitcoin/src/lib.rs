//! satindex-bitcoin — ordinal range indexing over Bitcoin blocks.
//!
//! Blocks are decoded ([`parse`]), their inputs loaded ([`resolve`]), and
//! sat ranges assigned in first-in-first-out order ([`assign`]) into an
//! in-memory window ([`buffer`]) that is periodically persisted ([`flush`])
//! and can be undone after a reorg ([`rollback`]). [`index_loop`] drives it.

pub mod assign;
pub mod buffer;
pub mod builder;
pub mod flush;
pub mod handler;
pub mod index_loop;
pub mod keys;
pub mod parse;
pub mod reader;
pub mod resolve;
pub mod rollback;
pub mod subsidy;
pub mod types;

pub use builder::IndexerBuilder;
pub use handler::{HandlerRegistry, OutputHandler};
pub use index_loop::IndexLoop;
pub use reader::ReadHandle;
pub use types::{BlockValueInDB, IndexedBlock, Output, ScriptType, SyncStats};
