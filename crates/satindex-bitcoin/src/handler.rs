//! Downstream output handlers + registry.
//!
//! Asset modules (inscriptions, runes, rare-sat classifiers) ride on the same
//! ingestion pass. They see every block once its ordinals are assigned, get a
//! chance to persist their own state before the core advances its durable
//! height, and are told where ingestion resumes after a reorg.

use async_trait::async_trait;
use std::sync::Arc;

use satindex_core::error::IndexerError;

use crate::types::IndexedBlock;

/// Trait for user-provided output handlers.
#[async_trait]
pub trait OutputHandler: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Called once per block after assignment, with the created outputs
    /// (ordinals filled in) and the spent outputs.
    async fn on_block(&self, block: &IndexedBlock) -> Result<(), IndexerError>;

    /// Called before the core persists `height`. The core only advances once
    /// every handler has committed.
    async fn on_commit(&self, _height: u64) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Called after a reorg; blocks from `resume_height` on will be replayed.
    async fn on_reorg(&self, _resume_height: u64) -> Result<(), IndexerError> {
        Ok(())
    }
}

fn wrap(handler: &dyn OutputHandler, err: IndexerError) -> IndexerError {
    match err {
        IndexerError::Handler { .. } => err,
        other => IndexerError::Handler {
            handler: handler.name().to_string(),
            reason: other.to_string(),
        },
    }
}

/// Registry of output handlers, called in registration order.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn OutputHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn register(&mut self, handler: Arc<dyn OutputHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch an assigned block to all handlers.
    pub async fn dispatch_block(&self, block: &IndexedBlock) -> Result<(), IndexerError> {
        for handler in &self.handlers {
            handler
                .on_block(block)
                .await
                .map_err(|e| wrap(handler.as_ref(), e))?;
        }
        Ok(())
    }

    /// Ask every handler to commit up to `height`.
    pub async fn commit(&self, height: u64) -> Result<(), IndexerError> {
        for handler in &self.handlers {
            handler
                .on_commit(height)
                .await
                .map_err(|e| wrap(handler.as_ref(), e))?;
        }
        Ok(())
    }

    /// Dispatch a reorg to all handlers.
    pub async fn dispatch_reorg(&self, resume_height: u64) -> Result<(), IndexerError> {
        for handler in &self.handlers {
            handler
                .on_reorg(resume_height)
                .await
                .map_err(|e| wrap(handler.as_ref(), e))?;
        }
        Ok(())
    }
}
