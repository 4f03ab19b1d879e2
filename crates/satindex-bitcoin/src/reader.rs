//! Typed reads over the persisted layout, and the client read handle.

use std::sync::Arc;

use bitcoin::OutPoint;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use satindex_core::error::IndexerError;
use satindex_core::store::KvRead;

use crate::keys;
use crate::types::{BlockValueInDB, ChangeRecord, Output, SyncStats};

async fn read_json<R, T>(kv: &R, key: &[u8]) -> Result<Option<T>, IndexerError>
where
    R: KvRead + ?Sized,
    T: DeserializeOwned,
{
    match kv.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn read_stats<R: KvRead + ?Sized>(kv: &R) -> Result<Option<SyncStats>, IndexerError> {
    read_json(kv, keys::STATS).await
}

pub async fn read_schema<R: KvRead + ?Sized>(kv: &R) -> Result<Option<u64>, IndexerError> {
    kv.get(keys::SCHEMA)
        .await?
        .map(|bytes| keys::decode_u64(&bytes))
        .transpose()
}

pub async fn read_block<R: KvRead + ?Sized>(
    kv: &R,
    height: u64,
) -> Result<Option<BlockValueInDB>, IndexerError> {
    read_json(kv, &keys::block(height)).await
}

pub async fn read_utxo<R: KvRead + ?Sized>(
    kv: &R,
    outpoint: &OutPoint,
) -> Result<Option<Output>, IndexerError> {
    read_json(kv, &keys::utxo(outpoint)).await
}

pub async fn read_change<R: KvRead + ?Sized>(
    kv: &R,
    height: u64,
) -> Result<Option<ChangeRecord>, IndexerError> {
    read_json(kv, &keys::change(height)).await
}

/// Durable UTXOs held by `address`, as `(outpoint, value)`.
pub async fn read_address_utxos<R: KvRead + ?Sized>(
    kv: &R,
    address: &str,
) -> Result<Vec<(OutPoint, i64)>, IndexerError> {
    let Some(id) = kv.get(&keys::address(address)).await? else {
        return Ok(Vec::new());
    };
    let address_id = keys::decode_u64(&id)?;

    let mut utxos = Vec::new();
    for (key, value) in kv.scan_prefix(&keys::address_values_of(address_id)).await? {
        let fields = keys::decode_address_value(&key)?;
        let utxo_key = kv.get(&keys::utxo_id(fields.utxo_id)).await?.ok_or_else(|| {
            IndexerError::Storage(format!("dangling utxo id {}", fields.utxo_id))
        })?;
        utxos.push((keys::decode_utxo(&utxo_key)?, keys::decode_u64(&value)? as i64));
    }
    Ok(utxos)
}

// ─── Read handle ─────────────────────────────────────────────────────────────

struct Published {
    stats: SyncStats,
    view: Box<dyn KvRead>,
}

/// Cheap-to-clone handle serving reads from the last published flush.
///
/// Readers never touch the ingestion buffer: every publish swaps in the
/// stats and a store snapshot taken right after the flush committed.
#[derive(Clone, Default)]
pub struct ReadHandle {
    inner: Arc<RwLock<Option<Published>>>,
}

impl ReadHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published view.
    pub async fn publish(&self, stats: SyncStats, view: Box<dyn KvRead>) {
        *self.inner.write().await = Some(Published { stats, view });
    }

    /// Stats as of the last publish; `None` before the first one.
    pub async fn stats(&self) -> Option<SyncStats> {
        self.inner.read().await.as_ref().map(|p| p.stats.clone())
    }

    pub async fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, IndexerError> {
        match self.inner.read().await.as_ref() {
            Some(p) => read_utxo(p.view.as_ref(), outpoint).await,
            None => Ok(None),
        }
    }

    pub async fn block(&self, height: u64) -> Result<Option<BlockValueInDB>, IndexerError> {
        match self.inner.read().await.as_ref() {
            Some(p) => read_block(p.view.as_ref(), height).await,
            None => Ok(None),
        }
    }

    pub async fn address_utxos(&self, address: &str) -> Result<Vec<(OutPoint, i64)>, IndexerError> {
        match self.inner.read().await.as_ref() {
            Some(p) => read_address_utxos(p.view.as_ref(), address).await,
            None => Ok(Vec::new()),
        }
    }
}
