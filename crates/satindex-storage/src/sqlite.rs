//! SQLite storage backend for SatIndex.
//!
//! Stores the whole key space in a single `kv` table keyed by raw bytes.
//! SQLite compares BLOB keys with `memcmp`, so `ORDER BY key` is byte
//! lexicographic order and prefix scans become range scans on the primary key.
//! Uses `sqlx` with WAL mode so snapshot readers never block the writer.
//!
//! # Usage
//! ```rust,no_run
//! use satindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./satindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use satindex_core::error::IndexerError;
use satindex_core::store::{prefix_end, BatchOp, KvRead, KvStore, WriteBatch};

use crate::memory::MemorySnapshot;

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed key-value store.
pub struct SqliteStorage {
    pool: SqlitePool,
    /// `sqlite::memory:` runs on a single connection, which cannot host a
    /// long-lived reader next to the writer.
    in_memory: bool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./satindex.db"`) or a full
    /// SQLite URL (`"sqlite:./satindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .map_err(storage_err)?;

        let storage = Self {
            pool,
            in_memory: false,
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self {
            pool,
            in_memory: true,
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create the key-value table and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        if !self.in_memory {
            // WAL mode — readers keep a consistent view while a batch commits
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key   BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Total number of stored keys.
    pub async fn key_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM kv")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── Queries shared by the store and its snapshots ───────────────────────────

async fn get_on(conn: &mut SqliteConnection, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
    let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
        .bind(key)
        .fetch_optional(conn)
        .await
        .map_err(storage_err)?;
    Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
}

async fn scan_on(
    conn: &mut SqliteConnection,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError> {
    let rows = match prefix_end(prefix) {
        Some(end) => {
            sqlx::query("SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key")
                .bind(prefix)
                .bind(end)
                .fetch_all(conn)
                .await
        }
        None => {
            sqlx::query("SELECT key, value FROM kv WHERE key >= ? ORDER BY key")
                .bind(prefix)
                .fetch_all(conn)
                .await
        }
    }
    .map_err(storage_err)?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get::<Vec<u8>, _>("key"), r.get::<Vec<u8>, _>("value")))
        .collect())
}

// ─── KvStore impl ────────────────────────────────────────────────────────────

#[async_trait]
impl KvRead for SqliteStorage {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        get_on(&mut conn, key).await
    }

    async fn batch_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, IndexerError> {
        // One read transaction so every slot comes from the same state.
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(get_on(&mut tx, key).await?);
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(values)
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        scan_on(&mut conn, prefix).await
    }
}

#[async_trait]
impl KvStore for SqliteStorage {
    async fn write(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        let count = batch.len();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    sqlx::query(
                        "INSERT INTO kv (key, value) VALUES (?, ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                }
                BatchOp::Delete { key } => {
                    sqlx::query("DELETE FROM kv WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
            }
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(ops = count, "sqlite batch committed");
        Ok(())
    }

    async fn snapshot(&self) -> Result<Box<dyn KvRead>, IndexerError> {
        if self.in_memory {
            let mut conn = self.pool.acquire().await.map_err(storage_err)?;
            let rows = scan_on(&mut conn, &[]).await?;
            let map: BTreeMap<_, _> = rows.into_iter().collect();
            return Ok(Box::new(MemorySnapshot::new(map)));
        }

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        // BEGIN is deferred; the first read pins the snapshot.
        sqlx::query("SELECT 1 FROM kv LIMIT 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        Ok(Box::new(SqliteSnapshot { tx: Mutex::new(tx) }))
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// A read transaction held open; dropping it rolls back and releases the
/// connection.
pub struct SqliteSnapshot {
    tx: Mutex<Transaction<'static, Sqlite>>,
}

#[async_trait]
impl KvRead for SqliteSnapshot {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        let mut tx = self.tx.lock().await;
        get_on(&mut tx, key).await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError> {
        let mut tx = self.tx.lock().await;
        scan_on(&mut tx, prefix).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
