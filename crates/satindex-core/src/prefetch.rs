//! Block prefetch pipeline.
//!
//! A background task fetches and decodes blocks ahead of the consumer and
//! hands them over through a bounded channel, overlapping network and
//! deserialization latency with ordinal assignment. A failed fetch is pushed
//! as an error and ends the task.
//!
//! Stopping never deadlocks: the producer races every send against the stop
//! signal, and [`Prefetcher::stop`] drains whatever is still queued until the
//! producer has exited.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::IndexerError;
use crate::source::ChainSource;

/// Default queue depth between producer and consumer.
pub const DEFAULT_PREFETCH_DEPTH: usize = 12;

/// A block as fetched from the source, before decoding.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub height: u64,
    pub hash: String,
    pub bytes: Vec<u8>,
}

/// Producer settings.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Channel capacity.
    pub depth: usize,
    /// Attempts after the first failure before the error is surfaced.
    pub retries: u32,
    /// Delay before the first retry; doubled on every further attempt.
    pub initial_backoff: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_PREFETCH_DEPTH,
            retries: 5,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Handle to a running prefetch task.
pub struct Prefetcher<T> {
    rx: mpsc::Receiver<Result<T, IndexerError>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Prefetcher<T> {
    /// Start fetching `heights` in order, decoding each block with `decode`.
    pub fn spawn<S, F>(
        source: Arc<S>,
        heights: RangeInclusive<u64>,
        config: PrefetchConfig,
        decode: F,
    ) -> Self
    where
        S: ChainSource + ?Sized + 'static,
        F: Fn(RawBlock) -> Result<T, IndexerError> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(config.depth.max(1));
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            for height in heights {
                if *stopped.borrow() {
                    break;
                }

                let item = fetch_with_retries(source.as_ref(), height, &config, &mut stopped)
                    .await
                    .and_then(&decode);
                if *stopped.borrow() {
                    break;
                }
                let failed = item.is_err();
                if let Err(err) = &item {
                    tracing::error!(height, error = %err, "Failed to fetch block");
                }

                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            tracing::info!(height, "Block receiver disconnected");
                            break;
                        }
                    }
                }

                if failed {
                    break;
                }
            }
        });

        Self { rx, stop, task }
    }

    /// Next block in height order; `None` once the range is exhausted or the
    /// producer gave up.
    pub async fn recv(&mut self) -> Option<Result<T, IndexerError>> {
        self.rx.recv().await
    }

    /// Signal the producer to stop, drain anything still buffered, and wait
    /// for the task to exit. Returns the number of discarded blocks.
    pub async fn stop(mut self) -> usize {
        let _ = self.stop.send(true);
        let mut drained = 0;
        while self.rx.recv().await.is_some() {
            drained += 1;
        }
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "Prefetch task did not exit cleanly");
        }
        drained
    }
}

/// Backoff sleeps end early once `stopped` flips.
async fn fetch_with_retries<S>(
    source: &S,
    height: u64,
    config: &PrefetchConfig,
    stopped: &mut watch::Receiver<bool>,
) -> Result<RawBlock, IndexerError>
where
    S: ChainSource + ?Sized,
{
    let mut attempt = 0;
    loop {
        match fetch(source, height).await {
            Ok(block) => return Ok(block),
            Err(err) if attempt < config.retries => {
                let delay = config.initial_backoff * 2u32.saturating_pow(attempt);
                attempt += 1;
                tracing::warn!(
                    height,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Block fetch failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = stopped.changed() => {
                        return Err(IndexerError::Aborted {
                            reason: format!("stopped while retrying height {height}"),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn fetch<S>(source: &S, height: u64) -> Result<RawBlock, IndexerError>
where
    S: ChainSource + ?Sized,
{
    let hash = source.get_block_hash(height).await?;
    let bytes = source.get_raw_block(&hash).await?;
    Ok(RawBlock {
        height,
        hash,
        bytes,
    })
}
