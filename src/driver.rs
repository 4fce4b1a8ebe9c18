//! Driver spawns and manages the ingest loop

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::IngestConfig;
use crate::provider::Provider;
use crate::store::RingWriter;
use crate::{IngestError, Result};

/// Counters published by the ingest loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestStats {
    /// Non-empty batches written to the store
    pub batches: u64,

    /// Readings written to the store
    pub readings_written: u64,

    /// Frames dropped because they failed to decode
    pub rejected_frames: u64,

    /// Provider failures other than bad frames
    pub provider_errors: u64,
}

/// Handle to a running ingest loop
///
/// Dropping the handle cancels the loop.
pub struct IngestHandle {
    stats: watch::Receiver<IngestStats>,
    cancel: CancellationToken,
    task: Option<JoinHandle<RingWriter>>,
}

impl IngestHandle {
    /// Latest published counters.
    pub fn stats(&self) -> IngestStats {
        *self.stats.borrow()
    }

    /// Receiver that is notified on every counter change.
    pub fn watch_stats(&self) -> watch::Receiver<IngestStats> {
        self.stats.clone()
    }

    /// Whether the loop has returned.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the loop and wait for it, getting the writer back.
    pub async fn stop(mut self) -> Result<RingWriter> {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the loop to end on its own, getting the writer back.
    pub async fn join(mut self) -> Result<RingWriter> {
        self.wait().await
    }

    async fn wait(&mut self) -> Result<RingWriter> {
        let task = self.task.take().ok_or(IngestError::closed("ingest loop"))?;
        Ok(task.await?)
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for IngestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestHandle")
            .field("stats", &self.stats())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Driver spawns and manages the ingest loop
///
/// The loop owns the provider and the store writer. It never waits on
/// readers: batches go straight into the ring store.
pub struct Driver;

impl Driver {
    /// Spawn the ingest loop for the given provider
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<P>(provider: P, writer: RingWriter, config: &IngestConfig) -> IngestHandle
    where
        P: Provider,
    {
        let (stats_tx, stats_rx) = watch::channel(IngestStats::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Self::ingest_task(
            provider,
            writer,
            stats_tx,
            cancel.clone(),
            config.max_consecutive_errors.max(1),
        ));

        IngestHandle { stats: stats_rx, cancel, task: Some(task) }
    }

    /// Ingest task - pulls batches from the provider into the store
    async fn ingest_task<P>(
        mut provider: P,
        mut writer: RingWriter,
        stats_tx: watch::Sender<IngestStats>,
        cancel: CancellationToken,
        max_errors: u32,
    ) -> RingWriter
    where
        P: Provider,
    {
        info!("Ingest loop started for provider '{}'", provider.name());
        let mut stats = IngestStats::default();
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Ingest loop cancelled");
                    break;
                }
                result = provider.next_batch() => result,
            };

            match result {
                Ok(Some(batch)) => {
                    error_count = 0;
                    if batch.is_empty() {
                        continue;
                    }

                    // Chunks never exceed capacity, so no write is rejected
                    for chunk in batch.chunks(writer.capacity()) {
                        stats.readings_written += writer.write(chunk) as u64;
                    }
                    stats.batches += 1;
                    trace!("Batch {}: {} readings", stats.batches, batch.len());
                    stats_tx.send_replace(stats);
                }
                Ok(None) => {
                    info!("Provider '{}' ended", provider.name());
                    break;
                }
                Err(IngestError::Format(e)) => {
                    // One bad frame; the provider has already moved past it
                    stats.rejected_frames += 1;
                    warn!("Dropped malformed frame: {}", e);
                    stats_tx.send_replace(stats);
                }
                Err(e) => {
                    error_count += 1;
                    stats.provider_errors += 1;
                    stats_tx.send_replace(stats);
                    error!("Provider error ({}/{}): {}", error_count, max_errors, e);

                    if error_count >= max_errors {
                        error!("Too many provider errors, shutting down");
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ... capped at 1.6s
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    debug!("Retrying provider in {:?}", backoff);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(
            "Ingest loop ended ({} readings in {} batches, {} rejected frames)",
            stats.readings_written, stats.batches, stats.rejected_frames
        );
        writer
    }
}
