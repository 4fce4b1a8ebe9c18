//! Pipeline: ring store, ingest loop and optional link
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use phms::{Pipeline, PipelineConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> phms::Result<()> {
//! let config = PipelineConfig::from_file("phms.yaml")?;
//! let (pipeline, _outbound) = Pipeline::connect("10.0.0.7", &config).await?;
//!
//! let mut display = Box::pin(pipeline.subscribe_stream(Duration::from_millis(100)));
//! while let Some(drain) = display.next().await {
//!     for reading in &drain.readings {
//!         println!("{} spo2={:?}", reading.timestamp_ms, reading.spo2);
//!     }
//! }
//!
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use futures::Stream;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use crate::codec::tagged;
use crate::config::PipelineConfig;
use crate::driver::{Driver, IngestHandle, IngestStats};
use crate::provider::Provider;
use crate::providers::LinkProvider;
use crate::store::{Drain, ReadFrom, RingReader, RingStore};
use crate::transport::{ClientHandle, Communicator};
use crate::types::Reading;
use crate::{IngestError, Result};

/// A running ingest pipeline
///
/// Owns the ring store's writer through its ingest loop. Consumers register
/// with [`subscribe`](Self::subscribe) and drain at their own pace.
pub struct Pipeline {
    store: RingStore,
    ingest: IngestHandle,
    link: Option<Communicator>,
    max_frame_size: usize,
}

impl Pipeline {
    /// Start ingesting from an arbitrary provider.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<P: Provider>(provider: P, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let store = RingStore::new(config.store.capacity)?;
        let writer = store.take_writer()?;
        info!(
            "Starting pipeline from '{}' (capacity {})",
            provider.name(),
            config.store.capacity
        );

        let ingest = Driver::spawn(provider, writer, &config.ingest);
        Ok(Self { store, ingest, link: None, max_frame_size: config.link.max_frame_size })
    }

    /// Open a link to the sensor node at `address` and ingest what it sends.
    ///
    /// Returns the pipeline and a handle for sending frames to the node.
    pub async fn connect(address: &str, config: &PipelineConfig) -> Result<(Self, ClientHandle)> {
        config.validate()?;
        let mut link = Communicator::new(config.link.clone());
        link.open(address, config.ingest.max_connect_tries).await?;
        link.run()?;

        let provider = LinkProvider::new(
            link.server_handle(),
            config.ingest.wire_format,
            config.link.poll_interval(),
        );
        let client = link.client_handle();

        let mut pipeline = Self::start(provider, config)?;
        pipeline.link = Some(link);
        Ok((pipeline, client))
    }

    /// Register a consumer that starts with everything still resident.
    pub fn subscribe(&self) -> RingReader {
        self.store.register_reader()
    }

    /// Register a consumer at an explicit start point.
    pub fn subscribe_at(&self, from: ReadFrom) -> RingReader {
        self.store.register_reader_at(from)
    }

    /// Register an async consumer polled every `every`.
    pub fn subscribe_stream(&self, every: Duration) -> impl Stream<Item = Drain> + Send + 'static {
        self.store.register_reader().into_stream(every)
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> RingStore {
        self.store.clone()
    }

    /// Latest ingest counters.
    pub fn stats(&self) -> IngestStats {
        self.ingest.stats()
    }

    /// Ingest counters as a stream of updates.
    pub fn stats_stream(&self) -> impl Stream<Item = IngestStats> + Send + 'static {
        WatchStream::new(self.ingest.watch_stats())
    }

    /// Whether the ingest loop has ended.
    pub fn is_finished(&self) -> bool {
        self.ingest.is_finished()
    }

    /// Encode readings and queue them on the link.
    ///
    /// Returns the number of frames queued.
    pub fn send_readings(&self, readings: &[Reading]) -> Result<usize> {
        let link = self.link.as_ref().ok_or(IngestError::not_connected("pipeline link"))?;
        let frames = tagged::encode_chunked(readings, self.max_frame_size)?;
        let count = frames.len();
        for frame in frames {
            link.push(frame);
        }
        Ok(count)
    }

    /// Stop the link and the ingest loop.
    pub async fn shutdown(self) -> Result<IngestStats> {
        let Self { store, ingest, link, .. } = self;

        let link_result = match link {
            Some(mut link) => link.close().await,
            None => Ok(()),
        };

        let stats = ingest.watch_stats();
        ingest.stop().await?;
        link_result?;
        let stats = *stats.borrow();

        info!(
            "Pipeline shut down: {} readings written, {} readers attached",
            store.write_count(),
            store.reader_count()
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("store", &self.store)
            .field("ingest", &self.ingest)
            .field("link", &self.link)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::sensor_channel;
    use crate::test_utils::readings::sequence;

    #[tokio::test]
    async fn channel_pipeline_fans_out_to_readers() {
        let config = PipelineConfig::from_yaml("store:\n  capacity: 32\n").unwrap();
        let (sink, provider) = sensor_channel();
        let pipeline = Pipeline::start(provider, &config).unwrap();

        let mut persistence = pipeline.subscribe();
        let mut display = pipeline.subscribe_at(ReadFrom::Latest);

        sink.push_batch(sequence(0, 10)).unwrap();
        drop(sink);
        while !pipeline.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(persistence.drain().len(), 10);
        assert_eq!(display.drain().len(), 10);
        assert_eq!(pipeline.stats().readings_written, 10);

        let stats = pipeline.shutdown().await.unwrap();
        assert_eq!(stats.batches, 1);
    }

    #[tokio::test]
    async fn send_without_link_is_rejected() {
        let (_sink, provider) = sensor_channel();
        let pipeline = Pipeline::start(provider, &PipelineConfig::default()).unwrap();

        let err = pipeline.send_readings(&sequence(0, 1)).unwrap_err();
        assert!(matches!(err, IngestError::NotConnected { .. }));
        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let (_sink, provider) = sensor_channel();
        let mut config = PipelineConfig::default();
        config.store.capacity = 0;

        assert!(matches!(Pipeline::start(provider, &config), Err(IngestError::Config { .. })));
    }
}
