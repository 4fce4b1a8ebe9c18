//! Push interface for an in-process sensor driver

use tokio::sync::mpsc;
use tracing::debug;

use crate::provider::Provider;
use crate::types::Reading;
use crate::{IngestError, Result};

/// Create a connected sink and provider.
///
/// The sensor driver keeps the [`SensorSink`] and pushes readings as it
/// samples them; the [`ChannelProvider`] goes to the ingest loop.
pub fn sensor_channel() -> (SensorSink, ChannelProvider) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SensorSink { tx }, ChannelProvider { rx })
}

/// Producer side handed to the sensor driver. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SensorSink {
    tx: mpsc::UnboundedSender<Vec<Reading>>,
}

impl SensorSink {
    /// Hand off one reading. Never blocks.
    pub fn push(&self, reading: Reading) -> Result<()> {
        self.push_batch(vec![reading])
    }

    /// Hand off a batch of readings. Never blocks.
    pub fn push_batch(&self, readings: Vec<Reading>) -> Result<()> {
        if readings.is_empty() {
            return Ok(());
        }
        self.tx.send(readings).map_err(|_| IngestError::closed("sensor channel"))
    }

    /// Whether the ingest side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Provider side of [`sensor_channel`].
#[derive(Debug)]
pub struct ChannelProvider {
    rx: mpsc::UnboundedReceiver<Vec<Reading>>,
}

#[async_trait::async_trait]
impl Provider for ChannelProvider {
    async fn next_batch(&mut self) -> Result<Option<Vec<Reading>>> {
        let Some(mut batch) = self.rx.recv().await else {
            debug!("All sensor sinks dropped");
            return Ok(None);
        };

        // Coalesce whatever else is already queued
        while let Ok(more) = self.rx.try_recv() {
            batch.extend(more);
        }
        Ok(Some(batch))
    }

    fn name(&self) -> &str {
        "sensor-channel"
    }
}
