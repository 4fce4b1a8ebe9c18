//! Ingest core for a pilot health monitoring system.
//!
//! PHMS receives biometric readings (optical, oxygen saturation, heart rate,
//! temperature) from a remote sensor node, decodes them and fans them out to
//! independent consumers without ever blocking ingest on a slow consumer.
//!
//! # Features
//!
//! - **Transport**: client/server link roles with retrying open, accept
//!   timeouts and cooperative shutdown
//! - **Codec**: a tagged, self-describing reading format plus the compact
//!   device-telemetry variant
//! - **Ring Store**: fixed-capacity history with one writer and any number of
//!   readers, each with its own cursor
//! - **Ingest Loop**: drains a provider into the store and publishes counters
//!
//! # Quick Start
//!
//! ```rust
//! use phms::providers::sensor_channel;
//! use phms::types::{Field, Reading, SourceType};
//! use phms::{Pipeline, PipelineConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> phms::Result<()> {
//! let (sink, provider) = sensor_channel();
//! let pipeline = Pipeline::start(provider, &PipelineConfig::default())?;
//! let mut display = pipeline.subscribe();
//!
//! sink.push(Reading::new(1_000, SourceType::Max30100).with(Field::Spo2, 97.5))?;
//! drop(sink);
//! while !pipeline.is_finished() {
//!     tokio::task::yield_now().await;
//! }
//!
//! assert_eq!(display.drain().readings[0].spo2, Some(97.5));
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// Core types and error handling
pub mod codec;
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Link and storage
pub mod store;
pub mod transport;

// Ingest architecture
pub mod driver;
pub mod pipeline;
pub mod provider;
pub mod providers;

use std::time::Duration;

// Core exports
pub use config::{IngestConfig, LinkConfig, PipelineConfig, StoreConfig};
pub use error::*;
pub use types::*;

// Main API exports
pub use codec::WireFormat;
pub use driver::{Driver, IngestHandle, IngestStats};
pub use pipeline::Pipeline;
pub use provider::Provider;
pub use store::{Drain, ReadFrom, RingReader, RingStore, RingWriter};
pub use transport::{Client, ClientHandle, Communicator, LinkState, Server, ServerHandle};

/// Largest frame payload in bytes.
pub const MAX_FRAME_SIZE: usize = 1024;

/// Default channel (TCP port) for both link roles.
pub const DEFAULT_CHANNEL: u16 = 0x1001;

/// How long the server role waits for a peer in one accept window.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on one receive wait.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause between client connect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Default number of readings kept by the ring store.
pub const DEFAULT_STORE_CAPACITY: usize = 64;
