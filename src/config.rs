//! Pipeline configuration
//!
//! Loaded from YAML. Every key is optional and falls back to the link
//! constants in the crate root.
//!
//! ```yaml
//! link:
//!   bind_address: 0.0.0.0
//!   channel: 4097
//!   accept_timeout_ms: 1000
//! store:
//!   capacity: 256
//! ingest:
//!   wire_format: compact
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::codec::WireFormat;
use crate::{IngestError, Result};

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub link: LinkConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
}

/// Transport link parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Local interface the server role listens on
    pub bind_address: String,

    /// Channel the server role listens on (0 picks a free one)
    pub channel: u16,

    /// Channel the client role dials on the peer
    pub peer_channel: u16,

    pub accept_timeout_ms: u64,

    /// Upper bound on each receive wait
    pub poll_interval_ms: u64,

    /// Pause between client connect attempts
    pub reconnect_backoff_ms: u64,

    pub max_frame_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            channel: crate::DEFAULT_CHANNEL,
            peer_channel: crate::DEFAULT_CHANNEL,
            accept_timeout_ms: crate::ACCEPT_TIMEOUT.as_millis() as u64,
            poll_interval_ms: crate::POLL_INTERVAL.as_millis() as u64,
            reconnect_backoff_ms: crate::RECONNECT_BACKOFF.as_millis() as u64,
            max_frame_size: crate::MAX_FRAME_SIZE,
        }
    }
}

impl LinkConfig {
    /// Loopback link on the given channels.
    pub fn loopback(channel: u16, peer_channel: u16) -> Self {
        Self { bind_address: "127.0.0.1".to_string(), channel, peer_channel, ..Self::default() }
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Ring store sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { capacity: crate::DEFAULT_STORE_CAPACITY }
    }
}

/// Ingest loop behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Wire format expected on the link
    pub wire_format: WireFormat,

    /// Consecutive provider failures before the loop gives up
    pub max_consecutive_errors: u32,

    /// Client connect attempts when opening a link (absent retries forever)
    pub max_connect_tries: Option<u32>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::Tagged,
            max_consecutive_errors: 10,
            max_connect_tries: Some(10),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml_ng::from_str(yaml).map_err(|e| {
            IngestError::config_error("PipelineConfig deserialization", e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| IngestError::File { path: path.to_path_buf(), source: e })?;
        Self::from_yaml(&contents)
    }

    /// Check values the types alone cannot rule out.
    pub fn validate(&self) -> Result<()> {
        if self.store.capacity == 0 {
            return Err(IngestError::config_error("store.capacity", "must be at least 1"));
        }

        // Frames are length-prefixed with a u16 and capped by the frame type
        if self.link.max_frame_size == 0 || self.link.max_frame_size > crate::MAX_FRAME_SIZE {
            return Err(IngestError::config_error(
                "link.max_frame_size",
                format!("must be between 1 and {}", crate::MAX_FRAME_SIZE),
            ));
        }

        if self.link.poll_interval_ms == 0 {
            return Err(IngestError::config_error("link.poll_interval_ms", "must be positive"));
        }

        Ok(())
    }
}
