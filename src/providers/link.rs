//! Provider for frames arriving over a transport link

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, trace};

use crate::Result;
use crate::codec::{self, WireFormat};
use crate::provider::Provider;
use crate::transport::ServerHandle;
use crate::types::{Frame, Reading};

/// Decodes frames buffered by a [`Server`](crate::transport::Server).
pub struct LinkProvider {
    /// Buffer of the receiving role
    frames: ServerHandle,

    /// Format the peer sends
    format: WireFormat,

    /// Pacing for empty-buffer polls
    interval: Interval,

    /// Frames taken from the server but not decoded yet
    pending: VecDeque<Frame>,

    decoded: u64,
}

impl LinkProvider {
    pub fn new(frames: ServerHandle, format: WireFormat, poll_interval: Duration) -> Self {
        let mut interval = interval(poll_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { frames, format, interval, pending: VecDeque::new(), decoded: 0 }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }
}

#[async_trait::async_trait]
impl Provider for LinkProvider {
    async fn next_batch(&mut self) -> Result<Option<Vec<Reading>>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                let decoded = codec::decode(&frame, self.format)?;
                self.decoded += 1;
                trace!(
                    "Decoded frame {}: {} readings, source {:?}",
                    self.decoded,
                    decoded.readings.len(),
                    decoded.source_id
                );
                return Ok(Some(decoded.readings));
            }

            // Check closed before draining so frames buffered just before
            // the loop ended are still delivered
            let closed = self.frames.is_closed();
            self.pending.extend(self.frames.get_all());
            if self.pending.is_empty() {
                if closed {
                    debug!("Link closed after {} frames", self.decoded);
                    return Ok(None);
                }
                self.interval.tick().await;
            }
        }
    }

    fn name(&self) -> &str {
        "link"
    }
}
