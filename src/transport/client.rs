//! Client role: dial the peer and send queued frames

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{FramedLink, LinkState, framed, peer_target};
use crate::config::LinkConfig;
use crate::types::Frame;
use crate::{IngestError, Result};

struct ClientShared {
    queue: Mutex<VecDeque<Frame>>,
    wake: Notify,
    cancel: CancellationToken,
}

/// Cloneable handle for queueing frames and stopping a [`Client`].
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<ClientShared>,
}

impl ClientHandle {
    /// Queue a frame for sending. Never blocks.
    pub fn push(&self, frame: Frame) {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(frame);
        self.shared.wake.notify_one();
    }

    /// Ask the send loop to stop.
    pub fn quit(&self) {
        self.shared.cancel.cancel();
    }

    /// Frames waiting to be sent.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_quit_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("pending", &self.pending())
            .field("quit_requested", &self.is_quit_requested())
            .finish()
    }
}

/// Outbound role of a link.
pub struct Client {
    config: LinkConfig,
    link: Option<FramedLink>,
    peer_address: Option<SocketAddr>,
    shared: Arc<ClientShared>,
}

impl Client {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            link: None,
            peer_address: None,
            shared: Arc::new(ClientShared {
                queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Connect to `address`, on the configured peer channel unless the address
    /// carries its own port.
    ///
    /// On failure the client is left exactly as it was.
    pub async fn open(&mut self, address: &str) -> Result<()> {
        if self.link.is_some() {
            return Err(IngestError::connection_failed("client is already connected"));
        }

        let target = peer_target(address, self.config.peer_channel);
        debug!("Client connecting to {}", target);

        let stream = TcpStream::connect(target.as_str()).await.map_err(|e| {
            let reason = format!("connect to {}", target);
            IngestError::connection_failed_with_source(reason, Box::new(e))
        })?;
        stream.set_nodelay(true).map_err(|e| IngestError::io_error("set TCP_NODELAY", e))?;
        let peer = stream.peer_addr().map_err(|e| IngestError::io_error("read peer address", e))?;

        self.link = Some(framed(stream, self.config.max_frame_size));
        self.peer_address = Some(peer);
        info!("Client connected to {}", peer);
        Ok(())
    }

    /// Queue a frame for sending.
    pub fn push(&self, frame: Frame) {
        self.handle().push(frame);
    }

    /// Send queued frames until quit is requested.
    ///
    /// Returns at once when not connected; frames queued meanwhile stay queued.
    pub async fn run(&mut self) {
        let Some(link) = self.link.as_mut() else {
            debug!("Client send loop not started: not connected");
            return;
        };

        info!("Client send loop started");
        let cancel = self.shared.cancel.clone();
        let mut sent = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let next = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let frame = match next {
                Some(frame) => frame,
                None => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.shared.wake.notified() => {}
                    }
                    continue;
                }
            };

            let len = frame.len();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = link.send(frame.into_data()) => result,
            };

            match result {
                Ok(()) => {
                    sent += 1;
                    trace!("Sent frame {} ({} bytes)", sent, len);
                }
                Err(e) => warn!("Failed to send {} byte frame: {}", len, e),
            }
        }

        info!("Client send loop ended (sent {} frames)", sent);
    }

    /// Ask the send loop to stop. Does not close the connection.
    pub fn quit(&self) {
        self.shared.cancel.cancel();
    }

    /// Drop the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            debug!("Client closed connection to {:?}", self.peer_address);
        }
        self.peer_address = None;
    }

    pub fn state(&self) -> LinkState {
        LinkState {
            connected: self.is_connected(),
            quit_requested: self.shared.cancel.is_cancelled(),
            peer_address: self.peer_address,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.peer_address
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle { shared: Arc::clone(&self.shared) }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("state", &self.state()).finish()
    }
}
