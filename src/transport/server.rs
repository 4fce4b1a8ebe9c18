//! Server role: accept one peer and buffer inbound frames

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{FramedLink, LinkState, framed};
use crate::config::LinkConfig;
use crate::types::Frame;
use crate::{IngestError, Result};

struct ServerShared {
    frames: Mutex<Vec<Frame>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Cloneable handle for collecting frames from a [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

impl ServerHandle {
    /// Number of buffered frames.
    pub fn available(&self) -> usize {
        self.shared.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Take every buffered frame in arrival order, leaving the buffer empty.
    pub fn get_all(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.shared.frames.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Ask the receive loop to stop.
    pub fn quit(&self) {
        self.shared.cancel.cancel();
    }

    /// Whether the receive loop has ended or the server was closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Inbound role of a link.
pub struct Server {
    config: LinkConfig,
    listener: Option<TcpListener>,
    link: Option<FramedLink>,
    peer_address: Option<SocketAddr>,
    shared: Arc<ServerShared>,
}

impl Server {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            listener: None,
            link: None,
            peer_address: None,
            shared: Arc::new(ServerShared {
                frames: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Bind the listening socket if not already bound.
    ///
    /// Returns the bound address; channel 0 binds a free port.
    pub async fn listen(&mut self) -> Result<SocketAddr> {
        let listener = self.listener().await?;
        listener.local_addr().map_err(|e| IngestError::io_error("read listen address", e))
    }

    async fn listener(&mut self) -> Result<&TcpListener> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => {
                let bind = (self.config.bind_address.as_str(), self.config.channel);
                let listener = TcpListener::bind(bind).await.map_err(|e| {
                    IngestError::connection_failed_with_source(
                        format!("listen on {}:{}", bind.0, bind.1),
                        Box::new(e),
                    )
                })?;
                debug!("Server listening on {:?}", listener.local_addr());
                listener
            }
        };
        Ok(&*self.listener.insert(listener))
    }

    /// Wait up to the accept timeout for one peer.
    pub async fn open(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Err(IngestError::connection_failed("server already has a peer"));
        }

        let timeout = self.config.accept_timeout();
        let listener = self.listener().await?;
        let (stream, peer) = match tokio::time::timeout(timeout, listener.accept()).await {
            Err(_) => return Err(IngestError::AcceptTimeout { duration: timeout }),
            Ok(Err(e)) => return Err(IngestError::io_error("accept", e)),
            Ok(Ok(accepted)) => accepted,
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        self.link = Some(framed(stream, self.config.max_frame_size));
        self.peer_address = Some(peer);
        self.shared.closed.store(false, Ordering::Release);
        info!("Server accepted peer {}", peer);
        Ok(())
    }

    /// Buffer received frames until quit is requested or the peer hangs up.
    ///
    /// Returns at once when no peer is connected.
    pub async fn run(&mut self) {
        let Some(link) = self.link.as_mut() else {
            debug!("Server receive loop not started: no peer");
            return;
        };

        info!("Server receive loop started");
        let cancel = self.shared.cancel.clone();
        let poll_interval = self.config.poll_interval();
        let mut received = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = tokio::time::timeout(poll_interval, link.next()) => next,
            };

            match next {
                // Poll window elapsed with nothing to read
                Err(_) => continue,
                Ok(Some(Ok(bytes))) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    match Frame::new(bytes.freeze()) {
                        Ok(frame) => {
                            received += 1;
                            trace!("Received frame {}\n{}", received, frame.hex_dump());
                            self.shared
                                .frames
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(frame);
                        }
                        Err(e) => warn!("Dropping received frame: {}", e),
                    }
                }
                // Oversized frames are skipped by the codec, so an error here
                // comes from the socket itself
                Ok(Some(Err(e))) => warn!("Receive error: {}", e),
                Ok(None) => {
                    info!("Peer {:?} closed the link", self.peer_address);
                    break;
                }
            }
        }

        self.shared.closed.store(true, Ordering::Release);
        info!(
            "Server receive loop ended (received {} frames, discarded {} oversized)",
            received,
            link.codec().discarded()
        );
    }

    /// Number of buffered frames.
    pub fn available(&self) -> usize {
        self.handle().available()
    }

    /// Take every buffered frame in arrival order.
    pub fn get_all(&self) -> Vec<Frame> {
        self.handle().get_all()
    }

    /// Ask the receive loop to stop. Does not close the connection.
    pub fn quit(&self) {
        self.shared.cancel.cancel();
    }

    /// Drop the peer connection and the listening socket. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            debug!("Server closed connection from {:?}", self.peer_address);
        }
        self.listener = None;
        self.peer_address = None;
        self.shared.closed.store(true, Ordering::Release);
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

    /// Bound listening address, if listening.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|listener| listener.local_addr().ok())
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle { shared: Arc::clone(&self.shared) }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_address", &self.local_address())
            .field("state", &self.state())
            .finish()
    }
}
