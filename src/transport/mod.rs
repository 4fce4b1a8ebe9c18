//! Connection-oriented link between the ingest host and a sensor node
//!
//! Each side of the link runs two roles over separate connections:
//!
//! - [`Client`]: dials the peer and drains an outbound frame queue
//! - [`Server`]: accepts one peer and buffers inbound frames
//!
//! [`Communicator`] pairs the two and is what most callers want.
//!
//! # Wire Format
//!
//! Connections are TCP. Frame boundaries are kept with a length prefix, so one
//! send on one side is exactly one receive on the other:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (2 bytes) │ Frame payload            │
//! │ Big-endian u16   │ (at most 1024 bytes)     │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! A frame announced larger than `max_frame_size` is read off the socket and
//! dropped; the connection stays up and the next frame is delivered.
//!
//! # Lifecycle
//!
//! ```text
//! new ──> open ──> run ... quit ──> close
//!          │
//!          └─ failure leaves the role unconnected; open may be retried
//! ```
//!
//! Quitting is cooperative. `quit()` only raises a flag; the running loop
//! notices it within one poll interval and returns.

mod client;
mod communicator;
mod server;

pub use client::{Client, ClientHandle};
pub use communicator::Communicator;
pub use server::{Server, ServerHandle};

use std::io;
use std::net::{IpAddr, SocketAddr};

use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};
use tracing::warn;

/// Snapshot of a role's connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    pub connected: bool,
    pub quit_requested: bool,
    pub peer_address: Option<SocketAddr>,
}

pub(crate) type FramedLink = Framed<TcpStream, LinkCodec>;

/// Length-prefixed framing for one connection.
pub(crate) fn framed(stream: TcpStream, max_frame_size: usize) -> FramedLink {
    Framed::new(stream, LinkCodec::new(max_frame_size))
}

/// Length-prefixed codec that skips oversized frames instead of failing.
///
/// A decode error ends a `Framed` stream for good, so the inner codec takes
/// any 2-byte length and the size limit is enforced here.
#[derive(Debug)]
pub(crate) struct LinkCodec {
    inner: LengthDelimitedCodec,
    max_frame_size: usize,
    discarded: u64,
}

impl LinkCodec {
    pub(crate) fn new(max_frame_size: usize) -> Self {
        let inner = LengthDelimitedCodec::builder()
            .length_field_length(2)
            .max_frame_length(usize::from(u16::MAX))
            .new_codec();
        Self { inner, max_frame_size, discarded: 0 }
    }

    /// Inbound frames dropped for exceeding the size limit.
    pub(crate) fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Decoder for LinkCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        loop {
            match self.inner.decode(src)? {
                Some(frame) if frame.len() > self.max_frame_size => {
                    self.discarded += 1;
                    warn!(
                        "Discarding {} byte frame (limit {} bytes)",
                        frame.len(),
                        self.max_frame_size
                    );
                }
                next => return Ok(next),
            }
        }
    }
}

impl Encoder<Bytes> for LinkCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> io::Result<()> {
        if frame.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} byte frame exceeds limit of {} bytes", frame.len(), self.max_frame_size),
            ));
        }
        self.inner.encode(frame, dst)
    }
}

/// Resolve a peer address, filling in `channel` when no port is given.
pub(crate) fn peer_target(address: &str, channel: u16) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, channel).to_string();
    }
    match address.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{}:{}", address, channel),
    }
}
