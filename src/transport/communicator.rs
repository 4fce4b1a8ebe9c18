//! Dual-role coordinator: one client and one server per link end

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Client, ClientHandle, Server, ServerHandle};
use crate::config::LinkConfig;
use crate::types::Frame;
use crate::{IngestError, Result};

/// Owns both roles of one end of a link.
///
/// `open` connects both directions, `run` starts both loops as tasks and
/// `quit` stops and waits for them. Frames go out through [`push`](Self::push)
/// and come in through [`get_all`](Self::get_all).
pub struct Communicator {
    config: LinkConfig,
    client: Option<Client>,
    server: Option<Server>,
    client_handle: ClientHandle,
    server_handle: ServerHandle,
    client_address: Option<SocketAddr>,
    server_address: Option<SocketAddr>,
    tasks: Option<(JoinHandle<Client>, JoinHandle<Server>)>,
}

impl Communicator {
    pub fn new(config: LinkConfig) -> Self {
        let client = Client::new(config.clone());
        let server = Server::new(config.clone());
        Self {
            client_handle: client.handle(),
            server_handle: server.handle(),
            client: Some(client),
            server: Some(server),
            client_address: None,
            server_address: None,
            tasks: None,
            config,
        }
    }

    /// Bind the server role's listening socket.
    pub async fn listen(&mut self) -> Result<SocketAddr> {
        let server = self.server.as_mut().ok_or(IngestError::closed("communicator server role"))?;
        server.listen().await
    }

    /// Connect both roles: dial `address` while accepting the peer's dial.
    ///
    /// The client retries every reconnect backoff, up to `max_tries` attempts
    /// (`None` retries until it connects). Accept windows repeat in the
    /// background meanwhile; once the client settles the server gets at most
    /// one more window. Fails unless both directions are connected.
    pub async fn open(&mut self, address: &str, max_tries: Option<u32>) -> Result<()> {
        if self.tasks.is_some() {
            return Err(IngestError::connection_failed("communicator is already running"));
        }
        let (Some(mut client), Some(mut server)) = (self.client.take(), self.server.take()) else {
            return Err(IngestError::closed("communicator roles"));
        };

        if let Err(e) = server.listen().await {
            self.client = Some(client);
            self.server = Some(server);
            return Err(e);
        }

        let stop = CancellationToken::new();
        let pause = self.config.poll_interval();
        let accept = tokio::spawn(accept_until_stopped(server, stop.clone(), pause));

        let backoff = self.config.reconnect_backoff();
        let client_result = connect_with_retry(&mut client, address, max_tries, backoff).await;
        stop.cancel();

        let server = match accept.await {
            Ok(server) => server,
            Err(e) => {
                client.close();
                self.client = Some(client);
                return Err(e.into());
            }
        };

        let result = match (client_result, server.peer_address()) {
            (Err(e), _) => Err(e),
            (Ok(()), None) => {
                client.close();
                Err(IngestError::connection_failed("peer never connected back to the server role"))
            }
            (Ok(()), Some(peer)) => {
                self.client_address = client.peer_address();
                self.server_address = Some(peer);
                info!("Link open: sending to {:?}, receiving from {}", self.client_address, peer);
                Ok(())
            }
        };

        self.client = Some(client);
        self.server = Some(server);
        result
    }

    /// Start the send and receive loops.
    pub fn run(&mut self) -> Result<()> {
        if self.tasks.is_some() {
            return Ok(());
        }
        let connected = matches!(
            (&self.client, &self.server),
            (Some(client), Some(server)) if client.is_connected() && server.is_connected()
        );
        if !connected {
            return Err(IngestError::not_connected("communicator"));
        }
        let (Some(mut client), Some(mut server)) = (self.client.take(), self.server.take()) else {
            return Err(IngestError::not_connected("communicator"));
        };

        let client_task = tokio::spawn(async move {
            client.run().await;
            client
        });
        let server_task = tokio::spawn(async move {
            server.run().await;
            server
        });
        self.tasks = Some((client_task, server_task));
        debug!("Communicator loops started");
        Ok(())
    }

    /// Stop both loops and wait for them to return.
    pub async fn quit(&mut self) -> Result<()> {
        self.client_handle.quit();
        self.server_handle.quit();

        let Some((client_task, server_task)) = self.tasks.take() else {
            return Ok(());
        };
        let (client, server) = tokio::join!(client_task, server_task);

        let mut first_error = None;
        match client {
            Ok(client) => self.client = Some(client),
            Err(e) => first_error = Some(IngestError::from(e)),
        }
        match server {
            Ok(server) => self.server = Some(server),
            Err(e) => {
                first_error.get_or_insert(IngestError::from(e));
            }
        }

        debug!("Communicator loops stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Stop both loops and drop both connections.
    pub async fn close(&mut self) -> Result<()> {
        let result = self.quit().await;
        if let Some(client) = self.client.as_mut() {
            client.close();
        }
        if let Some(server) = self.server.as_mut() {
            server.close();
        }
        self.client_address = None;
        self.server_address = None;
        result
    }

    /// Queue a frame on the client role.
    pub fn push(&self, frame: Frame) {
        self.client_handle.push(frame);
    }

    /// Frames buffered by the server role.
    pub fn available(&self) -> usize {
        self.server_handle.available()
    }

    /// Take the frames buffered by the server role.
    pub fn get_all(&self) -> Vec<Frame> {
        self.server_handle.get_all()
    }

    pub fn client_handle(&self) -> ClientHandle {
        self.client_handle.clone()
    }

    pub fn server_handle(&self) -> ServerHandle {
        self.server_handle.clone()
    }

    /// Peer the client role is connected to.
    pub fn client_address(&self) -> Option<SocketAddr> {
        self.client_address
    }

    /// Peer the server role accepted.
    pub fn server_address(&self) -> Option<SocketAddr> {
        self.server_address
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_some()
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.client_handle.quit();
        self.server_handle.quit();
    }
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("client_address", &self.client_address)
            .field("server_address", &self.server_address)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn accept_until_stopped(
    mut server: Server,
    stop: CancellationToken,
    pause: Duration,
) -> Server {
    while !server.is_connected() {
        let result = server.open().await;
        if stop.is_cancelled() {
            break;
        }
        match result {
            Ok(()) => {}
            Err(IngestError::AcceptTimeout { .. }) => debug!("No peer yet, accepting again"),
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(pause).await;
            }
        }
    }
    server
}

async fn connect_with_retry(
    client: &mut Client,
    address: &str,
    max_tries: Option<u32>,
    backoff: Duration,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match client.open(address).await {
            Ok(()) => return Ok(()),
            Err(e) if max_tries.is_some_and(|max| attempt >= max) => {
                warn!("Giving up on {} after {} attempts: {}", address, attempt, e);
                return Err(e);
            }
            Err(e) => {
                debug!("Connect attempt {} to {} failed: {}", attempt, address, e);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
