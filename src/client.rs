//! Connection Client
//!
//! Dials a remote endpoint and drives a single session over the socket.

use std::net::SocketAddr;

use anyhow::{anyhow, Context};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionHandler, ConnectionId, ConnectionSession, ConnectionState};
use crate::packet::{PacketCodec, PacketStream};
use crate::transport::{receiver, CloseSignal, SocketTransport};
use crate::Result;

/// Outbound connection to a server.
///
/// `on_connected` has completed by the time [`ConnectionClient::connect`]
/// returns. Dropping the client closes the socket.
pub struct ConnectionClient {
    connection: Connection,
    remote_addr: SocketAddr,
    close: CloseSignal,
    task: Option<JoinHandle<Result<()>>>,
}

impl ConnectionClient {
    /// Dial `config.remote_addr` and start receiving for `handler`
    pub async fn connect<H: ConnectionHandler>(config: &ClientConfig, handler: H) -> Result<Self> {
        let remote_addr = config.remote_addr;
        info!("Connecting to {}", remote_addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(remote_addr))
            .await
            .map_err(|_| {
                anyhow!(
                    "Connection to {} timed out after {:?}",
                    remote_addr,
                    config.connect_timeout
                )
            })?
            .with_context(|| format!("Failed to connect to {}", remote_addr))?;

        if config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
            }
        }

        let codec = PacketCodec::new(config.max_packet_size);
        let SocketTransport {
            reader,
            handle,
            sender,
            close,
            ..
        } = SocketTransport::split(stream, remote_addr, codec);

        let mut session = ConnectionSession::new(handler);
        session.initialize(handle, sender)?;

        if let Err(e) = receiver::guarded(session.id(), session.connect()).await {
            receiver::teardown(&mut session).await;
            return Err(e.context(format!("Connection setup with {} failed", remote_addr)));
        }

        let connection = session.connection().clone();
        let task = tokio::spawn(receiver::drive(
            session,
            reader,
            close.clone(),
            codec,
            config.buffer_size,
        ));

        info!("Connection {} established with {}", connection.id(), remote_addr);

        Ok(Self {
            connection,
            remote_addr,
            close,
            task: Some(task),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Shared handle for sending from other tasks
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connection.state() == ConnectionState::Connected
    }

    pub fn send(&self, packet: PacketStream) {
        self.connection.send(packet);
    }

    /// Close the socket and wait for `on_disconnected` to finish
    pub async fn disconnect(&mut self) -> Result<()> {
        debug!("Disconnect requested for connection {}", self.id());
        self.close.close();
        self.closed().await
    }

    /// Wait until the connection ends, for whatever reason
    pub async fn closed(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.await.context("Client receive task failed")?,
            None => Ok(()),
        }
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        self.close.close();
    }
}
