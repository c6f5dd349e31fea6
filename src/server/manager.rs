//! Connection Server Implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::{Connection, ConnectionFactory, ConnectionId, ConnectionSession};
use crate::packet::{PacketCodec, PacketStream};
use crate::transport::{receiver, CloseSignal, SocketTransport};
use crate::Result;

/// Connection information for tracking
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub start_time: Instant,
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub total_connections_served: usize,
    pub max_connections_allowed: usize,
}

struct TrackedConnection {
    info: ConnectionInfo,
    connection: Connection,
    close: CloseSignal,
}

type ConnectionTracker = Arc<RwLock<HashMap<ConnectionId, TrackedConnection>>>;

/// Accepts TCP connections and drives one session per socket.
///
/// Each accepted socket gets a handler from the factory, a session bound to
/// the socket, and its own task running the receive loop.
pub struct ConnectionServer<F> {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    factory: Arc<F>,
    connection_slots: Arc<Semaphore>,
    active_connections: Arc<AtomicUsize>,
    total_connections: Arc<AtomicUsize>,
    connection_tracker: ConnectionTracker,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<F: ConnectionFactory> ConnectionServer<F> {
    /// Create a new server; nothing is bound until [`ConnectionServer::bind`]
    pub fn new(config: Arc<Config>, factory: F) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let max_connections = config.server.max_connections;

        Self {
            listener: None,
            config,
            factory: Arc::new(factory),
            connection_slots: Arc::new(Semaphore::new(max_connections)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            total_connections: Arc::new(AtomicUsize::new(0)),
            connection_tracker: Arc::new(RwLock::new(HashMap::new())),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Bind the TCP listener and return the local address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let bind_addr = self.config.server.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", bind_addr))?;
        let local_addr = listener.local_addr()?;

        info!("Successfully bound to {}", local_addr);
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Bind and run the accept loop until shutdown
    pub async fn start(&mut self) -> Result<()> {
        self.bind().await?;
        self.run().await
    }

    /// Main connection acceptance loop
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow!("Listener not initialized"))?;

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);
                            if self.shutdown_flag.load(Ordering::Relaxed) {
                                debug!("Rejecting connection from {} due to shutdown", addr);
                                continue;
                            }
                            self.accept_connection(stream, addr).await;
                        }
                        Err(e) => {
                            // Keep accepting even if one accept fails
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    async fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let connection_slot = match Arc::clone(&self.connection_slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Connection limit reached ({}), rejecting connection from {}",
                    self.config.server.max_connections, addr
                );
                return;
            }
        };

        // Subscribe before any await so a shutdown sent meanwhile is not missed
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.shutdown_flag.load(Ordering::Relaxed) {
            debug!("Dropping connection from {} accepted during shutdown", addr);
            return;
        }

        if self.config.server.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }
        }

        let handler = self.factory.create(&self.config.application);
        let session = ConnectionSession::new(handler);
        let connection_id = session.id();

        let codec = PacketCodec::new(self.config.server.max_packet_size);
        let SocketTransport {
            reader,
            handle,
            sender,
            close,
            ..
        } = SocketTransport::split(stream, addr, codec);

        if let Err(e) = session.initialize(handle, sender) {
            error!("Failed to initialize connection from {}: {}", addr, e);
            return;
        }

        let connection = session.connection().clone();
        let conn_info = ConnectionInfo {
            id: connection_id,
            addr,
            start_time: Instant::now(),
        };

        // Counted before the tracker await so a concurrent drain waits for it
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.connection_tracker.write().await.insert(
            connection_id,
            TrackedConnection {
                info: conn_info,
                connection: connection.clone(),
                close: close.clone(),
            },
        );

        info!("Started handling connection {} from {}", connection_id, addr);

        let buffer_size = self.config.server.buffer_size;
        let active_connections = Arc::clone(&self.active_connections);
        let connection_tracker = Arc::clone(&self.connection_tracker);

        tokio::spawn(async move {
            // Keep the connection slot for the lifetime of the connection
            let _connection_slot = connection_slot;

            let mut task = tokio::spawn(receiver::serve(
                session,
                reader,
                close.clone(),
                codec,
                buffer_size,
            ));

            let result = tokio::select! {
                result = &mut task => result,
                _ = shutdown_rx.recv() => {
                    info!("Connection {} received shutdown signal, closing gracefully", connection_id);
                    close.close();
                    task.await
                }
            };

            match result {
                Ok(Ok(())) => debug!("Connection {} completed successfully", connection_id),
                Ok(Err(e)) => error!("Error handling connection {}: {:#}", connection_id, e),
                Err(e) if e.is_panic() => error!("Connection {} handler panicked", connection_id),
                Err(e) => warn!("Connection {} task cancelled: {}", connection_id, e),
            }

            // No-op unless the session task died before disposing
            connection.dispose();

            if let Some(removed) = connection_tracker.write().await.remove(&connection_id) {
                info!(
                    "Connection {} from {} closed after {:?}",
                    connection_id,
                    removed.info.addr,
                    removed.info.start_time.elapsed()
                );
            }

            active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

impl<F> ConnectionServer<F> {
    /// Get the number of active connections
    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the bind address if listener is initialized
    pub fn get_bind_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Get information about all active connections
    pub async fn get_active_connection_info(&self) -> Vec<ConnectionInfo> {
        let tracker = self.connection_tracker.read().await;
        tracker.values().map(|tracked| tracked.info.clone()).collect()
    }

    /// Get connection statistics
    pub async fn get_connection_stats(&self) -> ConnectionStats {
        let tracker = self.connection_tracker.read().await;

        ConnectionStats {
            active_connections: tracker.len(),
            total_connections_served: self.total_connections.load(Ordering::Relaxed),
            max_connections_allowed: self.config.server.max_connections,
        }
    }

    /// Look up a live connection by id
    pub async fn get_connection(&self, id: ConnectionId) -> Option<Connection> {
        let tracker = self.connection_tracker.read().await;
        tracker.get(&id).map(|tracked| tracked.connection.clone())
    }

    /// Send a packet to one connection. Returns `false` if it is not live.
    pub async fn send_to(&self, id: ConnectionId, packet: PacketStream) -> bool {
        match self.get_connection(id).await {
            Some(connection) => {
                connection.send(packet);
                true
            }
            None => false,
        }
    }

    /// Send a copy of a packet to every live connection
    pub async fn send_to_all(&self, packet: &PacketStream) -> usize {
        let tracker = self.connection_tracker.read().await;
        for tracked in tracker.values() {
            tracked.connection.send(packet.clone());
        }
        tracker.len()
    }

    /// Close one connection. Its disconnect hook runs on its own task.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let tracker = self.connection_tracker.read().await;
        match tracker.get(&id) {
            Some(tracked) => {
                debug!("Disconnect requested for connection {}", id);
                tracked.close.close();
                true
            }
            None => false,
        }
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection server");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        // Reaches the accept loop and every connection task
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No receivers for shutdown signal: {}", e);
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait for all connections to close, up to the configured timeout
    pub async fn wait_for_connections_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            self.get_active_connections(),
            shutdown_timeout
        );

        while self.get_active_connections() > 0 && start_time.elapsed() < shutdown_timeout {
            debug!(
                "Waiting for {} active connections to close",
                self.get_active_connections()
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.get_active_connections();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All connections closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                elapsed, remaining
            );
        }

        Ok(())
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_connections_to_close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DefaultHandler;
    use tokio::io::AsyncReadExt;

    fn test_server() -> Arc<ConnectionServer<fn(&toml::Table) -> DefaultHandler>> {
        let mut config = Config::default();
        config.server.shutdown_timeout = Duration::from_secs(2);
        let factory: fn(&toml::Table) -> DefaultHandler = |_| DefaultHandler;
        Arc::new(ConnectionServer::new(Arc::new(config), factory))
    }

    async fn accepted_socket() -> (TcpStream, SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (peer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (stream, peer_addr) = accepted.unwrap();
        (stream, peer_addr, peer.unwrap())
    }

    #[tokio::test]
    async fn test_shutdown_during_registration_closes_connection() {
        let server = test_server();
        let (stream, addr, mut peer) = accepted_socket().await;

        // Park the accept path on the tracker lock
        let tracker_guard = server.connection_tracker.read().await;
        let accepting = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.accept_connection(stream, addr).await })
        };
        tokio::task::yield_now().await;

        server.initiate_shutdown();
        drop(tracker_guard);
        accepting.await.unwrap();

        server.wait_for_connections_to_close().await.unwrap();
        assert_eq!(server.get_active_connections(), 0);

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), peer.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_accept_after_shutdown_is_dropped() {
        let server = test_server();
        let (stream, addr, _peer) = accepted_socket().await;

        server.initiate_shutdown();
        server.accept_connection(stream, addr).await;

        assert_eq!(server.get_active_connections(), 0);
        assert_eq!(server.get_connection_stats().await.total_connections_served, 0);
    }
}
