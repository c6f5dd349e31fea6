//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM and SIGINT and walks a server through a graceful
//! shutdown so every connection gets its disconnect hook before exit.

use tokio::signal;
use tracing::info;

use crate::server::ConnectionServer;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
#[derive(Debug, Default)]
pub struct ShutdownCoordinator;

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        Self
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(())
    }

    /// Stop `server` accepting, close its connections and wait for them
    /// for up to the server's `shutdown_timeout`
    pub async fn shutdown_server<F>(&self, server: &ConnectionServer<F>) -> Result<()> {
        info!("Shutting down connection server");
        server.shutdown().await
    }
}
