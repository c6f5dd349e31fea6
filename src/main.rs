//! LiteNet echo server
//!
//! Runs a [`ConnectionServer`] whose handler sends every inbound packet back
//! to the connection it came from.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use litenet::{
    config::ConfigManager, Connection, ConnectionHandler, ConnectionServer, PacketStream,
    ShutdownCoordinator,
};

/// CLI arguments for the LiteNet echo server
#[derive(Parser, Debug)]
#[command(name = "litenet")]
#[command(about = "LiteNet - packet echo server")]
#[command(version)]
#[command(long_about = "
LiteNet - packet echo server

Accepts TCP connections speaking length-prefixed packets and echoes every
packet back to its sender.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  LITENET_BIND_ADDR        - Bind address (e.g., 127.0.0.1:4444)
  LITENET_MAX_CONNECTIONS  - Maximum concurrent connections
  LITENET_BUFFER_SIZE      - Read buffer size in bytes
  LITENET_REMOTE_ADDR      - Remote address used by clients
  LITENET_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:4444)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Maximum number of concurrent connections
    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    /// Buffer size in bytes
    #[arg(long, help = "Buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

/// Sends every packet straight back
#[derive(Debug, Default)]
struct EchoHandler {
    echoed: u64,
}

impl ConnectionHandler for EchoHandler {
    async fn on_connected(&mut self, connection: &Connection) -> Result<()> {
        info!("Echo session {} started", connection.id());
        Ok(())
    }

    async fn handle_message(&mut self, connection: &Connection, packet: PacketStream) -> Result<()> {
        connection.send(packet);
        self.echoed += 1;
        Ok(())
    }

    async fn on_disconnected(&mut self, connection: &Connection) -> Result<()> {
        info!(
            "Echo session {} ended after {} packets",
            connection.id(),
            self.echoed
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.log_level.clone());
    init_tracing(&args, &log_level)?;

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.buffer_size,
    )?;
    config.logging.log_level = log_level;

    info!("Starting LiteNet v{}", env!("CARGO_PKG_VERSION"));

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Max connections: {}", config.server.max_connections);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!("  Max packet size: {} bytes", config.server.max_packet_size);
        info!("  Shutdown timeout: {:?}", config.server.shutdown_timeout);
        return Ok(());
    }

    let shutdown_coordinator = ShutdownCoordinator::new();

    let mut server = ConnectionServer::new(Arc::new(config), |_: &toml::Table| {
        EchoHandler::default()
    });
    server.bind().await?;
    let server = Arc::new(server);

    let server_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Server error: {:#}", e);
            }
        })
    };

    if let Some(local_addr) = server.get_bind_addr() {
        info!("LiteNet echo server listening on {}", local_addr);
    }
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    info!("Initiating graceful shutdown...");
    shutdown_coordinator.shutdown_server(&server).await?;

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, log_level: &str) -> Result<()> {
    let log_level = if args.verbose { "debug" } else { log_level };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
