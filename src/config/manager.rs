//! Configuration Manager

use super::{ClientConfig, Config, ServerConfig};
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

const MAX_CONNECTIONS_LIMIT: usize = 100_000;
const MIN_BUFFER_SIZE: usize = 512;
const MAX_BUFFER_SIZE: usize = 1024 * 1024;
const MAX_PACKET_SIZE_LIMIT: usize = 64 * 1024 * 1024;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, falling back to defaults when it is missing
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables on top of defaults
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("LITENET_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid LITENET_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(max_conn) = std::env::var("LITENET_MAX_CONNECTIONS") {
            config.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid LITENET_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(buffer_size) = std::env::var("LITENET_BUFFER_SIZE") {
            let buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid LITENET_BUFFER_SIZE: {}", buffer_size))?;
            config.server.buffer_size = buffer_size;
            config.client.buffer_size = buffer_size;
        }

        if let Ok(remote_addr) = std::env::var("LITENET_REMOTE_ADDR") {
            config.client.remote_addr = remote_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid LITENET_REMOTE_ADDR: {}", remote_addr))?;
        }

        if let Ok(log_level) = std::env::var("LITENET_LOG_LEVEL") {
            config.logging.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server
            .validate()
            .with_context(|| "Server configuration validation failed")?;

        self.client
            .validate()
            .with_context(|| "Client configuration validation failed")?;

        if !LOG_LEVELS.contains(&self.logging.log_level.as_str()) {
            bail!("logging.log_level must be one of: {}", LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments; an unparsable bind address is an error
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        buffer_size: Option<usize>,
    ) -> Result<()> {
        if let Some(bind_str) = bind {
            let addr = bind_str
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid bind address: {}", bind_str))?;
            self.server.bind_addr = addr;
            tracing::info!("CLI override: bind address set to {}", addr);
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(max_conn) = max_connections {
            self.server.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        Ok(())
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.max_connections > MAX_CONNECTIONS_LIMIT {
            bail!("max_connections cannot exceed 100,000 for safety");
        }

        if self.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        validate_buffers(self.buffer_size, self.max_packet_size)
    }
}

impl ClientConfig {
    fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        validate_buffers(self.buffer_size, self.max_packet_size)
    }
}

fn validate_buffers(buffer_size: usize, max_packet_size: usize) -> Result<()> {
    if buffer_size < MIN_BUFFER_SIZE {
        bail!("buffer_size must be at least {} bytes", MIN_BUFFER_SIZE);
    }

    if buffer_size > MAX_BUFFER_SIZE {
        bail!("buffer_size cannot exceed 1MB");
    }

    if max_packet_size == 0 {
        bail!("max_packet_size must be greater than 0");
    }

    if max_packet_size > MAX_PACKET_SIZE_LIMIT {
        bail!("max_packet_size cannot exceed 64MB");
    }

    Ok(())
}
