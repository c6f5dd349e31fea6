//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::packet::DEFAULT_MAX_PACKET_SIZE;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
    /// Options passed untouched to the connection factory
    pub application: toml::Table,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    /// Read buffer reserved per connection, in bytes
    pub buffer_size: usize,
    pub max_packet_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub nodelay: bool,
}

/// Client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub remote_addr: SocketAddr,
    pub buffer_size: usize,
    pub max_packet_size: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub nodelay: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 4444)),
            max_connections: 1000,
            buffer_size: 8192,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            shutdown_timeout: Duration::from_secs(30),
            nodelay: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 4444)),
            buffer_size: 8192,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
            application: toml::Table::new(),
        }
    }
}
