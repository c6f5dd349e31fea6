//! LiteNet Library
//!
//! Connection lifecycle and packet dispatch over TCP streams.
//!
//! A [`Connection`] is created unbound, bound once to a transport, and then
//! receives `on_connected`, every inbound packet in order, and finally
//! `on_disconnected` through the application's [`ConnectionHandler`].
//! [`ConnectionServer`] and [`ConnectionClient`] host connections over
//! length-prefixed TCP framing.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use client::ConnectionClient;
pub use config::Config;
pub use connection::{
    Connection, ConnectionFactory, ConnectionHandler, ConnectionId, ConnectionSession,
    ConnectionState, DefaultHandler,
};
pub use error::{ConnectionError, PacketError};
pub use packet::{PacketCodec, PacketStream};
pub use server::ConnectionServer;
pub use shutdown::ShutdownCoordinator;

/// Common result type for the library
pub type Result<T> = anyhow::Result<T>;
