//! Connection Handler
//!
//! Application hooks invoked by the host for one connection, and the
//! factory contract that produces a handler per accepted transport.

use std::future::Future;

use super::Connection;
use crate::packet::PacketStream;
use crate::Result;

/// Application behaviour for one connection.
///
/// Every method defaults to a no-op, so an implementation only overrides
/// what its protocol needs. The host calls them in this order and never
/// concurrently for the same connection:
/// `on_connected` → `handle_message`* → `on_disconnected`.
///
/// Errors are returned to the host, which logs them. They are never
/// swallowed on the way.
pub trait ConnectionHandler: Send + 'static {
    /// Called once after the transport is bound, before any message
    fn on_connected(&mut self, connection: &Connection) -> impl Future<Output = Result<()>> + Send {
        let _ = connection;
        async { Ok(()) }
    }

    /// Called once per decoded inbound packet, in arrival order
    fn handle_message(
        &mut self,
        connection: &Connection,
        packet: PacketStream,
    ) -> impl Future<Output = Result<()>> + Send {
        let _ = (connection, packet);
        async { Ok(()) }
    }

    /// Called once when the transport closes, after the last message
    fn on_disconnected(&mut self, connection: &Connection) -> impl Future<Output = Result<()>> + Send {
        let _ = connection;
        async { Ok(()) }
    }
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl ConnectionHandler for DefaultHandler {}

/// Produces one handler per transport, before any data flows.
///
/// `options` is the opaque `[application]` table from the configuration.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Handler: ConnectionHandler;

    fn create(&self, options: &toml::Table) -> Self::Handler;
}

impl<F, H> ConnectionFactory for F
where
    F: Fn(&toml::Table) -> H + Send + Sync + 'static,
    H: ConnectionHandler,
{
    type Handler = H;

    fn create(&self, options: &toml::Table) -> H {
        self(options)
    }
}
