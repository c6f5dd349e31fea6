//! Connection Module
//!
//! The connection entity, its identity, the application hooks and the
//! session driver that invokes them in lifecycle order.

pub mod connection;
pub mod handler;
pub mod identity;
pub mod session;

pub use connection::{Connection, ConnectionState, PacketSender, TransportHandle};
pub use handler::{ConnectionFactory, ConnectionHandler, DefaultHandler};
pub use identity::ConnectionId;
pub use session::ConnectionSession;
