//! Transport Module
//!
//! TCP plumbing shared by the server and the client: socket splitting, the
//! per-connection writer task and the receive loop.

pub(crate) mod receiver;
pub mod socket;

pub use socket::{closed, CloseSignal, FrameSender, SocketHandle, SocketTransport};
