//! Error Types
//!
//! Typed errors for the connection lifecycle and the packet layer. Host and
//! application code work with `anyhow` on top of these.

use thiserror::Error;

use crate::connection::{ConnectionId, ConnectionState};

/// Lifecycle violations reported by a connection
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection {0} is already initialized")]
    AlreadyInitialized(ConnectionId),

    #[error("connection {0} has been disposed")]
    Disposed(ConnectionId),

    #[error("connection {id} handler panicked: {message}")]
    HandlerPanicked { id: ConnectionId, message: String },

    #[error("connection {id} cannot {operation} while {state}")]
    InvalidState {
        id: ConnectionId,
        state: ConnectionState,
        operation: &'static str,
    },
}

/// Failures while reading, writing or framing packets
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("unexpected end of packet: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("packet string is not valid UTF-8")]
    InvalidUtf8,

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid frame length {0}")]
    InvalidLength(i32),

    #[error("string of {len} bytes does not fit a u32 length prefix")]
    StringTooLong { len: usize },
}
