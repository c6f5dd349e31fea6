//! Packet Module
//!
//! The message unit exchanged by connections and the length-prefixed framing
//! used to carry it over a byte stream.

pub mod codec;
pub mod stream;

pub use codec::{PacketCodec, DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE};
pub use stream::PacketStream;
