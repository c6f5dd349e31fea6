//! Server Module
//!
//! Accept loop and connection table for server-side connections.

pub mod manager;

pub use manager::{ConnectionInfo, ConnectionServer, ConnectionStats};
