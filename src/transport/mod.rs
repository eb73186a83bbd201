//! Socket ownership for discovery and configuration.
//!
//! The transport layer only moves bytes; it never interprets payloads.

mod tcp;
mod udp;

pub use tcp::connect_from;
pub use udp::{DiscoverySocket, ReceivedDatagram};

/// Per-operation network timeout (connect, send, each reply).
pub const OPERATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);
