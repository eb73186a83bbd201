//! Domain events published to collaborators.

use std::net::SocketAddr;
use std::time::Instant;

use super::{BootPPacket, Device, DeviceKey};

/// A change to the device registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Added(Device),
    Updated(Device),
    Removed(Device),
}

impl RegistryEvent {
    pub fn device(&self) -> &Device {
        match self {
            Self::Added(d) | Self::Updated(d) | Self::Removed(d) => d,
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.device().key()
    }
}

/// A BOOTREQUEST awaiting an assignment decision.
#[derive(Debug, Clone)]
pub struct BootpRequestEvent {
    /// Timestamp when the request was received
    pub received_at: Instant,
    /// Where the request came from
    pub source: SocketAddr,
    pub packet: BootPPacket,
}

impl BootpRequestEvent {
    pub fn new(packet: BootPPacket, source: SocketAddr) -> Self {
        Self {
            received_at: Instant::now(),
            source,
            packet,
        }
    }

    pub fn transaction_id(&self) -> u32 {
        self.packet.xid
    }
}
