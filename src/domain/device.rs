//! Discovered device model.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Instant;

use macaddr::MacAddr6;

/// Firmware revision reported in the identity object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Revision {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.major, self.minor)
    }
}

/// Derived health of a device's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Ok,
    /// Address in 169.254.0.0/16, the device never got a real address.
    LinkLocal,
    /// Another device answered with the same address.
    Conflict,
}

impl DeviceStatus {
    /// Status implied by the address alone.
    pub fn for_address(ip: Ipv4Addr) -> Self {
        if ip.is_link_local() {
            Self::LinkLocal
        } else {
            Self::Ok
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::LinkLocal => write!(f, "Link-local"),
            Self::Conflict => write!(f, "Conflict"),
        }
    }
}

/// Registry key for a device.
///
/// Devices are keyed by MAC. A device whose MAC could not be resolved is
/// keyed by its IP until resolution succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKey {
    Mac(MacAddr6),
    Unresolved(Ipv4Addr),
    /// A second identity answering from an address another device already
    /// claimed; the ARP table cannot tell the two apart.
    Shared {
        ip: Ipv4Addr,
        vendor_id: u16,
        serial_number: u32,
    },
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mac(mac) => write!(f, "{}", mac),
            Self::Unresolved(ip) => write!(f, "unresolved({})", ip),
            Self::Shared {
                ip,
                vendor_id,
                serial_number,
            } => write!(f, "{}#{:04X}:{:08X}", ip, vendor_id, serial_number),
        }
    }
}

/// A device found by discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub mac_address: Option<MacAddr6>,
    pub ip_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub vendor_id: u16,
    pub vendor_name: String,
    pub device_type: u16,
    pub product_code: u16,
    pub product_name: String,
    pub serial_number: u32,
    pub firmware_revision: Revision,
    pub status: DeviceStatus,
    pub last_seen: Instant,
    /// Consecutive discovery cycles without a reply.
    pub missed_scans: u32,
    pub(crate) conflict: bool,
    pub(crate) shared_address: bool,
}

impl Device {
    pub fn key(&self) -> DeviceKey {
        if self.shared_address {
            return DeviceKey::Shared {
                ip: self.ip_address,
                vendor_id: self.vendor_id,
                serial_number: self.serial_number,
            };
        }
        match self.mac_address {
            Some(mac) => DeviceKey::Mac(mac),
            None => DeviceKey::Unresolved(self.ip_address),
        }
    }

    /// Whether an address conflict has been flagged and not yet resolved.
    pub fn has_conflict(&self) -> bool {
        self.conflict
    }

    /// Recomputes `status`; a flagged conflict wins over the address.
    pub fn refresh_status(&mut self) {
        self.status = if self.conflict {
            DeviceStatus::Conflict
        } else {
            DeviceStatus::for_address(self.ip_address)
        };
    }

    /// Human-readable CIP device profile name.
    pub fn device_type_name(&self) -> &'static str {
        match self.device_type {
            0x00 => "Generic Device",
            0x02 => "AC Drive",
            0x07 => "General Purpose Discrete I/O",
            0x0C => "Communications Adapter",
            0x0E => "Programmable Logic Controller",
            0x13 => "DC Drive",
            0x18 => "Human-Machine Interface",
            0x2B => "Generic Device (keyable)",
            _ => "Unknown Device Type",
        }
    }
}
