//! Link-layer address resolution for discovered devices.
//!
//! List Identity replies carry no MAC address, so the engine asks the
//! operating system's neighbour table after the reply arrives.

use std::fs;
use std::net::{Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use macaddr::MacAddr6;
use tracing::debug;

/// Kernel neighbour table on Linux.
pub const PROC_ARP_TABLE: &str = "/proc/net/arp";

/// Discard port; the primer datagram only exists to trigger ARP.
const DISCARD_PORT: u16 = 9;

/// ARP flag bit marking a completed entry.
const ATF_COMPLETE: u32 = 0x02;

/// Resolves an IPv4 address to a MAC address.
///
/// Implementations may block; the engine calls them off the async runtime.
pub trait MacResolver: Send + Sync {
    fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr6>;
}

/// Reads the system ARP table, priming it with a datagram on a miss.
#[derive(Debug, Clone)]
pub struct ArpTableResolver {
    table_path: PathBuf,
    settle: Duration,
}

impl Default for ArpTableResolver {
    fn default() -> Self {
        Self::new(PROC_ARP_TABLE)
    }
}

impl ArpTableResolver {
    pub fn new(table_path: impl Into<PathBuf>) -> Self {
        Self {
            table_path: table_path.into(),
            settle: Duration::from_millis(50),
        }
    }

    /// How long to wait for the kernel to complete ARP after priming.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr6> {
        let contents = fs::read_to_string(&self.table_path)
            .map_err(|e| debug!("Cannot read {}: {}", self.table_path.display(), e))
            .ok()?;
        parse_arp_table(&contents, ip)
    }

    fn prime(&self, ip: Ipv4Addr) {
        let sent = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .and_then(|socket| socket.send_to(&[], (ip, DISCARD_PORT)));
        if let Err(e) = sent {
            debug!("ARP primer to {} failed: {}", ip, e);
        }
    }
}

impl MacResolver for ArpTableResolver {
    fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr6> {
        if let Some(mac) = self.lookup(ip) {
            return Some(mac);
        }
        self.prime(ip);
        thread::sleep(self.settle);
        self.lookup(ip)
    }
}

/// Resolver for hosts without an ARP facility; every device stays unresolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownMacResolver;

impl MacResolver for UnknownMacResolver {
    fn resolve(&self, _ip: Ipv4Addr) -> Option<MacAddr6> {
        None
    }
}

/// Finds the completed entry for `ip` in `/proc/net/arp` formatted text.
///
/// Columns: IP address, HW type, Flags, HW address, Mask, Device.
pub(crate) fn parse_arp_table(contents: &str, ip: Ipv4Addr) -> Option<MacAddr6> {
    contents.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[0].parse::<Ipv4Addr>().ok()? != ip {
            return None;
        }
        let flags = u32::from_str_radix(fields[2].trim_start_matches("0x"), 16).ok()?;
        if flags & ATF_COMPLETE == 0 {
            return None;
        }
        let mac: MacAddr6 = fields[3].parse().ok()?;
        (!mac.is_nil()).then_some(mac)
    })
}
