//! Local IPv4 adapter enumeration.

use std::fmt;
use std::net::Ipv4Addr;

use macaddr::MacAddr6;
use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;

/// One IPv4 address bound to a local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub name: String,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub mac: Option<MacAddr6>,
    pub is_up: bool,
    pub is_loopback: bool,
}

impl Adapter {
    /// Subnet-directed broadcast address for this adapter.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !u32::from(self.mask))
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).leading_ones()
    }
}

impl fmt::Display for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_up { "UP" } else { "DOWN" };
        write!(
            f,
            "{}: {}/{} {}",
            self.name,
            self.address,
            self.prefix_len(),
            status
        )?;
        if let Some(mac) = self.mac {
            write!(f, " [{}]", mac)?;
        }
        Ok(())
    }
}

/// Lists every IPv4 address on every interface, in interface order.
pub fn list_ipv4_adapters() -> Vec<Adapter> {
    datalink::interfaces()
        .iter()
        .flat_map(adapters_for)
        .collect()
}

/// Finds the adapter that owns `address`.
pub fn find_by_address(address: Ipv4Addr) -> Option<Adapter> {
    list_ipv4_adapters()
        .into_iter()
        .find(|adapter| adapter.address == address)
}

/// First adapter that is up and not a loopback.
pub fn default_adapter() -> Option<Adapter> {
    pick_default(list_ipv4_adapters())
}

fn pick_default(adapters: Vec<Adapter>) -> Option<Adapter> {
    adapters
        .into_iter()
        .find(|adapter| adapter.is_up && !adapter.is_loopback && !adapter.address.is_link_local())
}

fn adapters_for(iface: &NetworkInterface) -> Vec<Adapter> {
    let mac = iface
        .mac
        .filter(|mac| !mac.is_zero())
        .map(|mac| MacAddr6::new(mac.0, mac.1, mac.2, mac.3, mac.4, mac.5));

    iface
        .ips
        .iter()
        .filter_map(|network| match network {
            IpNetwork::V4(net) => Some(Adapter {
                name: iface.name.clone(),
                address: net.ip(),
                mask: net.mask(),
                mac,
                is_up: iface.is_up(),
                is_loopback: iface.is_loopback(),
            }),
            IpNetwork::V6(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, address: Ipv4Addr, up: bool, loopback: bool) -> Adapter {
        Adapter {
            name: name.to_string(),
            address,
            mask: Ipv4Addr::new(255, 255, 255, 0),
            mac: None,
            is_up: up,
            is_loopback: loopback,
        }
    }

    #[test]
    fn test_broadcast_and_prefix() {
        let a = adapter("eth0", Ipv4Addr::new(192, 168, 1, 10), true, false);
        assert_eq!(a.broadcast(), Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(a.prefix_len(), 24);
    }

    #[test]
    fn test_pick_default_skips_loopback_down_and_link_local() {
        let adapters = vec![
            adapter("lo", Ipv4Addr::LOCALHOST, true, true),
            adapter("eth1", Ipv4Addr::new(10, 0, 0, 2), false, false),
            adapter("eth2", Ipv4Addr::new(169, 254, 7, 7), true, false),
            adapter("eth0", Ipv4Addr::new(192, 168, 1, 10), true, false),
        ];
        assert_eq!(pick_default(adapters).unwrap().name, "eth0");
    }

    #[test]
    fn test_display() {
        let mut a = adapter("eth0", Ipv4Addr::new(192, 168, 1, 10), true, false);
        a.mac = Some(MacAddr6::new(0, 0x1d, 0x9c, 1, 2, 3));
        assert_eq!(a.to_string(), "eth0: 192.168.1.10/24 UP [00:1D:9C:01:02:03]");
    }

    #[test]
    fn test_loopback_listed() {
        let adapters = list_ipv4_adapters();
        assert!(adapters.iter().all(|a| !a.address.is_unspecified()));
    }
}
