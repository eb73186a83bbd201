//! Device registry keyed by MAC address.
//!
//! Every mutation returns the [`RegistryEvent`]s it caused so the owner can
//! fan them out to observers. The registry itself holds no lock; the
//! discovery engine wraps it in one.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use macaddr::MacAddr6;
use tracing::{debug, info, warn};

use crate::domain::{Device, DeviceKey, RegistryEvent};

/// Devices absent for this many consecutive cycles are evicted.
pub const DEFAULT_STALE_THRESHOLD: u32 = 3;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceKey, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, key: &DeviceKey) -> Option<&Device> {
        self.devices.get(key)
    }

    /// All devices ordered by IP address.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| (d.ip_address, d.key()));
        devices
    }

    /// Marks every device as missed for the cycle about to run. A device
    /// that answers during the cycle is reset by [`upsert`](Self::upsert).
    pub fn begin_cycle(&mut self) {
        for device in self.devices.values_mut() {
            device.missed_scans = device.missed_scans.saturating_add(1);
        }
    }

    /// Inserts a freshly discovered device or refreshes the existing row.
    pub fn upsert(&mut self, mut device: Device) -> Vec<RegistryEvent> {
        let mut events = Vec::new();

        match device.key() {
            DeviceKey::Mac(_) => {
                // The same device answered earlier without a resolvable MAC.
                if let Some(old) = self.devices.remove(&DeviceKey::Unresolved(device.ip_address)) {
                    debug!("{} resolved to {}", old.ip_address, device.key());
                    events.push(RegistryEvent::Removed(old));
                }
            }
            DeviceKey::Unresolved(ip) => {
                if let Some(mac) = self.only_mac_at(ip) {
                    debug!("Unresolved reply from {} attributed to {}", ip, mac);
                    device.mac_address = Some(mac);
                }
            }
            DeviceKey::Shared { .. } => {}
        }

        let key = device.key();
        let ip = device.ip_address;
        let added = match self.devices.get_mut(&key) {
            Some(existing) => {
                existing.ip_address = device.ip_address;
                existing.subnet_mask = device.subnet_mask;
                if device.gateway.is_some() {
                    existing.gateway = device.gateway;
                }
                existing.vendor_id = device.vendor_id;
                existing.vendor_name = device.vendor_name;
                existing.device_type = device.device_type;
                existing.product_code = device.product_code;
                existing.product_name = device.product_name;
                existing.serial_number = device.serial_number;
                existing.firmware_revision = device.firmware_revision;
                existing.last_seen = device.last_seen;
                existing.missed_scans = 0;
                existing.refresh_status();
                false
            }
            None => {
                device.missed_scans = 0;
                device.conflict = false;
                device.refresh_status();
                info!("New device {} at {}", key, ip);
                self.devices.insert(key, device);
                true
            }
        };

        self.flag_conflicts(key, ip, &mut events);

        if let Some(device) = self.devices.get(&key) {
            events.push(if added {
                RegistryEvent::Added(device.clone())
            } else {
                RegistryEvent::Updated(device.clone())
            });
        }
        events
    }

    /// Removes devices whose missed-scan count reached `threshold`.
    pub fn evict_stale(&mut self, threshold: u32) -> Vec<RegistryEvent> {
        let stale: Vec<DeviceKey> = self
            .devices
            .iter()
            .filter(|(_, d)| d.missed_scans >= threshold)
            .map(|(key, _)| *key)
            .collect();

        stale
            .into_iter()
            .filter_map(|key| self.devices.remove(&key))
            .map(|device| {
                info!("Device {} at {} went stale", device.key(), device.ip_address);
                RegistryEvent::Removed(device)
            })
            .collect()
    }

    /// Drops every device currently registered at `ip`, typically after
    /// the device was reconfigured to a new address.
    pub fn remove_by_ip(&mut self, ip: Ipv4Addr) -> Vec<RegistryEvent> {
        let keys: Vec<DeviceKey> = self
            .devices
            .iter()
            .filter(|(_, d)| d.ip_address == ip)
            .map(|(key, _)| *key)
            .collect();

        keys.into_iter()
            .filter_map(|key| self.devices.remove(&key))
            .map(RegistryEvent::Removed)
            .collect()
    }

    /// Clears a conflict flag after the operator re-resolved the address.
    pub fn resolve_conflict(&mut self, key: &DeviceKey) -> Option<RegistryEvent> {
        let device = self.devices.get_mut(key)?;
        if !device.conflict {
            return None;
        }
        device.conflict = false;
        device.refresh_status();
        info!("Conflict cleared for {} at {}", key, device.ip_address);
        Some(RegistryEvent::Updated(device.clone()))
    }

    fn only_mac_at(&self, ip: Ipv4Addr) -> Option<MacAddr6> {
        let mut macs = self
            .devices
            .values()
            .filter(|d| d.ip_address == ip)
            .filter_map(|d| d.mac_address);
        let first = macs.next()?;
        match macs.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    fn flag_conflicts(&mut self, key: DeviceKey, ip: Ipv4Addr, events: &mut Vec<RegistryEvent>) {
        let others: Vec<DeviceKey> = self
            .devices
            .iter()
            .filter(|(k, d)| **k != key && d.ip_address == ip)
            .map(|(k, _)| *k)
            .collect();
        if others.is_empty() {
            return;
        }

        warn!("Address conflict at {}: {} and {} other device(s)", ip, key, others.len());
        for other in others {
            if let Some(device) = self.devices.get_mut(&other) {
                if !device.conflict {
                    device.conflict = true;
                    device.refresh_status();
                    events.push(RegistryEvent::Updated(device.clone()));
                }
            }
        }
        if let Some(device) = self.devices.get_mut(&key) {
            device.conflict = true;
            device.refresh_status();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::tests::create_test_device;
    use crate::domain::DeviceStatus;

    fn mac(last: u8) -> MacAddr6 {
        MacAddr6::new(0x00, 0x1d, 0x9c, 0x00, 0x00, last)
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, last)
    }

    mod upsert_tests {
        use super::*;

        #[test]
        fn test_same_mac_new_ip_keeps_one_row() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            let events = registry.upsert(create_test_device(Some(mac(1)), ip(20)));

            assert_eq!(registry.len(), 1);
            assert_eq!(registry.get(&DeviceKey::Mac(mac(1))).unwrap().ip_address, ip(20));
            assert!(matches!(events.as_slice(), [RegistryEvent::Updated(_)]));
        }

        #[test]
        fn test_first_sighting_is_added() {
            let mut registry = DeviceRegistry::new();
            let events = registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            assert!(matches!(events.as_slice(), [RegistryEvent::Added(_)]));
        }

        #[test]
        fn test_status_recomputed_on_update() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), Ipv4Addr::new(169, 254, 1, 1)));
            assert_eq!(
                registry.get(&DeviceKey::Mac(mac(1))).unwrap().status,
                DeviceStatus::LinkLocal
            );

            registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            assert_eq!(registry.get(&DeviceKey::Mac(mac(1))).unwrap().status, DeviceStatus::Ok);
        }

        #[test]
        fn test_resolved_mac_replaces_unresolved_row() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(None, ip(10)));
            let events = registry.upsert(create_test_device(Some(mac(1)), ip(10)));

            assert_eq!(registry.len(), 1);
            assert!(registry.get(&DeviceKey::Unresolved(ip(10))).is_none());
            assert!(matches!(
                events.as_slice(),
                [RegistryEvent::Removed(_), RegistryEvent::Added(_)]
            ));
            assert_eq!(registry.get(&DeviceKey::Mac(mac(1))).unwrap().status, DeviceStatus::Ok);
        }

        #[test]
        fn test_unresolved_reply_refreshes_known_mac() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            registry.begin_cycle();
            registry.upsert(create_test_device(None, ip(10)));

            assert_eq!(registry.len(), 1);
            assert_eq!(registry.get(&DeviceKey::Mac(mac(1))).unwrap().missed_scans, 0);
        }
    }

    mod eviction_tests {
        use super::*;

        #[test]
        fn test_evicted_after_exactly_three_missed_cycles() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));

            for _ in 0..2 {
                registry.begin_cycle();
                assert!(registry.evict_stale(3).is_empty());
            }
            registry.begin_cycle();
            let removed = registry.evict_stale(3);

            assert_eq!(removed.len(), 1);
            assert!(registry.is_empty());
        }

        #[test]
        fn test_reappearing_resets_counter() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));

            registry.begin_cycle();
            registry.begin_cycle();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            assert_eq!(registry.get(&DeviceKey::Mac(mac(1))).unwrap().missed_scans, 0);

            registry.begin_cycle();
            registry.begin_cycle();
            assert!(registry.evict_stale(3).is_empty());
            assert_eq!(registry.len(), 1);
        }

        #[test]
        fn test_remove_by_ip() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            registry.upsert(create_test_device(Some(mac(2)), ip(11)));

            let removed = registry.remove_by_ip(ip(10));
            assert_eq!(removed.len(), 1);
            assert_eq!(removed[0].key(), DeviceKey::Mac(mac(1)));
            assert_eq!(registry.len(), 1);
        }
    }

    mod conflict_tests {
        use super::*;

        #[test]
        fn test_two_macs_same_ip_both_flagged() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            let events = registry.upsert(create_test_device(Some(mac(2)), ip(10)));

            assert_eq!(events.len(), 2);
            for key in [DeviceKey::Mac(mac(1)), DeviceKey::Mac(mac(2))] {
                assert_eq!(registry.get(&key).unwrap().status, DeviceStatus::Conflict);
            }
        }

        #[test]
        fn test_conflict_survives_normal_update() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            registry.upsert(create_test_device(Some(mac(2)), ip(10)));
            registry.upsert(create_test_device(Some(mac(2)), ip(11)));

            assert_eq!(
                registry.get(&DeviceKey::Mac(mac(2))).unwrap().status,
                DeviceStatus::Conflict
            );
        }

        #[test]
        fn test_resolve_conflict_clears_flag() {
            let mut registry = DeviceRegistry::new();
            registry.upsert(create_test_device(Some(mac(1)), ip(10)));
            registry.upsert(create_test_device(Some(mac(2)), ip(10)));
            registry.upsert(create_test_device(Some(mac(2)), ip(11)));

            let event = registry.resolve_conflict(&DeviceKey::Mac(mac(2)));
            assert!(matches!(event, Some(RegistryEvent::Updated(_))));
            assert_eq!(registry.get(&DeviceKey::Mac(mac(2))).unwrap().status, DeviceStatus::Ok);
            assert!(registry.resolve_conflict(&DeviceKey::Mac(mac(2))).is_none());
        }
    }

    #[test]
    fn test_snapshot_sorted_by_ip() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(create_test_device(Some(mac(1)), ip(30)));
        registry.upsert(create_test_device(Some(mac(2)), ip(5)));
        let ips: Vec<_> = registry.snapshot().iter().map(|d| d.ip_address).collect();
        assert_eq!(ips, vec![ip(5), ip(30)]);
    }
}
