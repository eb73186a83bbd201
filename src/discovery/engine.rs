//! Broadcast discovery of EtherNet/IP devices.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use macaddr::MacAddr6;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::arp::MacResolver;
use super::registry::{DeviceRegistry, DEFAULT_STALE_THRESHOLD};
use crate::codec::{
    build_list_identity_request, fresh_sender_context, parse_list_identity_response,
    IdentityRecord, SenderContext, ETHERNET_IP_PORT,
};
use crate::domain::{Device, DeviceStatus, RegistryEvent};
use crate::error::{CommissionError, Result};
use crate::transport::{DiscoverySocket, ReceivedDatagram};
use crate::vendors::vendor_name;

/// Capacity of the registry event channel per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timing knobs for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// How long replies are collected after the broadcast.
    pub window: Duration,
    /// Receive poll granularity inside the window.
    pub poll_interval: Duration,
    pub stale_threshold: u32,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(50),
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Distinct devices that answered.
    pub responses: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Registry size after the pass.
    pub registered: usize,
}

impl CycleSummary {
    fn record(&mut self, events: &[RegistryEvent]) {
        for event in events {
            match event {
                RegistryEvent::Added(_) => self.added += 1,
                RegistryEvent::Updated(_) => self.updated += 1,
                RegistryEvent::Removed(_) => self.removed += 1,
            }
        }
    }
}

/// Owns the discovery socket and the device registry.
///
/// Only one scan runs at a time; a concurrent call fails with
/// [`CommissionError::ScanInProgress`].
pub struct DiscoveryEngine {
    socket: Mutex<Option<DiscoverySocket>>,
    registry: Arc<RwLock<DeviceRegistry>>,
    resolver: Arc<dyn MacResolver>,
    events: broadcast::Sender<RegistryEvent>,
    settings: DiscoverySettings,
}

impl DiscoveryEngine {
    pub fn new(resolver: Arc<dyn MacResolver>) -> Self {
        Self::with_settings(resolver, DiscoverySettings::default())
    }

    pub fn with_settings(resolver: Arc<dyn MacResolver>, settings: DiscoverySettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            socket: Mutex::new(None),
            registry: Arc::new(RwLock::new(DeviceRegistry::new())),
            resolver,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> DiscoverySettings {
        self.settings
    }

    /// Shared handle to the registry. Hold the write lock only briefly;
    /// scans take it once per reply.
    pub fn registry(&self) -> Arc<RwLock<DeviceRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Subscribe to Added/Updated/Removed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Current registry contents ordered by IP.
    pub async fn devices(&self) -> Vec<Device> {
        self.registry.read().await.snapshot()
    }

    /// Broadcasts List Identity and folds the replies into the registry.
    ///
    /// Returns the number of distinct devices that answered. Missed-scan
    /// counters are left alone; see [`run_cycle`](Self::run_cycle).
    pub async fn scan(&self, adapter: Ipv4Addr, mask: Ipv4Addr, window: Duration) -> Result<usize> {
        let summary = self.scan_inner(adapter, mask, window, false).await?;
        Ok(summary.responses)
    }

    /// One full discovery cycle: mark every device missed, scan with the
    /// configured window, then evict devices that reached the threshold.
    pub async fn run_cycle(&self, adapter: Ipv4Addr, mask: Ipv4Addr) -> Result<CycleSummary> {
        self.scan_inner(adapter, mask, self.settings.window, true).await
    }

    /// Evicts devices that missed `threshold` consecutive cycles.
    pub async fn evict_stale(&self, threshold: u32) -> usize {
        let removed = self.registry.write().await.evict_stale(threshold);
        let count = removed.len();
        self.publish(removed);
        count
    }

    /// Drops the registry row for a device that was just readdressed.
    pub async fn remove_by_ip(&self, ip: Ipv4Addr) -> usize {
        let removed = self.registry.write().await.remove_by_ip(ip);
        let count = removed.len();
        self.publish(removed);
        count
    }

    async fn scan_inner(
        &self,
        adapter: Ipv4Addr,
        mask: Ipv4Addr,
        window: Duration,
        cycle: bool,
    ) -> Result<CycleSummary> {
        let mut slot = self
            .socket
            .try_lock()
            .map_err(|_| CommissionError::ScanInProgress)?;

        let socket = match slot.take() {
            Some(socket) if *socket.local_addr().ip() == adapter => socket,
            _ => DiscoverySocket::bind(adapter)?,
        };

        let context = fresh_sender_context();
        let request = build_list_identity_request(context);
        let directed = directed_broadcast(adapter, mask);

        info!("Scanning from {} (directed broadcast {})", adapter, directed);
        socket
            .send_to(&request, SocketAddrV4::new(Ipv4Addr::BROADCAST, ETHERNET_IP_PORT))
            .await?;
        if directed != Ipv4Addr::BROADCAST {
            socket
                .send_to(&request, SocketAddrV4::new(directed, ETHERNET_IP_PORT))
                .await?;
        }

        let datagrams = socket.collect(window, self.settings.poll_interval).await?;
        *slot = Some(socket);
        debug!("Collected {} datagram(s)", datagrams.len());

        if cycle {
            self.registry.write().await.begin_cycle();
        }
        let mut summary = self.process_replies(adapter, mask, context, datagrams).await;
        if cycle {
            let removed = self.registry.write().await.evict_stale(self.settings.stale_threshold);
            summary.record(&removed);
            self.publish(removed);
        }
        summary.registered = self.registry.read().await.len();

        info!(
            "Scan complete: {} responded, {} added, {} removed, {} registered",
            summary.responses, summary.added, summary.removed, summary.registered
        );
        Ok(summary)
    }

    /// Decodes, resolves and registers each datagram. Malformed replies and
    /// the adapter's own broadcast echo are skipped.
    pub(crate) async fn process_replies(
        &self,
        adapter: Ipv4Addr,
        mask: Ipv4Addr,
        context: SenderContext,
        datagrams: Vec<ReceivedDatagram>,
    ) -> CycleSummary {
        let mut summary = CycleSummary::default();
        // Identities (vendor, serial) seen at each address in this window.
        let mut seen: HashMap<Ipv4Addr, Vec<(u16, u32)>> = HashMap::new();

        for datagram in datagrams {
            let source = match datagram.source {
                SocketAddr::V4(source) => *source.ip(),
                SocketAddr::V6(_) => continue,
            };
            if source == adapter {
                continue;
            }

            let record = match parse_list_identity_response(&datagram.data) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Discarding reply from {}: {}", source, e);
                    continue;
                }
            };
            if record.sender_context != context {
                debug!("Reply from {} carries a foreign sender context", source);
            }

            let ip = device_address(&record, source);
            let identity = (record.vendor_id, record.serial_number);
            let claimed = seen.entry(ip).or_default();
            if claimed.contains(&identity) {
                continue;
            }
            let shared = !claimed.is_empty();
            claimed.push(identity);

            let mut device = if shared {
                warn!(
                    "Second device (serial {:08X}) answered from {}",
                    record.serial_number, ip
                );
                device_from_identity(&record, ip, None, mask)
            } else {
                let mac = self.resolve_mac(ip).await;
                device_from_identity(&record, ip, mac, mask)
            };
            device.shared_address = shared;
            debug!(
                "{} at {} ({}, serial {:08X})",
                device.product_name, ip, device.vendor_name, device.serial_number
            );

            let events = self.registry.write().await.upsert(device);
            summary.responses += 1;
            summary.record(&events);
            self.publish(events);
        }

        summary
    }

    async fn resolve_mac(&self, ip: Ipv4Addr) -> Option<MacAddr6> {
        let resolver = Arc::clone(&self.resolver);
        match tokio::task::spawn_blocking(move || resolver.resolve(ip)).await {
            Ok(mac) => mac,
            Err(e) => {
                warn!("MAC resolution for {} failed: {}", ip, e);
                None
            }
        }
    }

    fn publish(&self, events: Vec<RegistryEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

/// `adapter | !mask`
pub fn directed_broadcast(adapter: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(adapter) | !u32::from(mask))
}

/// The address a device reports in its identity item, or the datagram
/// source when the device leaves it unspecified.
fn device_address(record: &IdentityRecord, source: Ipv4Addr) -> Ipv4Addr {
    let reported = *record.socket_address.ip();
    if reported.is_unspecified() {
        source
    } else {
        reported
    }
}

/// Builds a registry entry from a decoded identity item.
pub fn device_from_identity(
    record: &IdentityRecord,
    ip: Ipv4Addr,
    mac: Option<MacAddr6>,
    mask: Ipv4Addr,
) -> Device {
    Device {
        mac_address: mac,
        ip_address: ip,
        subnet_mask: mask,
        gateway: None,
        vendor_id: record.vendor_id,
        vendor_name: vendor_name(record.vendor_id),
        device_type: record.device_type,
        product_code: record.product_code,
        product_name: record.product_name.clone(),
        serial_number: record.serial_number,
        firmware_revision: record.revision,
        status: DeviceStatus::for_address(ip),
        last_seen: Instant::now(),
        missed_scans: 0,
        conflict: false,
        shared_address: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::identity::tests::identity_reply;
    use crate::discovery::arp::UnknownMacResolver;
    use crate::domain::DeviceKey;

    const CONTEXT: SenderContext = [1, 1, 2, 2, 3, 3, 4, 4];

    fn adapter() -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, 2)
    }

    fn mask() -> Ipv4Addr {
        Ipv4Addr::new(255, 255, 255, 0)
    }

    struct FixedResolver(HashMap<Ipv4Addr, MacAddr6>);

    impl MacResolver for FixedResolver {
        fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr6> {
            self.0.get(&ip).copied()
        }
    }

    fn engine_with(entries: &[(Ipv4Addr, MacAddr6)]) -> DiscoveryEngine {
        DiscoveryEngine::new(Arc::new(FixedResolver(entries.iter().copied().collect())))
    }

    fn datagram(ip: Ipv4Addr, serial: u32) -> ReceivedDatagram {
        ReceivedDatagram {
            data: identity_reply(ip, serial, "1756-EN2T"),
            source: SocketAddr::V4(SocketAddrV4::new(ip, ETHERNET_IP_PORT)),
        }
    }

    fn mac(last: u8) -> MacAddr6 {
        MacAddr6::new(0x00, 0x00, 0xbc, 0x00, 0x00, last)
    }

    mod reply_tests {
        use super::*;

        #[tokio::test]
        async fn test_replies_become_devices() {
            let ip = Ipv4Addr::new(192, 168, 1, 50);
            let engine = engine_with(&[(ip, mac(1))]);

            let summary = engine
                .process_replies(adapter(), mask(), CONTEXT, vec![datagram(ip, 0xABCD)])
                .await;

            assert_eq!(summary.responses, 1);
            assert_eq!(summary.added, 1);
            let devices = engine.devices().await;
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].mac_address, Some(mac(1)));
            assert_eq!(devices[0].serial_number, 0xABCD);
            assert_eq!(devices[0].subnet_mask, mask());
            assert_eq!(devices[0].vendor_name, "Rockwell Automation/Allen-Bradley");
        }

        #[tokio::test]
        async fn test_malformed_reply_does_not_abort_batch() {
            let good = Ipv4Addr::new(192, 168, 1, 51);
            let engine = engine_with(&[(good, mac(2))]);

            let mut truncated = datagram(Ipv4Addr::new(192, 168, 1, 60), 1);
            truncated.data.truncate(30);

            let summary = engine
                .process_replies(adapter(), mask(), CONTEXT, vec![truncated, datagram(good, 2)])
                .await;

            assert_eq!(summary.responses, 1);
            assert_eq!(engine.devices().await[0].ip_address, good);
        }

        #[tokio::test]
        async fn test_self_echo_ignored() {
            let engine = engine_with(&[]);
            let echo = ReceivedDatagram {
                data: vec![0x63, 0x00],
                source: SocketAddr::V4(SocketAddrV4::new(adapter(), ETHERNET_IP_PORT)),
            };
            let summary = engine.process_replies(adapter(), mask(), CONTEXT, vec![echo]).await;
            assert_eq!(summary.responses, 0);
            assert!(engine.devices().await.is_empty());
        }

        #[tokio::test]
        async fn test_duplicate_reply_counted_once() {
            let ip = Ipv4Addr::new(192, 168, 1, 50);
            let engine = engine_with(&[(ip, mac(1))]);

            let summary = engine
                .process_replies(adapter(), mask(), CONTEXT, vec![datagram(ip, 7), datagram(ip, 7)])
                .await;

            assert_eq!(summary.responses, 1);
            assert_eq!(summary.updated, 0);
        }

        #[tokio::test]
        async fn test_two_identities_at_one_address_both_kept_as_conflict() {
            let ip = Ipv4Addr::new(192, 168, 1, 250);
            let engine = engine_with(&[(ip, mac(1))]);

            let summary = engine
                .process_replies(adapter(), mask(), CONTEXT, vec![datagram(ip, 1), datagram(ip, 2)])
                .await;
            assert_eq!(summary.responses, 2);
            assert_eq!(summary.added, 2);

            let devices = engine.devices().await;
            let mut serials: Vec<u32> = devices.iter().map(|d| d.serial_number).collect();
            serials.sort_unstable();
            assert_eq!(serials, vec![1, 2]);
            assert!(devices.iter().all(|d| d.status == DeviceStatus::Conflict));

            let registry = engine.registry();
            let registry = registry.read().await;
            assert_eq!(registry.get(&DeviceKey::Mac(mac(1))).unwrap().serial_number, 1);
            assert!(registry
                .get(&DeviceKey::Shared {
                    ip,
                    vendor_id: 1,
                    serial_number: 2
                })
                .is_some());
        }

        #[tokio::test]
        async fn test_foreign_context_still_accepted() {
            let ip = Ipv4Addr::new(192, 168, 1, 50);
            let engine = engine_with(&[(ip, mac(1))]);
            let summary = engine
                .process_replies(adapter(), mask(), [9; 8], vec![datagram(ip, 7)])
                .await;
            assert_eq!(summary.responses, 1);
        }

        #[tokio::test]
        async fn test_unresolved_mac_keyed_by_ip() {
            let ip = Ipv4Addr::new(192, 168, 1, 50);
            let engine = DiscoveryEngine::new(Arc::new(UnknownMacResolver));
            engine
                .process_replies(adapter(), mask(), CONTEXT, vec![datagram(ip, 7)])
                .await;

            let registry = engine.registry();
            let registry = registry.read().await;
            assert!(registry.get(&DeviceKey::Unresolved(ip)).is_some());
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn test_subscribers_see_added_then_removed() {
            let ip = Ipv4Addr::new(192, 168, 1, 50);
            let engine = engine_with(&[(ip, mac(1))]);
            let mut events = engine.subscribe();

            engine
                .process_replies(adapter(), mask(), CONTEXT, vec![datagram(ip, 7)])
                .await;
            assert!(matches!(events.recv().await.unwrap(), RegistryEvent::Added(_)));

            assert_eq!(engine.remove_by_ip(ip).await, 1);
            assert!(matches!(events.recv().await.unwrap(), RegistryEvent::Removed(_)));
        }

        #[tokio::test]
        async fn test_stale_device_evicted_after_threshold() {
            let ip = Ipv4Addr::new(192, 168, 1, 50);
            let engine = engine_with(&[(ip, mac(1))]);
            engine
                .process_replies(adapter(), mask(), CONTEXT, vec![datagram(ip, 7)])
                .await;

            for _ in 0..3 {
                engine.registry().write().await.begin_cycle();
            }
            assert_eq!(engine.evict_stale(3).await, 1);
            assert!(engine.devices().await.is_empty());
        }

        #[tokio::test]
        async fn test_concurrent_scan_rejected() {
            let engine = engine_with(&[]);
            let _held = engine.socket.lock().await;
            let result = engine
                .scan(Ipv4Addr::LOCALHOST, mask(), Duration::from_millis(10))
                .await;
            assert!(matches!(result, Err(CommissionError::ScanInProgress)));
        }
    }

    #[test]
    fn test_directed_broadcast() {
        assert_eq!(
            directed_broadcast(Ipv4Addr::new(10, 20, 30, 40), Ipv4Addr::new(255, 255, 0, 0)),
            Ipv4Addr::new(10, 20, 255, 255)
        );
        assert_eq!(
            directed_broadcast(Ipv4Addr::new(192, 168, 1, 2), mask()),
            Ipv4Addr::new(192, 168, 1, 255)
        );
    }

    #[test]
    fn test_unspecified_identity_address_uses_source() {
        let data = identity_reply(Ipv4Addr::UNSPECIFIED, 1, "x");
        let record = parse_list_identity_response(&data).unwrap();
        let source = Ipv4Addr::new(192, 168, 1, 77);
        assert_eq!(device_address(&record, source), source);
    }
}
