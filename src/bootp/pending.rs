//! Bounded map of BootP requests awaiting an assignment decision.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use macaddr::MacAddr6;

use crate::domain::BootpRequestEvent;

/// Outstanding requests kept at most.
pub const PENDING_CAPACITY: usize = 64;

/// Requests older than this are forgotten.
pub const PENDING_TTL: Duration = Duration::from_secs(5 * 60);

/// Transaction id plus client hardware address.
pub type RequestKey = (u32, MacAddr6);

#[derive(Debug)]
pub struct PendingRequests {
    entries: HashMap<RequestKey, BootpRequestEvent>,
    capacity: usize,
    ttl: Duration,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new(PENDING_CAPACITY, PENDING_TTL)
    }
}

impl PendingRequests {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn key_of(event: &BootpRequestEvent) -> RequestKey {
        (event.packet.xid, event.packet.client_mac())
    }

    /// Records a request. Returns `true` for a new request and `false` for
    /// a retransmission, which only refreshes the stored entry.
    pub fn insert(&mut self, event: BootpRequestEvent) -> bool {
        self.purge_expired(event.received_at);

        let key = Self::key_of(&event);
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = event;
            return false;
        }

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.received_at)
                .map(|(key, _)| *key)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, event);
        true
    }

    pub fn get(&self, xid: u32, mac: MacAddr6) -> Option<&BootpRequestEvent> {
        self.entries.get(&(xid, mac))
    }

    pub fn remove(&mut self, xid: u32, mac: MacAddr6) -> Option<BootpRequestEvent> {
        self.entries.remove(&(xid, mac))
    }

    /// Drops entries received more than the TTL before `now`.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.received_at) < ttl);
        before - self.entries.len()
    }

    /// Outstanding requests, oldest first.
    pub fn list(&self) -> Vec<BootpRequestEvent> {
        let mut events: Vec<_> = self.entries.values().cloned().collect();
        events.sort_by_key(|e| e.received_at);
        events
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bootp::tests::create_test_packet;
    use crate::domain::BOOTREQUEST;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn event(xid: u32, received_at: Instant) -> BootpRequestEvent {
        let mut packet = create_test_packet(BOOTREQUEST, 0, Vec::new());
        packet.xid = xid;
        let mut event = BootpRequestEvent::new(
            packet,
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68)),
        );
        event.received_at = received_at;
        event
    }

    #[test]
    fn test_retransmission_refreshes_entry() {
        let mut pending = PendingRequests::default();
        let start = Instant::now();
        assert!(pending.insert(event(1, start)));
        assert!(!pending.insert(event(1, start + Duration::from_secs(2))));

        assert_eq!(pending.len(), 1);
        let mac = pending.list()[0].packet.client_mac();
        assert_eq!(
            pending.get(1, mac).unwrap().received_at,
            start + Duration::from_secs(2)
        );
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut pending = PendingRequests::new(2, PENDING_TTL);
        let start = Instant::now();
        pending.insert(event(1, start));
        pending.insert(event(2, start + Duration::from_millis(1)));
        pending.insert(event(3, start + Duration::from_millis(2)));

        let xids: Vec<_> = pending.list().iter().map(|e| e.packet.xid).collect();
        assert_eq!(xids, vec![2, 3]);
    }

    #[test]
    fn test_expired_entries_purged() {
        let mut pending = PendingRequests::default();
        let start = Instant::now();
        pending.insert(event(1, start));

        assert_eq!(pending.purge_expired(start + Duration::from_secs(299)), 0);
        assert_eq!(pending.purge_expired(start + PENDING_TTL), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_remove_by_transaction() {
        let mut pending = PendingRequests::default();
        let e = event(7, Instant::now());
        let mac = e.packet.client_mac();
        pending.insert(e);

        assert!(pending.remove(7, mac).is_some());
        assert!(pending.remove(7, mac).is_none());
    }
}
