//! UDP socket used for List Identity broadcasts.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::codec::ETHERNET_IP_PORT;
use crate::error::{CommissionError, Result};

/// Largest datagram read from the socket.
const MAX_DATAGRAM_SIZE: usize = 1500;

/// One datagram collected during a receive window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedDatagram {
    pub data: Vec<u8>,
    pub source: SocketAddr,
}

/// Broadcast-capable UDP socket bound to one local adapter.
pub struct DiscoverySocket {
    socket: UdpSocket,
    local_addr: SocketAddrV4,
}

impl DiscoverySocket {
    /// Binds to `adapter:44818`, falling back to an ephemeral port when
    /// 44818 is already taken on that adapter.
    pub fn bind(adapter: Ipv4Addr) -> Result<Self> {
        let socket = match create_socket(SocketAddrV4::new(adapter, ETHERNET_IP_PORT)) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(
                    "Cannot bind {}:{} ({}), using an ephemeral port",
                    adapter, ETHERNET_IP_PORT, e
                );
                create_socket(SocketAddrV4::new(adapter, 0)).map_err(|e| {
                    CommissionError::transport(
                        format!("failed to bind discovery socket on {}", adapter),
                        e,
                    )
                })?
            }
        };

        let local_addr = match socket.local_addr() {
            Ok(SocketAddr::V4(addr)) => addr,
            Ok(_) => SocketAddrV4::new(adapter, 0),
            Err(e) => return Err(CommissionError::transport("failed to read local address", e)),
        };
        debug!("Discovery socket bound to {}", local_addr);

        Ok(Self { socket, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub async fn send_to(&self, data: &[u8], dest: SocketAddrV4) -> Result<()> {
        self.socket
            .send_to(data, dest)
            .await
            .map_err(|e| CommissionError::transport(format!("failed to send to {}", dest), e))?;
        Ok(())
    }

    /// Collects every datagram that arrives within `window`, polling in
    /// `poll` slices so the caller's future can be dropped promptly.
    pub async fn collect(&self, window: Duration, poll: Duration) -> Result<Vec<ReceivedDatagram>> {
        let deadline = Instant::now() + window;
        let mut received = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        while Instant::now() < deadline {
            let slice = poll.min(deadline.saturating_duration_since(Instant::now()));
            match timeout(slice, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, source))) => received.push(ReceivedDatagram {
                    data: buf[..len].to_vec(),
                    source,
                }),
                Ok(Err(e)) if is_transient(&e) => {
                    debug!("Transient receive error: {}", e);
                }
                Ok(Err(e)) => {
                    return Err(CommissionError::transport("failed to receive datagram", e));
                }
                Err(_) => {}
            }
        }

        Ok(received)
    }
}

/// Create a UDP socket with broadcast enabled.
fn create_socket(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// ICMP port-unreachable from an earlier send surfaces as a receive error
/// on some platforms; it does not invalidate the socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_returns_datagrams_within_window() {
        let socket = DiscoverySocket::bind(Ipv4Addr::LOCALHOST).unwrap();
        let target = socket.local_addr();

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hello", target).unwrap();
        sender.send_to(b"world", target).unwrap();

        let datagrams = socket
            .collect(Duration::from_millis(200), Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].data, b"hello");
        assert_eq!(datagrams[1].source, sender.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_collect_empty_window_waits_and_returns() {
        let socket = DiscoverySocket::bind(Ipv4Addr::LOCALHOST).unwrap();
        let started = Instant::now();
        let datagrams = socket
            .collect(Duration::from_millis(120), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(datagrams.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
