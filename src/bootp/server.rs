//! BootP/DHCP commissioning server.
//!
//! Listens for BOOTREQUESTs from devices in factory-default state and
//! reports them; it never assigns an address on its own. The caller answers
//! with [`BootpServer::send_reply`] once an operator has chosen one.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use macaddr::MacAddr6;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::pending::{PendingRequests, PENDING_CAPACITY};
use crate::codec::{build_bootp_reply, parse_bootp_packet};
use crate::domain::{BootPPacket, BootpRequestEvent};
use crate::error::{CommissionError, Result};

/// BootP client port; devices send from and listen on it.
pub const BOOTP_CLIENT_PORT: u16 = 68;

/// Largest datagram read from the socket.
const MAX_DATAGRAM_SIZE: usize = 1500;

struct Running {
    socket: Arc<UdpSocket>,
    server_ip: Ipv4Addr,
    local_addr: SocketAddrV4,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Stopped until [`start`](Self::start), Listening until [`stop`](Self::stop).
pub struct BootpServer {
    listen_port: u16,
    client_port: u16,
    pending: Arc<Mutex<PendingRequests>>,
    running: Option<Running>,
}

impl Default for BootpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl BootpServer {
    pub fn new() -> Self {
        Self {
            listen_port: BOOTP_CLIENT_PORT,
            client_port: BOOTP_CLIENT_PORT,
            pending: Arc::new(Mutex::new(PendingRequests::default())),
            running: None,
        }
    }

    /// Port to listen on (68 unless overridden).
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Port replies are addressed to (68 unless overridden).
    pub fn with_client_port(mut self, port: u16) -> Self {
        self.client_port = port;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Binds `0.0.0.0:<listen port>` and spawns the receive loop.
    ///
    /// `local_adapter` becomes the server address (`siaddr`) in replies.
    /// Each new BOOTREQUEST is delivered on the returned channel. Must be
    /// called within a Tokio runtime.
    pub fn start(&mut self, local_adapter: Ipv4Addr) -> Result<mpsc::Receiver<BootpRequestEvent>> {
        if self.running.is_some() {
            return Err(CommissionError::AlreadyRunning);
        }

        let socket = Arc::new(bind_socket(self.listen_port)?);
        let local_addr = match socket.local_addr() {
            Ok(SocketAddr::V4(addr)) => addr,
            _ => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.listen_port),
        };
        info!(
            "BootP server listening on {} (server address {})",
            local_addr, local_adapter
        );

        let (events_tx, events_rx) = mpsc::channel(PENDING_CAPACITY);
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            Arc::clone(&shutdown),
            Arc::clone(&self.pending),
            events_tx,
        ));

        self.running = Some(Running {
            socket,
            server_ip: local_adapter,
            local_addr,
            shutdown,
            task,
        });
        Ok(events_rx)
    }

    /// Cancels the receive loop and releases the socket.
    pub async fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(CommissionError::NotRunning)?;
        running.shutdown.notify_one();
        if let Err(e) = running.task.await {
            error!("BootP receive loop ended abnormally: {}", e);
        }
        lock(&self.pending).clear();
        info!("BootP server stopped");
        Ok(())
    }

    /// Requests still waiting for an assignment, oldest first.
    pub fn pending_requests(&self) -> Vec<BootpRequestEvent> {
        let mut pending = lock(&self.pending);
        pending.purge_expired(std::time::Instant::now());
        pending.list()
    }

    /// Sends a BOOTREPLY assigning `assigned_ip` to the client that sent
    /// `request`. Returns the destination used.
    pub async fn send_reply(
        &self,
        request: &BootPPacket,
        assigned_ip: Ipv4Addr,
        subnet_mask: Ipv4Addr,
        gateway: Option<Ipv4Addr>,
    ) -> Result<SocketAddrV4> {
        let running = self.running.as_ref().ok_or(CommissionError::NotRunning)?;

        let reply = build_bootp_reply(request, assigned_ip, running.server_ip, subnet_mask, gateway);
        let dest = reply_destination(request, assigned_ip, self.client_port);

        running
            .socket
            .send_to(&reply, dest)
            .await
            .map_err(|e| CommissionError::transport(format!("failed to send BOOTREPLY to {}", dest), e))?;

        lock(&self.pending).remove(request.xid, request.client_mac());
        info!(
            "Assigned {} to {} (XID 0x{:08X}) via {}",
            assigned_ip,
            request.client_mac(),
            request.xid,
            dest
        );
        Ok(dest)
    }

    /// Answers a pending request identified by transaction id and MAC.
    pub async fn reply_to(
        &self,
        xid: u32,
        mac: MacAddr6,
        assigned_ip: Ipv4Addr,
        subnet_mask: Ipv4Addr,
        gateway: Option<Ipv4Addr>,
    ) -> Result<SocketAddrV4> {
        let request = lock(&self.pending)
            .get(xid, mac)
            .map(|event| event.packet.clone())
            .ok_or_else(|| CommissionError::UnknownRequest {
                xid,
                mac: mac.to_string(),
            })?;
        self.send_reply(&request, assigned_ip, subnet_mask, gateway).await
    }
}

impl Drop for BootpServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.notify_one();
            running.task.abort();
            debug!("BootP server on {} dropped while listening", running.local_addr);
        }
    }
}

/// Broadcast when the client set the BROADCAST flag, otherwise unicast to
/// the address being assigned.
pub fn reply_destination(request: &BootPPacket, assigned_ip: Ipv4Addr, client_port: u16) -> SocketAddrV4 {
    if request.wants_broadcast() {
        SocketAddrV4::new(Ipv4Addr::BROADCAST, client_port)
    } else {
        SocketAddrV4::new(assigned_ip, client_port)
    }
}

fn lock(pending: &Mutex<PendingRequests>) -> MutexGuard<'_, PendingRequests> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create the listening socket. No SO_REUSEADDR, so a second server on the
/// same port fails instead of sharing requests.
fn bind_socket(port: u16) -> Result<UdpSocket> {
    let create = || -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        UdpSocket::from_std(socket.into())
    };

    create().map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied => CommissionError::PrivilegeDenied { port },
        io::ErrorKind::AddrInUse => CommissionError::AddressInUse { port },
        _ => CommissionError::transport(format!("failed to bind UDP port {}", port), e),
    })
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    shutdown: Arc<Notify>,
    pending: Arc<Mutex<PendingRequests>>,
    events: mpsc::Sender<BootpRequestEvent>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, source)) => handle_datagram(&buf[..len], source, &pending, &events),
                Err(e) => debug!("BootP receive error: {}", e),
            },
        }
    }
}

fn handle_datagram(
    data: &[u8],
    source: SocketAddr,
    pending: &Mutex<PendingRequests>,
    events: &mpsc::Sender<BootpRequestEvent>,
) {
    let packet = match parse_bootp_packet(data) {
        Ok(packet) => packet,
        Err(e) => {
            debug!("Ignoring datagram from {}: {}", source, e);
            return;
        }
    };
    if !packet.is_request() {
        debug!("Ignoring op {} from {}", packet.op, source);
        return;
    }

    let event = BootpRequestEvent::new(packet, source);
    if !lock(pending).insert(event.clone()) {
        debug!(
            "Retransmission from {} (XID 0x{:08X})",
            event.packet.client_mac(),
            event.transaction_id()
        );
        return;
    }

    info!(
        "BOOTREQUEST from {} (XID 0x{:08X}){}",
        event.packet.client_mac(),
        event.transaction_id(),
        event
            .packet
            .host_name()
            .map(|name| format!(" host {}", name))
            .unwrap_or_default()
    );
    if let Err(e) = events.try_send(event) {
        warn!("BootP request not delivered: {}", e);
    }
}
