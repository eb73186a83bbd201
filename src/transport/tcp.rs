//! Short-lived TCP connections for CIP sessions.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{CommissionError, Result};

/// Connects to `target`, binding the local side to `adapter` when given so
/// traffic leaves through the chosen interface.
pub async fn connect_from(
    adapter: Option<Ipv4Addr>,
    target: SocketAddrV4,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let socket = TcpSocket::new_v4()
        .map_err(|e| CommissionError::transport("failed to create TCP socket", e))?;

    if let Some(adapter) = adapter {
        socket
            .bind(SocketAddr::V4(SocketAddrV4::new(adapter, 0)))
            .map_err(|e| CommissionError::transport(format!("failed to bind {}", adapter), e))?;
    }

    let stream = timeout(connect_timeout, socket.connect(SocketAddr::V4(target)))
        .await
        .map_err(|_| CommissionError::timeout(format!("connect to {}", target)))?
        .map_err(|e| CommissionError::transport(format!("failed to connect to {}", target), e))?;

    stream.set_nodelay(true).ok();
    debug!("Connected to {}", target);
    Ok(stream)
}
