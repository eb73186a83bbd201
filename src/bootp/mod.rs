//! BootP/DHCP server for devices waiting in factory-default state.

mod pending;
mod server;

pub use pending::{PendingRequests, RequestKey, PENDING_CAPACITY, PENDING_TTL};
pub use server::{reply_destination, BootpServer, BOOTP_CLIENT_PORT};
