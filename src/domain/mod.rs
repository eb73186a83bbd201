//! Domain models for device commissioning.
//!
//! This module contains the core domain types that are independent
//! of wire formats and sockets.

pub(crate) mod bootp;
mod configuration;
pub(crate) mod device;
mod events;
mod write_result;

pub use bootp::{
    BootPPacket, BootpOption, DhcpMessageType, BOOTREPLY, BOOTREQUEST, BROADCAST_FLAG,
};
pub use configuration::{
    is_contiguous_mask, same_subnet, validate_hostname, AttributeValue, ConfigAttribute,
    DeviceConfiguration, MAX_HOSTNAME_LEN,
};
pub use device::{Device, DeviceKey, DeviceStatus, Revision};
pub use events::{BootpRequestEvent, RegistryEvent};
pub use write_result::{AttributeWriteResult, ConfigurationWriteResult, WriteStatus};
