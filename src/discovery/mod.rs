//! Device discovery: List Identity broadcast, MAC resolution and the
//! device registry.

pub mod arp;
mod engine;
mod registry;

pub use arp::{ArpTableResolver, MacResolver, UnknownMacResolver};
pub use engine::{
    device_from_identity, directed_broadcast, CycleSummary, DiscoveryEngine, DiscoverySettings,
};
pub use registry::{DeviceRegistry, DEFAULT_STALE_THRESHOLD};
