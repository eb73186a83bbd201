//! eip-commission - EtherNet/IP device commissioning
//!
//! Discovers CIP devices with List Identity broadcasts, writes TCP/IP
//! Interface attributes over an explicit-messaging session, and answers
//! BootP requests from devices in factory-default state.
//!
//! # Architecture
//!
//! - `codec`: pure EtherNet/IP, CIP and BootP encoders/decoders
//! - `transport`: UDP discovery socket and adapter-bound TCP connections
//! - `discovery`: `DiscoveryEngine` and the MAC-keyed `DeviceRegistry`
//! - `configure`: `CipSession` and the `ConfigurationSequencer`
//! - `bootp`: the `BootpServer`
//! - `reporter`: the operator-facing `EventReporter`

pub mod adapters;
pub mod bootp;
pub mod codec;
pub mod config;
pub mod configure;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod reporter;
pub mod transport;
pub mod vendors;

pub use bootp::BootpServer;
pub use config::Config;
pub use configure::{ConfigurationSequencer, InterfaceConfiguration, SequencerSettings};
pub use discovery::{CycleSummary, DeviceRegistry, DiscoveryEngine, DiscoverySettings};
pub use domain::{
    ConfigurationWriteResult, Device, DeviceConfiguration, DeviceKey, DeviceStatus, RegistryEvent,
};
pub use error::{CommissionError, Result};
