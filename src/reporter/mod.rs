//! Reporting of commissioning events.
//!
//! This module defines the `EventReporter` trait, the user-facing sink for
//! registry changes, configuration progress and BootP requests, and a
//! console implementation.

mod console_reporter;

pub use console_reporter::ConsoleReporter;

use std::net::Ipv4Addr;

use crate::domain::{BootpRequestEvent, ConfigurationWriteResult, RegistryEvent};

/// Sink for events an operator should see.
///
/// Implementations only present events; they never filter or act on them.
pub trait EventReporter: Send + Sync {
    /// A device was added to, updated in or removed from the registry.
    fn report_device(&self, event: &RegistryEvent);

    /// An attribute write finished; `current` counts from 1.
    fn report_progress(&self, current: usize, total: usize, attribute: &str);

    /// A device asked for an address.
    fn report_bootp_request(&self, event: &BootpRequestEvent);

    /// A configuration attempt finished.
    fn report_write_result(&self, target: Ipv4Addr, result: &ConfigurationWriteResult);

    /// Called when a long-running operation starts.
    fn on_start(&self, description: &str);

    /// Called when it stops.
    fn on_stop(&self);
}
