//! Console-based event reporter.

use std::io::{self, Write};
use std::net::Ipv4Addr;

use crate::domain::{
    BootpRequestEvent, ConfigurationWriteResult, Device, DeviceStatus, RegistryEvent, WriteStatus,
};
use crate::reporter::EventReporter;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Reports commissioning events to stdout.
pub struct ConsoleReporter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Whether to show verbose output
    verbose: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    pub fn new() -> Self {
        Self {
            use_colors: true,
            verbose: false,
        }
    }

    /// Enable or disable colored output.
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    /// Enable or disable verbose output.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{}{}{}", color, text, RESET)
        } else {
            text.to_string()
        }
    }

    fn format_status(&self, status: DeviceStatus) -> String {
        let text = status.to_string();
        match status {
            DeviceStatus::Ok => self.paint(GREEN, &text),
            DeviceStatus::LinkLocal => self.paint(YELLOW, &text),
            DeviceStatus::Conflict => self.paint(RED, &text),
        }
    }

    pub(crate) fn format_device(&self, device: &Device) -> String {
        let mac = device
            .mac_address
            .map(|mac| mac.to_string())
            .unwrap_or_else(|| "unresolved".to_string());

        let mut output = format!(
            "{:<15} | MAC: {} | {} | {} | Serial: {:08X} | Rev: {} | {}",
            device.ip_address,
            mac,
            device.vendor_name,
            device.product_name,
            device.serial_number,
            device.firmware_revision,
            self.format_status(device.status)
        );

        if self.verbose {
            output.push_str(&format!(
                " | Type: {} (0x{:02X}) | Product code: {} | Missed: {}",
                device.device_type_name(),
                device.device_type,
                device.product_code,
                device.missed_scans
            ));
        }
        output
    }

    pub(crate) fn format_device_event(&self, event: &RegistryEvent) -> String {
        let tag = match event {
            RegistryEvent::Added(_) => "[ADDED]  ",
            RegistryEvent::Updated(_) => "[UPDATED]",
            RegistryEvent::Removed(_) => "[REMOVED]",
        };
        format!("{} {}", tag, self.format_device(event.device()))
    }

    pub(crate) fn format_bootp_request(&self, event: &BootpRequestEvent) -> String {
        let packet = &event.packet;
        let mut output = format!(
            "[BOOTP REQUEST] MAC: {} | XID: {:#010x} | From: {}",
            packet.client_mac(),
            packet.xid,
            event.source
        );
        if let Some(kind) = packet.message_type() {
            output.push_str(&format!(" | DHCP {}", kind));
        }
        if let Some(name) = packet.host_name() {
            output.push_str(&format!(" | Host: {}", name));
        }
        if self.verbose {
            if let Some(vendor) = packet.vendor_class_id() {
                output.push_str(&format!(" | Vendor: {}", vendor));
            }
            if let Some(ip) = packet.requested_ip() {
                output.push_str(&format!(" | Requested: {}", ip));
            }
        }
        output
    }

    pub(crate) fn format_write_result(
        &self,
        target: Ipv4Addr,
        result: &ConfigurationWriteResult,
    ) -> String {
        let mut lines = Vec::with_capacity(result.results.len() + 1);
        let summary = format!(
            "Configuration of {}: {} written, {} failed, {} not attempted",
            target,
            result.success_count(),
            result.failure_count(),
            result.not_attempted_count()
        );
        lines.push(if result.is_success() {
            self.paint(GREEN, &summary)
        } else {
            self.paint(RED, &summary)
        });

        for attribute in &result.results {
            let outcome = match &attribute.status {
                WriteStatus::Succeeded => self.paint(GREEN, "ok"),
                WriteStatus::Failed { message, .. } => self.paint(RED, message),
                WriteStatus::NotAttempted => "not attempted".to_string(),
            };
            lines.push(format!(
                "  {:<12} (attr {:>2}): {}",
                attribute.attribute_name(),
                attribute.attribute_id(),
                outcome
            ));
        }
        lines.join("\n")
    }

    fn print(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", text);
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventReporter for ConsoleReporter {
    fn report_device(&self, event: &RegistryEvent) {
        self.print(&self.format_device_event(event));
    }

    fn report_progress(&self, current: usize, total: usize, attribute: &str) {
        self.print(&format!("[{}/{}] {}", current, total, attribute));
    }

    fn report_bootp_request(&self, event: &BootpRequestEvent) {
        self.print(&self.format_bootp_request(event));
    }

    fn report_write_result(&self, target: Ipv4Addr, result: &ConfigurationWriteResult) {
        self.print(&self.format_write_result(target, result));
    }

    fn on_start(&self, description: &str) {
        println!("{}", description);
        println!("Press Ctrl+C to stop.\n");
    }

    fn on_stop(&self) {
        println!("\nStopped.");
    }
}
