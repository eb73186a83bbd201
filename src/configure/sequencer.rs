//! Ordered TCP/IP Interface attribute writes with stop-on-first-failure.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::session::CipSession;
use crate::codec::cip::{class, decode_cip_string, decode_ipv4, encode_cip_string, encode_ipv4};
use crate::codec::ETHERNET_IP_PORT;
use crate::domain::{
    AttributeValue, AttributeWriteResult, ConfigAttribute, ConfigurationWriteResult,
    DeviceConfiguration,
};
use crate::error::{CommissionError, Result};
use crate::transport::{connect_from, OPERATION_TIMEOUT};

/// The TCP/IP Interface object has a single instance.
const INTERFACE_INSTANCE: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerSettings {
    /// Bound on connect, RegisterSession and each attribute write.
    pub operation_timeout: Duration,
    /// Pause between consecutive writes.
    pub inter_write_delay: Duration,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            operation_timeout: OPERATION_TIMEOUT,
            inter_write_delay: Duration::from_millis(100),
        }
    }
}

/// Network settings currently stored in a device. Attributes the device
/// does not implement are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceConfiguration {
    pub ip_address: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub hostname: Option<String>,
    pub dns_server: Option<Ipv4Addr>,
}

/// Writes a [`DeviceConfiguration`] to one device over a single CIP session.
///
/// Clones share the set of targets being configured, so a device is never
/// configured twice at once through the same sequencer.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationSequencer {
    settings: SequencerSettings,
    local_adapter: Option<Ipv4Addr>,
    in_flight: Arc<Mutex<HashSet<Ipv4Addr>>>,
}

/// Marks a target busy until dropped.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<Ipv4Addr>>>,
    target: Ipv4Addr,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<Ipv4Addr>>>, target: Ipv4Addr) -> Result<Self> {
        let mut targets = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !targets.insert(target) {
            return Err(CommissionError::ConfigurationInProgress { target });
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            target,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.target);
    }
}

impl ConfigurationSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: SequencerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Bind outgoing connections to this local address.
    pub fn with_local_adapter(mut self, adapter: Ipv4Addr) -> Self {
        self.local_adapter = Some(adapter);
        self
    }

    /// Validates `config`, connects to `target:44818` and writes every
    /// present attribute in order.
    ///
    /// `progress(current, total, name)` runs after each attempted write,
    /// `current` counting from 1. Connection and session failures are
    /// errors; per-attribute failures are recorded in the result. A second
    /// call for a target still being configured fails with
    /// `ConfigurationInProgress`.
    pub async fn configure<F>(
        &self,
        target: Ipv4Addr,
        config: &DeviceConfiguration,
        progress: F,
    ) -> Result<ConfigurationWriteResult>
    where
        F: FnMut(usize, usize, &str),
    {
        config.validate()?;
        let _guard = InFlightGuard::acquire(&self.in_flight, target)?;
        let stream = connect_from(
            self.local_adapter,
            SocketAddrV4::new(target, ETHERNET_IP_PORT),
            self.settings.operation_timeout,
        )
        .await?;
        info!("Configuring {} -> {}/{}", target, config.ip_address, config.subnet_mask);
        self.write_attributes(stream, config, progress).await
    }

    /// Same as [`configure`](Self::configure) over an already open stream.
    pub async fn run_on<S, F>(
        &self,
        stream: S,
        config: &DeviceConfiguration,
        progress: F,
    ) -> Result<ConfigurationWriteResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: FnMut(usize, usize, &str),
    {
        config.validate()?;
        self.write_attributes(stream, config, progress).await
    }

    /// Reads the TCP/IP Interface attributes this tool writes.
    pub async fn read_interface_configuration(&self, target: Ipv4Addr) -> Result<InterfaceConfiguration> {
        let stream = connect_from(
            self.local_adapter,
            SocketAddrV4::new(target, ETHERNET_IP_PORT),
            self.settings.operation_timeout,
        )
        .await?;
        self.read_on(stream).await
    }

    pub async fn read_on<S>(&self, stream: S) -> Result<InterfaceConfiguration>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = CipSession::register(stream, self.settings.operation_timeout).await?;
        let mut current = InterfaceConfiguration::default();

        for attribute in ConfigAttribute::ORDER {
            let data = match session
                .get_attribute_single(class::TCP_IP_INTERFACE, INTERFACE_INSTANCE, attribute.attribute_id())
                .await
            {
                Ok(data) => data,
                Err(CommissionError::ProtocolStatus(status)) => {
                    debug!("{} not readable: {}", attribute, status.message());
                    continue;
                }
                Err(e) => return Err(e),
            };

            match attribute {
                ConfigAttribute::IpAddress => current.ip_address = Some(decode_ipv4(&data)?),
                ConfigAttribute::SubnetMask => current.subnet_mask = Some(decode_ipv4(&data)?),
                ConfigAttribute::Gateway => current.gateway = Some(decode_ipv4(&data)?),
                ConfigAttribute::Hostname => current.hostname = Some(decode_cip_string(&data)?),
                ConfigAttribute::DnsServer => current.dns_server = Some(decode_ipv4(&data)?),
            }
        }

        if let Err(e) = session.unregister().await {
            debug!("UnregisterSession failed: {}", e);
        }
        Ok(current)
    }

    async fn write_attributes<S, F>(
        &self,
        stream: S,
        config: &DeviceConfiguration,
        mut progress: F,
    ) -> Result<ConfigurationWriteResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: FnMut(usize, usize, &str),
    {
        let mut session = CipSession::register(stream, self.settings.operation_timeout).await?;

        let values = config.attribute_values();
        let total = values.len();
        let mut outcome = ConfigurationWriteResult::default();

        for (index, (attribute, value)) in values.iter().enumerate() {
            if outcome.first_failure().is_some() {
                outcome.results.push(AttributeWriteResult::not_attempted(*attribute));
                outcome.stopped_early = true;
                continue;
            }
            if index > 0 {
                sleep(self.settings.inter_write_delay).await;
            }

            let written = match encode_value(value) {
                Ok(data) => {
                    session
                        .set_attribute_single(
                            class::TCP_IP_INTERFACE,
                            INTERFACE_INSTANCE,
                            attribute.attribute_id(),
                            &data,
                        )
                        .await
                }
                Err(e) => Err(e),
            };

            let result = match written {
                Ok(()) => {
                    info!("Wrote {} = {}", attribute, value);
                    AttributeWriteResult::succeeded(*attribute)
                }
                Err(e) => {
                    warn!("Writing {} failed: {}", attribute, e);
                    failure_result(*attribute, &e)
                }
            };
            outcome.results.push(result);
            progress(index + 1, total, attribute.name());
        }

        // Best effort; the writes already happened.
        if let Err(e) = session.unregister().await {
            debug!("UnregisterSession failed: {}", e);
        }

        Ok(outcome)
    }
}

fn encode_value(value: &AttributeValue) -> Result<Vec<u8>> {
    match value {
        AttributeValue::Ipv4(addr) => Ok(encode_ipv4(*addr).to_vec()),
        AttributeValue::Text(text) => Ok(encode_cip_string(text)?),
    }
}

fn failure_result(attribute: ConfigAttribute, error: &CommissionError) -> AttributeWriteResult {
    match error {
        CommissionError::ProtocolStatus(status) => {
            AttributeWriteResult::failed(attribute, Some(status.code()), status.message())
        }
        other => AttributeWriteResult::failed(attribute, None, other.to_string()),
    }
}
