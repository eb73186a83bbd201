//! Target network configuration for a device.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::ValidationError;

/// Longest hostname the TCP/IP Interface object accepts here.
pub const MAX_HOSTNAME_LEN: usize = 64;

/// A TCP/IP Interface object attribute this tool writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigAttribute {
    IpAddress,
    SubnetMask,
    Gateway,
    Hostname,
    DnsServer,
}

impl ConfigAttribute {
    /// Write order; required attributes first.
    pub const ORDER: [ConfigAttribute; 5] = [
        Self::IpAddress,
        Self::SubnetMask,
        Self::Gateway,
        Self::Hostname,
        Self::DnsServer,
    ];

    /// Attribute id within class 0xF5, instance 1.
    pub fn attribute_id(&self) -> u16 {
        match self {
            Self::IpAddress => 5,
            Self::SubnetMask => 6,
            Self::Gateway => 7,
            Self::Hostname => 8,
            Self::DnsServer => 10,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IpAddress => "IP Address",
            Self::SubnetMask => "Subnet Mask",
            Self::Gateway => "Gateway",
            Self::Hostname => "Hostname",
            Self::DnsServer => "DNS Server",
        }
    }
}

impl fmt::Display for ConfigAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value to be written to one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Ipv4(Ipv4Addr),
    Text(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(ip) => write!(f, "{}", ip),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Caller-supplied network settings for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfiguration {
    pub ip_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub hostname: Option<String>,
    pub dns_server: Option<Ipv4Addr>,
}

impl DeviceConfiguration {
    pub fn new(ip_address: Ipv4Addr, subnet_mask: Ipv4Addr) -> Self {
        Self {
            ip_address,
            subnet_mask,
            gateway: None,
            hostname: None,
            dns_server: None,
        }
    }

    pub fn with_gateway(mut self, gateway: Ipv4Addr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_dns_server(mut self, dns_server: Ipv4Addr) -> Self {
        self.dns_server = Some(dns_server);
        self
    }

    /// Checks address, mask, subnet membership and hostname rules.
    #[must_use = "validation result must be checked"]
    pub fn validate(&self) -> Result<(), ValidationError> {
        let ip = self.ip_address;
        if ip.is_unspecified() || ip.is_broadcast() || ip.is_multicast() || ip.is_loopback() {
            return Err(ValidationError::InvalidAddress(ip.to_string()));
        }

        if !is_contiguous_mask(self.subnet_mask) || self.subnet_mask.is_unspecified() {
            return Err(ValidationError::InvalidMask(self.subnet_mask.to_string()));
        }

        if u32::from(self.subnet_mask).leading_ones() < 31 {
            let host_bits = u32::from(ip) & !u32::from(self.subnet_mask);
            if host_bits == 0 || host_bits == !u32::from(self.subnet_mask) {
                return Err(ValidationError::InvalidAddress(ip.to_string()));
            }
        }

        for (field, address) in [("gateway", self.gateway), ("DNS server", self.dns_server)] {
            if let Some(address) = address {
                if !same_subnet(ip, address, self.subnet_mask) {
                    return Err(ValidationError::DifferentSubnet {
                        field,
                        address: address.to_string(),
                        ip: ip.to_string(),
                        mask: self.subnet_mask.to_string(),
                    });
                }
            }
        }

        if let Some(hostname) = &self.hostname {
            validate_hostname(hostname)?;
        }

        Ok(())
    }

    /// Present attributes in write order with their values.
    pub fn attribute_values(&self) -> Vec<(ConfigAttribute, AttributeValue)> {
        ConfigAttribute::ORDER
            .iter()
            .filter_map(|&attribute| {
                let value = match attribute {
                    ConfigAttribute::IpAddress => Some(AttributeValue::Ipv4(self.ip_address)),
                    ConfigAttribute::SubnetMask => Some(AttributeValue::Ipv4(self.subnet_mask)),
                    ConfigAttribute::Gateway => self.gateway.map(AttributeValue::Ipv4),
                    ConfigAttribute::Hostname => {
                        self.hostname.clone().map(AttributeValue::Text)
                    }
                    ConfigAttribute::DnsServer => self.dns_server.map(AttributeValue::Ipv4),
                }?;
                Some((attribute, value))
            })
            .collect()
    }
}

/// Validate a hostname: 1-64 chars, ASCII letters, digits, '-' or '_'.
#[must_use = "validation result must be checked"]
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return Err(ValidationError::InvalidHostname(hostname.to_string()));
    }
    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidHostname(hostname.to_string()));
    }
    Ok(())
}

/// Bitwise network-prefix equality under `mask`.
pub fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let mask = u32::from(mask);
    u32::from(a) & mask == u32::from(b) & mask
}

/// True when the mask is a run of ones followed by zeros.
pub fn is_contiguous_mask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    bits.leading_ones() + bits.trailing_zeros() == 32
}
