//! BootP/DHCP packet parsing and reply building.
//!
//! All numeric fields are big-endian (network order), unlike the
//! little-endian EtherNet/IP header.

use std::net::Ipv4Addr;

use super::reader::ByteReader;
use crate::domain::{BootPPacket, BootpOption, DhcpMessageType, BOOTREPLY};
use crate::error::DecodeError;

/// DHCP magic cookie: 0x63825363
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed header size (op through file).
pub const BOOTP_HEADER_SIZE: usize = 236;

/// Minimum accepted and emitted packet size.
pub const MIN_BOOTP_SIZE: usize = 300;

/// Written into sname of every reply.
pub const SERVER_NAME: &str = "eip-commission";

/// DHCP option codes
mod option_codes {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const HOST_NAME: u8 = 12;
    pub const REQUESTED_IP: u8 = 50;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const VENDOR_CLASS_ID: u8 = 60;
    pub const CLIENT_ID: u8 = 61;
    pub const END: u8 = 255;
}

/// Parse a BootP packet from a UDP payload.
///
/// Payloads under 300 bytes are rejected. Options are only read when the
/// magic cookie follows the fixed header.
pub fn parse_bootp_packet(data: &[u8]) -> Result<BootPPacket, DecodeError> {
    if data.len() < MIN_BOOTP_SIZE {
        return Err(DecodeError::TooShort {
            expected: MIN_BOOTP_SIZE,
            actual: data.len(),
        });
    }

    let mut reader = ByteReader::new(data);
    let op = reader.u8()?;
    let htype = reader.u8()?;
    let hlen = reader.u8()?;
    let hops = reader.u8()?;
    let xid = reader.u32_be()?;
    let secs = reader.u16_be()?;
    let flags = reader.u16_be()?;
    let ciaddr = Ipv4Addr::from(reader.u32_be()?);
    let yiaddr = Ipv4Addr::from(reader.u32_be()?);
    let siaddr = Ipv4Addr::from(reader.u32_be()?);
    let giaddr = Ipv4Addr::from(reader.u32_be()?);
    let chaddr: [u8; 16] = reader.array()?;
    let sname = parse_null_terminated_string(reader.take(64)?);
    let file = parse_null_terminated_string(reader.take(128)?);

    let vendor_area = reader.rest();
    let has_magic_cookie = vendor_area.starts_with(&DHCP_MAGIC_COOKIE);
    let options = if has_magic_cookie {
        parse_options(&vendor_area[DHCP_MAGIC_COOKIE.len()..])?
    } else {
        Vec::new()
    };

    Ok(BootPPacket {
        op,
        htype,
        hlen,
        hops,
        xid,
        secs,
        flags,
        ciaddr,
        yiaddr,
        siaddr,
        giaddr,
        chaddr,
        sname,
        file,
        has_magic_cookie,
        options,
    })
}

/// Parse a null-terminated string, returning None if empty.
fn parse_null_terminated_string(data: &[u8]) -> Option<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    if end == 0 {
        return None;
    }

    String::from_utf8(data[..end].to_vec()).ok()
}

/// Walks the TLV option stream that follows the magic cookie.
fn parse_options(data: &[u8]) -> Result<Vec<BootpOption>, DecodeError> {
    let mut options = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let code = data[offset];

        if code == option_codes::PAD {
            offset += 1;
            continue;
        }

        if code == option_codes::END {
            break;
        }

        if offset + 1 >= data.len() {
            return Err(DecodeError::InvalidOption {
                offset,
                message: "option length missing".to_string(),
            });
        }

        let len = data[offset + 1] as usize;

        if offset + 2 + len > data.len() {
            return Err(DecodeError::InvalidOption {
                offset,
                message: format!(
                    "option data truncated: expected {} bytes, have {}",
                    len,
                    data.len() - offset - 2
                ),
            });
        }

        if let Some(option) = parse_option(code, &data[offset + 2..offset + 2 + len]) {
            options.push(option);
        }

        offset += 2 + len;
    }

    Ok(options)
}

fn ipv4_at(data: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

fn parse_option(code: u8, data: &[u8]) -> Option<BootpOption> {
    match code {
        option_codes::SUBNET_MASK => ipv4_at(data).map(BootpOption::SubnetMask),
        option_codes::ROUTER => Some(BootpOption::Router(
            data.chunks_exact(4).filter_map(ipv4_at).collect(),
        )),
        option_codes::HOST_NAME => String::from_utf8(data.to_vec())
            .ok()
            .map(BootpOption::HostName),
        option_codes::REQUESTED_IP => ipv4_at(data).map(BootpOption::RequestedIp),
        option_codes::MESSAGE_TYPE => data
            .first()
            .and_then(|&t| DhcpMessageType::from_u8(t))
            .map(BootpOption::MessageType),
        option_codes::SERVER_ID => ipv4_at(data).map(BootpOption::ServerIdentifier),
        option_codes::VENDOR_CLASS_ID => String::from_utf8(data.to_vec())
            .ok()
            .map(BootpOption::VendorClassId),
        option_codes::CLIENT_ID => Some(BootpOption::ClientId(data.to_vec())),
        _ => Some(BootpOption::Unknown(code, data.to_vec())),
    }
}

/// Build a BOOTREPLY assigning `assigned_ip` to the requesting client.
///
/// htype, hlen, xid, flags and all 16 chaddr bytes are copied from the
/// request. giaddr carries the gateway (or zero). Options: cookie, subnet
/// mask, router when a gateway is given, end; padded to 300 bytes.
pub fn build_bootp_reply(
    request: &BootPPacket,
    assigned_ip: Ipv4Addr,
    server_ip: Ipv4Addr,
    subnet_mask: Ipv4Addr,
    gateway: Option<Ipv4Addr>,
) -> Vec<u8> {
    let mut reply = vec![0u8; BOOTP_HEADER_SIZE];

    reply[0] = BOOTREPLY;
    reply[1] = request.htype;
    reply[2] = request.hlen;
    // hops (3) and secs (8..10) stay zero
    reply[4..8].copy_from_slice(&request.xid.to_be_bytes());
    reply[10..12].copy_from_slice(&request.flags.to_be_bytes());
    // ciaddr (12..16) stays zero
    reply[16..20].copy_from_slice(&assigned_ip.octets());
    reply[20..24].copy_from_slice(&server_ip.octets());
    reply[24..28].copy_from_slice(&gateway.unwrap_or(Ipv4Addr::UNSPECIFIED).octets());
    reply[28..44].copy_from_slice(&request.chaddr);

    let name = SERVER_NAME.as_bytes();
    let copy_len = name.len().min(63);
    reply[44..44 + copy_len].copy_from_slice(&name[..copy_len]);
    // file (108..236) stays empty

    reply.extend_from_slice(&DHCP_MAGIC_COOKIE);

    reply.push(option_codes::SUBNET_MASK);
    reply.push(4);
    reply.extend_from_slice(&subnet_mask.octets());

    if let Some(router) = gateway {
        reply.push(option_codes::ROUTER);
        reply.push(4);
        reply.extend_from_slice(&router.octets());
    }

    reply.push(option_codes::END);

    // Pad to minimum BootP packet size (300 bytes)
    if reply.len() < MIN_BOOTP_SIZE {
        reply.resize(MIN_BOOTP_SIZE, 0);
    }

    reply
}
