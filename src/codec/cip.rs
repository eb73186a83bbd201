//! CIP explicit messages: attribute services wrapped in Unconnected Send.
//!
//! Request paths use 8-bit logical segments (class `0x20`, instance `0x24`,
//! attribute `0x30`), switching to the padded 16-bit form for ids above
//! 0xFF. Attribute payloads keep their own byte order: IPv4
//! addresses travel in network order while the CIP STRING length prefix is
//! little-endian.

use std::fmt;
use std::net::Ipv4Addr;

use super::encapsulation::unwrap_send_rr_data;
use super::reader::ByteReader;
use crate::error::{DecodeError, ReplyError};

/// CIP service codes.
pub mod service {
    pub const GET_ATTRIBUTE_ALL: u8 = 0x01;
    pub const GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
    pub const SET_ATTRIBUTE_SINGLE: u8 = 0x10;
    pub const UNCONNECTED_SEND: u8 = 0x52;
    /// Set on the service code of every reply.
    pub const REPLY_FLAG: u8 = 0x80;
}

/// CIP object classes.
pub mod class {
    /// Target of Unconnected Send requests.
    pub const CONNECTION_MANAGER: u16 = 0x06;
    pub const TCP_IP_INTERFACE: u16 = 0xF5;
    pub const ETHERNET_LINK: u16 = 0xF6;
}

const SEGMENT_CLASS: u8 = 0x20;
const SEGMENT_INSTANCE: u8 = 0x24;
const SEGMENT_ATTRIBUTE: u8 = 0x30;

/// Priority bit clear, tick time 5.
const PRIORITY_TICK: u8 = 0x05;
/// 0xF9 ticks at 2^5 ms, roughly a 2 s budget on the device side.
const TIMEOUT_TICKS: u8 = 0xF9;

/// Default Unconnected Send route: backplane port 1, address 0.
pub const DEFAULT_ROUTE_PORT: u8 = 1;
pub const DEFAULT_ROUTE_ADDRESS: u8 = 0;

/// Low two bits of a logical segment type select the id width.
const SEGMENT_FORMAT_16BIT: u8 = 0x01;

fn push_segment(path: &mut Vec<u8>, segment: u8, id: u16) {
    match u8::try_from(id) {
        Ok(id) => path.extend_from_slice(&[segment, id]),
        Err(_) => {
            path.extend_from_slice(&[segment | SEGMENT_FORMAT_16BIT, 0]);
            path.extend_from_slice(&id.to_le_bytes());
        }
    }
}

fn logical_path(class_id: u16, instance_id: u16, attribute_id: Option<u16>) -> Vec<u8> {
    let mut path = Vec::with_capacity(12);
    push_segment(&mut path, SEGMENT_CLASS, class_id);
    push_segment(&mut path, SEGMENT_INSTANCE, instance_id);
    if let Some(attribute) = attribute_id {
        push_segment(&mut path, SEGMENT_ATTRIBUTE, attribute);
    }
    path
}

fn request(service: u8, path: &[u8], data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + path.len() + data.len());
    bytes.push(service);
    bytes.push((path.len() / 2) as u8);
    bytes.extend_from_slice(path);
    bytes.extend_from_slice(data);
    bytes
}

/// Builds Set_Attribute_Single with a 3-word class/instance/attribute path.
pub fn build_set_attribute_single(
    class_id: u16,
    instance_id: u16,
    attribute_id: u16,
    data: &[u8],
) -> Vec<u8> {
    request(
        service::SET_ATTRIBUTE_SINGLE,
        &logical_path(class_id, instance_id, Some(attribute_id)),
        data,
    )
}

/// Builds Get_Attribute_Single.
pub fn build_get_attribute_single(class_id: u16, instance_id: u16, attribute_id: u16) -> Vec<u8> {
    request(
        service::GET_ATTRIBUTE_SINGLE,
        &logical_path(class_id, instance_id, Some(attribute_id)),
        &[],
    )
}

/// Builds Get_Attribute_All for an instance.
pub fn build_get_attribute_all(class_id: u16, instance_id: u16) -> Vec<u8> {
    request(
        service::GET_ATTRIBUTE_ALL,
        &logical_path(class_id, instance_id, None),
        &[],
    )
}

/// Wraps an embedded request in Unconnected Send (service 0x52).
pub fn build_unconnected_send(embedded: &[u8], route_port: u8, route_address: u8) -> Vec<u8> {
    let path = logical_path(class::CONNECTION_MANAGER, 1, None);
    let mut bytes = Vec::with_capacity(16 + embedded.len());
    bytes.push(service::UNCONNECTED_SEND);
    bytes.push((path.len() / 2) as u8);
    bytes.extend_from_slice(&path);
    bytes.push(PRIORITY_TICK);
    bytes.push(TIMEOUT_TICKS);
    bytes.extend_from_slice(&(embedded.len() as u16).to_le_bytes());
    bytes.extend_from_slice(embedded);
    if embedded.len() % 2 != 0 {
        bytes.push(0);
    }
    // route path: size in words, reserved, port segment
    bytes.push(1);
    bytes.push(0);
    bytes.push(route_port);
    bytes.push(route_address);
    bytes
}

/// Walks a SendRRData reply down to the embedded service reply.
///
/// Returns the attribute data on success or the first non-zero general
/// status. An Unconnected Send failure wins over the embedded status
/// because the embedded service never ran.
pub fn parse_attribute_reply(data: &[u8]) -> Result<Vec<u8>, ReplyError> {
    let item = unwrap_send_rr_data(data)?;
    let (reply_service, body) = split_service_reply(item)?;

    if reply_service == service::UNCONNECTED_SEND | service::REPLY_FLAG {
        let (_, embedded) = split_service_reply(body)?;
        return Ok(embedded.to_vec());
    }
    Ok(body.to_vec())
}

/// Reads one service reply header; returns the service code and the data
/// after the general/extended status.
fn split_service_reply(data: &[u8]) -> Result<(u8, &[u8]), ReplyError> {
    let mut reader = ByteReader::new(data);
    let reply_service = reader.u8()?;
    if reply_service & service::REPLY_FLAG == 0 {
        return Err(DecodeError::UnexpectedService(reply_service).into());
    }
    reader.u8()?; // reserved
    let general_status = reader.u8()?;
    let extended_words = reader.u8()? as usize;
    reader.take(extended_words * 2)?;

    if general_status != 0 {
        return Err(ReplyError::Status(CipStatus(general_status)));
    }
    Ok((reply_service, reader.rest()))
}

/// A CIP general status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipStatus(pub u8);

impl CipStatus {
    pub const SUCCESS: CipStatus = CipStatus(0x00);
    pub const PATH_DESTINATION_UNKNOWN: CipStatus = CipStatus(0x04);
    pub const PATH_SEGMENT_ERROR: CipStatus = CipStatus(0x05);
    pub const SERVICE_NOT_SUPPORTED: CipStatus = CipStatus(0x08);
    pub const ATTRIBUTE_NOT_SUPPORTED: CipStatus = CipStatus(0x0F);
    pub const NOT_ENOUGH_DATA: CipStatus = CipStatus(0x13);
    pub const ATTRIBUTE_NOT_SETTABLE: CipStatus = CipStatus(0x14);
    pub const PRIVILEGE_VIOLATION: CipStatus = CipStatus(0x1C);
    pub const INVALID_PARAMETER: CipStatus = CipStatus(0x26);

    pub fn code(&self) -> u8 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }

    /// Short name for the status.
    pub fn name(&self) -> String {
        let name = match self.0 {
            0x00 => "Success",
            0x04 => "Path destination unknown",
            0x05 => "Path segment error",
            0x08 => "Service not supported",
            0x0F => "Attribute not supported",
            0x13 => "Not enough data",
            0x14 => "Attribute not settable",
            0x1C => "Privilege violation",
            0x26 => "Invalid parameter",
            code => return format!("Unknown code 0x{:02X}", code),
        };
        name.to_string()
    }

    /// What the status means for the person commissioning the device.
    pub fn hint(&self) -> &'static str {
        match self.0 {
            0x00 => "The device accepted the request",
            0x04 => "The device does not implement the addressed object",
            0x05 => "The device could not interpret the request path",
            0x08 => "The device does not support this operation",
            0x0F => "The device does not implement this configuration value",
            0x13 => "The value sent was shorter than the device expects",
            0x14 => "This configuration value is read-only",
            0x1C => "The device refused the change; check its configuration lock",
            0x26 => "The device rejected the value as out of range",
            _ => "The device returned a status this tool does not recognize",
        }
    }

    /// User-facing message: `"<name> — <hint>"`.
    pub fn message(&self) -> String {
        format!("{} — {}", self.name(), self.hint())
    }
}

impl fmt::Display for CipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.0, self.message())
    }
}

/// Encodes an IPv4 attribute value: 4 bytes, network order.
pub fn encode_ipv4(addr: Ipv4Addr) -> [u8; 4] {
    addr.octets()
}

pub fn decode_ipv4(data: &[u8]) -> Result<Ipv4Addr, DecodeError> {
    let octets: [u8; 4] = ByteReader::new(data).array()?;
    Ok(Ipv4Addr::from(octets))
}

/// Encodes a CIP STRING: little-endian u16 length, then ASCII bytes.
pub fn encode_cip_string(value: &str) -> Result<Vec<u8>, DecodeError> {
    if !value.is_ascii() || value.len() > u16::MAX as usize {
        return Err(DecodeError::InvalidString);
    }
    let mut bytes = Vec::with_capacity(2 + value.len());
    bytes.extend_from_slice(&(value.len() as u16).to_le_bytes());
    bytes.extend_from_slice(value.as_bytes());
    Ok(bytes)
}

pub fn decode_cip_string(data: &[u8]) -> Result<String, DecodeError> {
    let mut reader = ByteReader::new(data);
    let len = reader.u16_le()? as usize;
    let bytes = reader.take(len)?;
    if !bytes.is_ascii() {
        return Err(DecodeError::InvalidString);
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encapsulation::wrap_send_rr_data;

    /// Replies reuse the SendRRData command and CPF layout.
    fn reply_frame(item: &[u8]) -> Vec<u8> {
        wrap_send_rr_data(7, item)
    }

    mod request_tests {
        use super::*;

        #[test]
        fn test_set_attribute_single_path() {
            let request = build_set_attribute_single(0xF5, 1, 5, &[192, 168, 1, 10]);
            assert_eq!(
                request,
                vec![0x10, 0x03, 0x20, 0xF5, 0x24, 0x01, 0x30, 0x05, 192, 168, 1, 10]
            );
        }

        #[test]
        fn test_get_attribute_single_has_no_data() {
            let request = build_get_attribute_single(0xF5, 1, 6);
            assert_eq!(request, vec![0x0E, 0x03, 0x20, 0xF5, 0x24, 0x01, 0x30, 0x06]);
        }

        #[test]
        fn test_get_attribute_all_uses_two_word_path() {
            let request = build_get_attribute_all(0xF6, 1);
            assert_eq!(request, vec![0x01, 0x02, 0x20, 0xF6, 0x24, 0x01]);
        }

        #[test]
        fn test_unconnected_send_layout() {
            let embedded = build_get_attribute_single(0xF5, 1, 5);
            let wrapped =
                build_unconnected_send(&embedded, DEFAULT_ROUTE_PORT, DEFAULT_ROUTE_ADDRESS);

            assert_eq!(&wrapped[0..6], &[0x52, 0x02, 0x20, 0x06, 0x24, 0x01]);
            assert_eq!(wrapped[6], 0x05);
            assert_eq!(wrapped[7], 0xF9);
            assert_eq!(&wrapped[8..10], &(embedded.len() as u16).to_le_bytes());
            assert_eq!(&wrapped[10..10 + embedded.len()], embedded.as_slice());
            assert_eq!(&wrapped[10 + embedded.len()..], &[0x01, 0x00, 0x01, 0x00]);
        }

        #[test]
        fn test_unconnected_send_pads_odd_embedded_message() {
            let embedded = [0x10, 0x03, 0x20, 0xF5, 0x24, 0x01, 0x30, 0x05, 0xAA];
            let wrapped = build_unconnected_send(&embedded, 1, 0);
            // 10 header bytes + 9 embedded + 1 pad + 4 route bytes
            assert_eq!(wrapped.len(), 24);
            assert_eq!(wrapped[19], 0x00);
            assert_eq!(&wrapped[8..10], &[9, 0]);
        }
    }

    mod path_tests {
        use super::*;

        #[test]
        fn test_wide_ids_use_padded_16bit_segments() {
            let request = build_get_attribute_single(0x0300, 0x0102, 0x0100);
            assert_eq!(
                request,
                vec![
                    0x0E, 0x06, 0x21, 0x00, 0x00, 0x03, 0x25, 0x00, 0x02, 0x01, 0x31, 0x00, 0x00,
                    0x01,
                ]
            );
        }

        #[test]
        fn test_mixed_widths_in_one_path() {
            let request = build_get_attribute_all(class::TCP_IP_INTERFACE, 0x1234);
            assert_eq!(request, vec![0x01, 0x03, 0x20, 0xF5, 0x25, 0x00, 0x34, 0x12]);
        }

        #[test]
        fn test_id_0xff_stays_8bit() {
            let request = build_get_attribute_single(0xFF, 1, 0xFF);
            assert_eq!(request, vec![0x0E, 0x03, 0x20, 0xFF, 0x24, 0x01, 0x30, 0xFF]);
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn test_direct_success_reply_returns_data() {
            let frame = reply_frame(&[0x8E, 0x00, 0x00, 0x00, 10, 0, 0, 5]);
            assert_eq!(parse_attribute_reply(&frame).unwrap(), vec![10, 0, 0, 5]);
        }

        #[test]
        fn test_wrapped_success_reply_returns_embedded_data() {
            let frame = reply_frame(&[0xD2, 0x00, 0x00, 0x00, 0x8E, 0x00, 0x00, 0x00, 1, 2]);
            assert_eq!(parse_attribute_reply(&frame).unwrap(), vec![1, 2]);
        }

        #[test]
        fn test_embedded_status_is_reported() {
            let frame = reply_frame(&[0x90, 0x00, 0x14, 0x00]);
            assert_eq!(
                parse_attribute_reply(&frame),
                Err(ReplyError::Status(CipStatus::ATTRIBUTE_NOT_SETTABLE))
            );
        }

        #[test]
        fn test_unconnected_send_status_takes_precedence() {
            let frame = reply_frame(&[0xD2, 0x00, 0x01, 0x01, 0x04, 0x01, 0x90, 0x00, 0x14, 0x00]);
            assert_eq!(
                parse_attribute_reply(&frame),
                Err(ReplyError::Status(CipStatus(0x01)))
            );
        }

        #[test]
        fn test_extended_status_words_are_skipped() {
            let frame = reply_frame(&[0x8E, 0x00, 0x00, 0x01, 0xFF, 0xFF, 7]);
            assert_eq!(parse_attribute_reply(&frame).unwrap(), vec![7]);
        }

        #[test]
        fn test_request_echo_is_malformed() {
            let frame = reply_frame(&[0x10, 0x00, 0x00, 0x00]);
            assert_eq!(
                parse_attribute_reply(&frame),
                Err(ReplyError::Malformed(DecodeError::UnexpectedService(0x10)))
            );
        }

        #[test]
        fn test_truncated_reply_is_malformed() {
            let frame = reply_frame(&[0x90, 0x00]);
            assert!(matches!(
                parse_attribute_reply(&frame),
                Err(ReplyError::Malformed(DecodeError::TooShort { .. }))
            ));
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn test_not_settable_message() {
            assert_eq!(
                CipStatus(0x14).message(),
                "Attribute not settable — This configuration value is read-only"
            );
        }

        #[test]
        fn test_known_names() {
            assert_eq!(CipStatus(0x00).name(), "Success");
            assert_eq!(CipStatus(0x04).name(), "Path destination unknown");
            assert_eq!(CipStatus(0x05).name(), "Path segment error");
            assert_eq!(CipStatus(0x08).name(), "Service not supported");
            assert_eq!(CipStatus(0x0F).name(), "Attribute not supported");
            assert_eq!(CipStatus(0x13).name(), "Not enough data");
            assert_eq!(CipStatus(0x1C).name(), "Privilege violation");
            assert_eq!(CipStatus(0x26).name(), "Invalid parameter");
        }

        #[test]
        fn test_unknown_code() {
            assert_eq!(CipStatus(0x2A).name(), "Unknown code 0x2A");
            assert!(!CipStatus(0x2A).is_success());
            assert!(CipStatus::SUCCESS.is_success());
        }
    }

    mod value_tests {
        use super::*;

        #[test]
        fn test_ipv4_is_network_order() {
            let addr = Ipv4Addr::new(192, 168, 1, 20);
            assert_eq!(encode_ipv4(addr), [192, 168, 1, 20]);
            assert_eq!(decode_ipv4(&encode_ipv4(addr)).unwrap(), addr);
        }

        #[test]
        fn test_cip_string_length_is_little_endian() {
            let encoded = encode_cip_string("plc-01").unwrap();
            assert_eq!(&encoded[0..2], &[6, 0]);
            assert_eq!(&encoded[2..], b"plc-01");
            assert_eq!(decode_cip_string(&encoded).unwrap(), "plc-01");
        }

        #[test]
        fn test_ipv4_boundary_values() {
            for (addr, octets) in [
                (Ipv4Addr::UNSPECIFIED, [0, 0, 0, 0]),
                (Ipv4Addr::BROADCAST, [255, 255, 255, 255]),
                (Ipv4Addr::new(10, 254, 0, 129), [10, 254, 0, 129]),
            ] {
                let encoded = encode_ipv4(addr);
                assert_eq!(encoded, octets, "{}", addr);
                assert_eq!(decode_ipv4(&encoded).unwrap(), addr);
            }
        }

        #[test]
        fn test_cip_string_boundary_values() {
            let hostname = format!("{}-_{}", "abcxyzABCXYZ0189".repeat(3), "qQ7-_mM3xX9");
            assert_eq!(hostname.len(), 61);
            let hostname = format!("{}aZ9", hostname);
            let long = "x".repeat(300);

            for (value, prefix) in [
                ("", [0u8, 0u8]),
                (hostname.as_str(), [64, 0]),
                (long.as_str(), [0x2C, 0x01]),
            ] {
                let encoded = encode_cip_string(value).unwrap();
                assert_eq!(&encoded[0..2], &prefix, "length prefix for {} chars", value.len());
                assert_eq!(encoded.len(), 2 + value.len());
                assert_eq!(decode_cip_string(&encoded).unwrap(), value);
            }
        }

        #[test]
        fn test_cip_string_rejects_non_ascii() {
            assert_eq!(encode_cip_string("pümpe"), Err(DecodeError::InvalidString));
        }

        #[test]
        fn test_cip_string_truncated() {
            assert!(decode_cip_string(&[5, 0, b'a']).is_err());
        }
    }
}
