//! List Identity reply decoding.
//!
//! Reply layout after the encapsulation header:
//!
//! | Size | Field | Byte order |
//! |------|-------|------------|
//! | 2 | CPF item count (must be 1) | LE |
//! | 2 | Item type (0x000C) | LE |
//! | 2 | Item length | LE |
//! | 2 | Encapsulation protocol version | LE |
//! | 2 | Socket family | LE |
//! | 2 | Socket port | BE |
//! | 4 | Socket IPv4 address | BE |
//! | 8 | Socket zero padding | - |
//! | 2 | Vendor id | LE |
//! | 2 | Device type | LE |
//! | 2 | Product code | LE |
//! | 2 | Revision major, minor | - |
//! | 2 | Status | LE |
//! | 4 | Serial number | LE |
//! | 1+n | Product name (short string) | - |
//! | 1 | State | - |

use std::net::{Ipv4Addr, SocketAddrV4};

use super::encapsulation::{command, expect_reply, item_type, SenderContext};
use super::reader::ByteReader;
use crate::domain::Revision;
use crate::error::DecodeError;

/// Identity item fields exactly as a device reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub sender_context: SenderContext,
    pub protocol_version: u16,
    pub socket_family: u16,
    pub socket_address: SocketAddrV4,
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub revision: Revision,
    /// Identity object status word, not decoded further.
    pub status: u16,
    pub serial_number: u32,
    pub product_name: String,
    pub state: u8,
}

/// Decodes one List Identity reply datagram.
///
/// Short reads, length mismatches, a wrong command, a non-zero
/// encapsulation status or any item other than a single identity item all
/// fail with a [`DecodeError`].
pub fn parse_list_identity_response(data: &[u8]) -> Result<IdentityRecord, DecodeError> {
    let (header, payload) = expect_reply(data, command::LIST_IDENTITY)?;
    let mut reader = ByteReader::new(payload);

    let count = reader.u16_le()?;
    if count != 1 {
        return Err(DecodeError::UnexpectedItemCount(count));
    }

    let kind = reader.u16_le()?;
    if kind != item_type::IDENTITY {
        return Err(DecodeError::UnexpectedItem {
            expected: item_type::IDENTITY,
            actual: kind,
        });
    }

    let item_len = reader.u16_le()? as usize;
    if item_len != reader.remaining() {
        return Err(DecodeError::LengthMismatch {
            field: "identity item",
            declared: item_len,
            actual: reader.remaining(),
        });
    }

    let protocol_version = reader.u16_le()?;
    let socket_family = reader.u16_le()?;
    let port = reader.u16_be()?;
    let ip = Ipv4Addr::from(reader.u32_be()?);
    reader.take(8)?;

    let vendor_id = reader.u16_le()?;
    let device_type = reader.u16_le()?;
    let product_code = reader.u16_le()?;
    let revision = Revision {
        major: reader.u8()?,
        minor: reader.u8()?,
    };
    let status = reader.u16_le()?;
    let serial_number = reader.u32_le()?;

    let name_len = reader.u8()? as usize;
    let name = reader.take(name_len)?;
    if !name.is_ascii() {
        return Err(DecodeError::InvalidString);
    }
    let product_name = String::from_utf8_lossy(name).trim_end_matches('\0').to_string();
    let state = reader.u8()?;

    Ok(IdentityRecord {
        sender_context: header.sender_context,
        protocol_version,
        socket_family,
        socket_address: SocketAddrV4::new(ip, port),
        vendor_id,
        device_type,
        product_code,
        revision,
        status,
        serial_number,
        product_name,
        state,
    })
}
