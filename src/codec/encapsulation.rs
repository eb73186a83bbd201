//! EtherNet/IP encapsulation framing.
//!
//! Every EtherNet/IP message starts with a 24-byte header whose integer
//! fields are all little-endian:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | Command |
//! | 2 | 2 | Length of the data that follows the header |
//! | 4 | 4 | Session handle |
//! | 8 | 4 | Status |
//! | 12 | 8 | Sender context (echoed by the peer) |
//! | 20 | 4 | Options |
//!
//! SendRRData carries a Common Packet Format (CPF) item list after a
//! 4-byte interface handle and a 2-byte timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::reader::ByteReader;
use crate::error::DecodeError;

/// Encapsulation header size in bytes.
pub const ENCAPSULATION_HEADER_SIZE: usize = 24;

/// EtherNet/IP explicit messaging port (UDP and TCP).
pub const ETHERNET_IP_PORT: u16 = 44818;

/// Encapsulation commands.
pub mod command {
    pub const LIST_IDENTITY: u16 = 0x0063;
    pub const REGISTER_SESSION: u16 = 0x0065;
    pub const UNREGISTER_SESSION: u16 = 0x0066;
    pub const SEND_RR_DATA: u16 = 0x006F;
}

/// Common Packet Format item types.
pub mod item_type {
    pub const NULL_ADDRESS: u16 = 0x0000;
    pub const IDENTITY: u16 = 0x000C;
    pub const UNCONNECTED_DATA: u16 = 0x00B2;
}

const REGISTER_PROTOCOL_VERSION: u16 = 1;

/// Opaque correlation value echoed back by a compliant peer.
pub type SenderContext = [u8; 8];

/// The 24-byte header that frames every EtherNet/IP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncapsulationHeader {
    pub command: u16,
    /// Byte length of the payload that follows the header.
    pub length: u16,
    pub session_handle: u32,
    pub status: u32,
    pub sender_context: SenderContext,
    pub options: u32,
}

impl EncapsulationHeader {
    /// Creates a header for `command` with zeroed session, status and options.
    pub fn new(command: u16, length: u16) -> Self {
        Self {
            command,
            length,
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_handle: u32) -> Self {
        self.session_handle = session_handle;
        self
    }

    pub fn with_context(mut self, sender_context: SenderContext) -> Self {
        self.sender_context = sender_context;
        self
    }

    /// Serializes the header, little-endian.
    pub fn to_bytes(&self) -> [u8; ENCAPSULATION_HEADER_SIZE] {
        let mut bytes = [0u8; ENCAPSULATION_HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.command.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.session_handle.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.status.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.sender_context);
        bytes[20..24].copy_from_slice(&self.options.to_le_bytes());
        bytes
    }

    /// Parses the first 24 bytes of `data` as a header.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(data);
        Ok(Self {
            command: reader.u16_le()?,
            length: reader.u16_le()?,
            session_handle: reader.u32_le()?,
            status: reader.u32_le()?,
            sender_context: reader.array()?,
            options: reader.u32_le()?,
        })
    }
}

/// Splits a complete message into its header and payload.
///
/// The payload must be exactly `header.length` bytes.
pub fn split_frame(data: &[u8]) -> Result<(EncapsulationHeader, &[u8]), DecodeError> {
    let header = EncapsulationHeader::from_bytes(data)?;
    let payload = &data[ENCAPSULATION_HEADER_SIZE..];
    if payload.len() != header.length as usize {
        return Err(DecodeError::LengthMismatch {
            field: "encapsulation header",
            declared: header.length as usize,
            actual: payload.len(),
        });
    }
    Ok((header, payload))
}

/// Splits a reply, rejecting the wrong command or a non-zero status.
pub fn expect_reply(
    data: &[u8],
    expected_command: u16,
) -> Result<(EncapsulationHeader, &[u8]), DecodeError> {
    let (header, payload) = split_frame(data)?;
    if header.command != expected_command {
        return Err(DecodeError::UnexpectedCommand {
            expected: expected_command,
            actual: header.command,
        });
    }
    if header.status != 0 {
        return Err(DecodeError::EncapsulationStatus(header.status));
    }
    Ok((header, payload))
}

fn frame(header: EncapsulationHeader, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ENCAPSULATION_HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Generates a sender context unique within this process.
pub fn fresh_sender_context() -> SenderContext {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    ((nanos << 32) | (count & 0xFFFF_FFFF)).to_le_bytes()
}

/// Builds a List Identity request: command 0x0063, no payload, no session.
pub fn build_list_identity_request(context: SenderContext) -> Vec<u8> {
    EncapsulationHeader::new(command::LIST_IDENTITY, 0)
        .with_context(context)
        .to_bytes()
        .to_vec()
}

/// Builds a RegisterSession request (protocol version 1, no options).
pub fn build_register_session(context: SenderContext) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4);
    payload.extend_from_slice(&REGISTER_PROTOCOL_VERSION.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    frame(
        EncapsulationHeader::new(command::REGISTER_SESSION, payload.len() as u16)
            .with_context(context),
        &payload,
    )
}

/// Extracts the session handle assigned in a RegisterSession reply.
pub fn parse_register_session_reply(data: &[u8]) -> Result<u32, DecodeError> {
    let (header, _) = expect_reply(data, command::REGISTER_SESSION)?;
    Ok(header.session_handle)
}

/// Builds an UnregisterSession request. The peer does not reply.
pub fn build_unregister_session(session_handle: u32) -> Vec<u8> {
    EncapsulationHeader::new(command::UNREGISTER_SESSION, 0)
        .with_session(session_handle)
        .to_bytes()
        .to_vec()
}

/// Wraps an Unconnected Send message in a SendRRData frame.
///
/// CPF layout: interface handle 0, timeout 0, two items (null address,
/// unconnected data carrying `unconnected_send`).
pub fn wrap_send_rr_data(session_handle: u32, unconnected_send: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + unconnected_send.len());
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&2u16.to_le_bytes());
    payload.extend_from_slice(&item_type::NULL_ADDRESS.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&item_type::UNCONNECTED_DATA.to_le_bytes());
    payload.extend_from_slice(&(unconnected_send.len() as u16).to_le_bytes());
    payload.extend_from_slice(unconnected_send);

    frame(
        EncapsulationHeader::new(command::SEND_RR_DATA, payload.len() as u16)
            .with_session(session_handle),
        &payload,
    )
}

/// Returns the unconnected data item carried by a SendRRData reply.
pub fn unwrap_send_rr_data(data: &[u8]) -> Result<&[u8], DecodeError> {
    let (_, payload) = expect_reply(data, command::SEND_RR_DATA)?;
    let mut reader = ByteReader::new(payload);
    reader.u32_le()?; // interface handle
    reader.u16_le()?; // timeout
    let count = reader.u16_le()?;

    for _ in 0..count {
        let kind = reader.u16_le()?;
        let len = reader.u16_le()? as usize;
        let body = reader.take(len)?;
        if kind == item_type::UNCONNECTED_DATA {
            return Ok(body);
        }
    }

    Err(DecodeError::MissingItem(item_type::UNCONNECTED_DATA))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_little_endian() {
        let header = EncapsulationHeader {
            command: 0x006F,
            length: 0x0102,
            session_handle: 0x11223344,
            status: 0,
            sender_context: [1, 2, 3, 4, 5, 6, 7, 8],
            options: 0,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..2], &[0x6F, 0x00]);
        assert_eq!(&bytes[2..4], &[0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[12..20], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(EncapsulationHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_list_identity_request() {
        let context = [9, 8, 7, 6, 5, 4, 3, 2];
        let request = build_list_identity_request(context);
        assert_eq!(request.len(), ENCAPSULATION_HEADER_SIZE);
        let header = EncapsulationHeader::from_bytes(&request).unwrap();
        assert_eq!(header.command, command::LIST_IDENTITY);
        assert_eq!(header.length, 0);
        assert_eq!(header.session_handle, 0);
        assert_eq!(header.sender_context, context);
    }

    #[test]
    fn test_register_session_request() {
        let request = build_register_session([0; 8]);
        assert_eq!(request.len(), 28);
        assert_eq!(&request[0..2], &[0x65, 0x00]);
        assert_eq!(&request[2..4], &[0x04, 0x00]);
        assert_eq!(&request[24..28], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_register_session_reply() {
        let mut reply = EncapsulationHeader::new(command::REGISTER_SESSION, 4)
            .with_session(0xDEADBEEF)
            .to_bytes()
            .to_vec();
        reply.extend_from_slice(&[1, 0, 0, 0]);
        assert_eq!(parse_register_session_reply(&reply).unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn test_register_session_reply_with_status_fails() {
        let mut header = EncapsulationHeader::new(command::REGISTER_SESSION, 0);
        header.status = 0x69;
        assert_eq!(
            parse_register_session_reply(&header.to_bytes()),
            Err(DecodeError::EncapsulationStatus(0x69))
        );
    }

    #[test]
    fn test_unregister_session_carries_handle() {
        let request = build_unregister_session(0x01020304);
        let header = EncapsulationHeader::from_bytes(&request).unwrap();
        assert_eq!(header.command, command::UNREGISTER_SESSION);
        assert_eq!(header.session_handle, 0x01020304);
        assert_eq!(header.length, 0);
    }

    #[test]
    fn test_send_rr_data_layout() {
        let frame = wrap_send_rr_data(0x42, &[0xAA, 0xBB, 0xCC]);
        let (header, payload) = split_frame(&frame).unwrap();
        assert_eq!(header.command, command::SEND_RR_DATA);
        assert_eq!(header.session_handle, 0x42);
        assert_eq!(
            payload,
            &[
                0, 0, 0, 0, // interface handle
                0, 0, // timeout
                2, 0, // item count
                0, 0, 0, 0, // null address item
                0xB2, 0x00, 3, 0, // unconnected data item
                0xAA, 0xBB, 0xCC,
            ]
        );
    }

    #[test]
    fn test_unwrap_send_rr_data_returns_data_item() {
        let frame = wrap_send_rr_data(1, &[0x90, 0x00, 0x00, 0x00]);
        assert_eq!(unwrap_send_rr_data(&frame).unwrap(), &[0x90, 0, 0, 0]);
    }

    #[test]
    fn test_unwrap_send_rr_data_without_data_item() {
        let mut payload = vec![0u8; 6];
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&0x00A1u16.to_le_bytes());
        payload.extend_from_slice(&4u16.to_le_bytes());
        payload.extend_from_slice(&[1, 2, 3, 4]);
        let reply = frame(
            EncapsulationHeader::new(command::SEND_RR_DATA, payload.len() as u16),
            &payload,
        );

        assert_eq!(
            unwrap_send_rr_data(&reply),
            Err(DecodeError::MissingItem(item_type::UNCONNECTED_DATA))
        );
        assert_eq!(
            DecodeError::MissingItem(item_type::UNCONNECTED_DATA).to_string(),
            "reply carries no CPF item of type 0x00B2"
        );
    }

    #[test]
    fn test_split_frame_length_mismatch() {
        let mut frame = wrap_send_rr_data(1, &[1, 2]);
        frame.pop();
        assert!(matches!(
            split_frame(&frame),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_fresh_sender_context_changes() {
        assert_ne!(fresh_sender_context(), fresh_sender_context());
    }
}
