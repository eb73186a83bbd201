//! An explicit-messaging session over a TCP byte stream.
//!
//! EtherNet/IP over TCP is framed by the encapsulation header: read 24
//! bytes, then exactly `length` more.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::codec::cip::{DEFAULT_ROUTE_ADDRESS, DEFAULT_ROUTE_PORT};
use crate::codec::encapsulation::{
    build_register_session, build_unregister_session, parse_register_session_reply,
};
use crate::codec::{
    build_get_attribute_all, build_get_attribute_single, build_set_attribute_single,
    build_unconnected_send, fresh_sender_context, parse_attribute_reply, wrap_send_rr_data,
    EncapsulationHeader, ENCAPSULATION_HEADER_SIZE,
};
use crate::error::{CommissionError, DecodeError, Result};

/// Upper bound on a reply body; anything larger is not a CIP reply.
const MAX_FRAME_PAYLOAD: usize = 4096;

/// A registered CIP session. Every operation is bounded by `op_timeout`.
pub struct CipSession<S> {
    stream: S,
    session_handle: u32,
    op_timeout: Duration,
}

impl<S> CipSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends RegisterSession and waits for the device's session handle.
    pub async fn register(mut stream: S, op_timeout: Duration) -> Result<Self> {
        let request = build_register_session(fresh_sender_context());
        write_frame(&mut stream, &request, op_timeout, "RegisterSession").await?;
        let reply = read_frame(&mut stream, op_timeout, "RegisterSession").await?;
        let session_handle = parse_register_session_reply(&reply)?;
        debug!("Registered session 0x{:08X}", session_handle);

        Ok(Self {
            stream,
            session_handle,
            op_timeout,
        })
    }

    pub fn session_handle(&self) -> u32 {
        self.session_handle
    }

    /// Writes one attribute with Set_Attribute_Single.
    pub async fn set_attribute_single(
        &mut self,
        class_id: u16,
        instance_id: u16,
        attribute_id: u16,
        data: &[u8],
    ) -> Result<()> {
        let request = build_set_attribute_single(class_id, instance_id, attribute_id, data);
        self.request(&request, "Set_Attribute_Single").await?;
        Ok(())
    }

    /// Reads one attribute with Get_Attribute_Single.
    pub async fn get_attribute_single(
        &mut self,
        class_id: u16,
        instance_id: u16,
        attribute_id: u16,
    ) -> Result<Vec<u8>> {
        let request = build_get_attribute_single(class_id, instance_id, attribute_id);
        self.request(&request, "Get_Attribute_Single").await
    }

    /// Reads every attribute of an instance with Get_Attribute_All.
    pub async fn get_attribute_all(&mut self, class_id: u16, instance_id: u16) -> Result<Vec<u8>> {
        let request = build_get_attribute_all(class_id, instance_id);
        self.request(&request, "Get_Attribute_All").await
    }

    /// Sends UnregisterSession and closes the write half. The device does
    /// not answer, so only the send is awaited.
    pub async fn unregister(mut self) -> Result<()> {
        let request = build_unregister_session(self.session_handle);
        write_frame(&mut self.stream, &request, self.op_timeout, "UnregisterSession").await?;
        // Peer may already have closed; the session is gone either way.
        let _ = timeout(self.op_timeout, self.stream.shutdown()).await;
        debug!("Unregistered session 0x{:08X}", self.session_handle);
        Ok(())
    }

    async fn request(&mut self, embedded: &[u8], operation: &str) -> Result<Vec<u8>> {
        let message = build_unconnected_send(embedded, DEFAULT_ROUTE_PORT, DEFAULT_ROUTE_ADDRESS);
        let frame = wrap_send_rr_data(self.session_handle, &message);

        write_frame(&mut self.stream, &frame, self.op_timeout, operation).await?;
        let reply = read_frame(&mut self.stream, self.op_timeout, operation).await?;
        Ok(parse_attribute_reply(&reply)?)
    }
}

async fn write_frame<S>(stream: &mut S, frame: &[u8], op_timeout: Duration, operation: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout(op_timeout, async {
        stream.write_all(frame).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| CommissionError::timeout(operation))?
    .map_err(|e| CommissionError::transport(format!("failed to send {}", operation), e))
}

/// Reads one complete encapsulation frame, header included.
async fn read_frame<S>(stream: &mut S, op_timeout: Duration, operation: &str) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    timeout(op_timeout, async {
        let mut header = [0u8; ENCAPSULATION_HEADER_SIZE];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| CommissionError::transport(format!("{} reply", operation), e))?;

        let length = EncapsulationHeader::from_bytes(&header)?.length as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(DecodeError::LengthMismatch {
                field: "encapsulation header",
                declared: length,
                actual: MAX_FRAME_PAYLOAD,
            }
            .into());
        }

        let mut frame = Vec::with_capacity(ENCAPSULATION_HEADER_SIZE + length);
        frame.extend_from_slice(&header);
        frame.resize(ENCAPSULATION_HEADER_SIZE + length, 0);
        stream
            .read_exact(&mut frame[ENCAPSULATION_HEADER_SIZE..])
            .await
            .map_err(|e| CommissionError::transport(format!("{} reply", operation), e))?;
        Ok(frame)
    })
    .await
    .map_err(|_| CommissionError::timeout(operation))?
}
