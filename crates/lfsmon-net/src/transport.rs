use async_trait::async_trait;
use bytes::Bytes;

use crate::error::NetError;
use crate::message::{frame, MessageHeader, MESSAGE_HEADER_SIZE, MESSAGE_MAX_SIZE};
use crate::socket::Socket;

/// Establishes new connections to a remote `host:port`.
#[async_trait]
pub trait AsyncConnector<S: Socket>: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<S, NetError>;
}

/// Frame a payload with a `MessageHeader` and send it.
pub async fn send_message<S: Socket + ?Sized>(socket: &S, payload: &[u8]) -> Result<(), NetError> {
    if payload.len() > MESSAGE_MAX_SIZE {
        return Err(NetError::MessageTooLarge {
            size: payload.len(),
            max: MESSAGE_MAX_SIZE,
        });
    }
    socket.send(Bytes::from(frame(payload))).await
}

/// Read one framed message and return its validated payload.
pub async fn recv_message<S: Socket + ?Sized>(socket: &S) -> Result<Bytes, NetError> {
    let data = socket.recv().await?;
    if data.is_empty() {
        return Err(NetError::ConnectionClosed);
    }
    decode_frame(data)
}

/// Split a complete frame into its payload, validating header and checksum.
pub fn decode_frame(data: Bytes) -> Result<Bytes, NetError> {
    if data.len() < MESSAGE_HEADER_SIZE {
        return Err(NetError::IncompleteMessage {
            need: MESSAGE_HEADER_SIZE,
            have: data.len(),
        });
    }
    let mut header_bytes = [0u8; MESSAGE_HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..MESSAGE_HEADER_SIZE]);
    let header = MessageHeader::from_bytes(&header_bytes);

    let end = MESSAGE_HEADER_SIZE + header.size as usize;
    if data.len() < end {
        return Err(NetError::IncompleteMessage {
            need: end,
            have: data.len(),
        });
    }
    let payload = data.slice(MESSAGE_HEADER_SIZE..end);
    header.validate(&payload)?;
    Ok(payload)
}
