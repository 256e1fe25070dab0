use std::time::Duration;

use bytes::Bytes;
use lfsmon_types::{Status, StatusCode};

use crate::error::NetError;
use crate::server::{encode_request, RESPONSE_ENVELOPE_SIZE};
use crate::socket::Socket;
use crate::transport::{recv_message, send_message, AsyncConnector};

/// An RPC client bound to one long-lived connection.
///
/// Calls are issued one at a time; the reply to a call is the next message
/// on the connection.
pub struct RpcClient<S: Socket> {
    socket: S,
    timeout: Duration,
}

impl<S: Socket> RpcClient<S> {
    pub fn new(socket: S, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    /// Connect to `addr`, giving up after `timeout`.
    pub async fn connect(
        connector: &(dyn AsyncConnector<S> + '_),
        addr: &str,
        timeout: Duration,
    ) -> Result<Self, NetError> {
        let socket = tokio::time::timeout(timeout, connector.connect(addr))
            .await
            .map_err(|_| NetError::Timeout)??;
        Ok(Self::new(socket, timeout))
    }

    /// Send a request and wait for its reply body.
    ///
    /// A non-OK reply becomes [`NetError::Remote`].
    pub async fn call(&self, service_id: u16, method_id: u16, body: &[u8]) -> Result<Bytes, NetError> {
        let request = encode_request(service_id, method_id, body);
        let payload = tokio::time::timeout(self.timeout, async {
            send_message(&self.socket, &request).await?;
            recv_message(&self.socket).await
        })
        .await
        .map_err(|_| NetError::Timeout)??;
        decode_response(payload)
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub async fn close(&self) {
        self.socket.close().await;
    }
}

/// Split a reply into its body, or the remote status if it is not OK.
pub fn decode_response(payload: Bytes) -> Result<Bytes, NetError> {
    if payload.len() < RESPONSE_ENVELOPE_SIZE {
        return Err(NetError::MalformedResponse(payload.len()));
    }
    let code = u16::from_le_bytes([payload[0], payload[1]]);
    let body = payload.slice(RESPONSE_ENVELOPE_SIZE..);
    if code == StatusCode::OK {
        return Ok(body);
    }
    let status = if body.is_empty() {
        Status::new(code)
    } else {
        Status::with_message(code, String::from_utf8_lossy(&body).into_owned())
    };
    Err(NetError::Remote(status))
}
