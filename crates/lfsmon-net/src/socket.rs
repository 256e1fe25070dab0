use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::NetError;

/// An abstract message-oriented connection.
///
/// `recv` yields exactly one framed message (header plus payload); stream
/// transports reassemble frames before returning.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    /// Send one already-framed message.
    async fn send(&self, data: Bytes) -> Result<(), NetError>;

    /// Receive one framed message.
    async fn recv(&self) -> Result<Bytes, NetError>;

    fn peer_addr(&self) -> SocketAddr;

    fn local_addr(&self) -> SocketAddr;

    async fn close(&self);
}

/// Accepts incoming connections.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    type Socket: Socket;

    async fn accept(&self) -> Result<Self::Socket, NetError>;

    fn local_addr(&self) -> SocketAddr;
}
