//! TCP transport for the lfsmon RPC layer.
//!
//! The stream is split into independent read/write halves so that sending
//! and receiving never contend on one lock. Reads reassemble whole frames
//! from the byte stream using the size in each [`MessageHeader`].

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lfsmon_net::message::{MessageHeader, MESSAGE_HEADER_SIZE};
use lfsmon_net::{AsyncConnector, Listener, NetError, Socket};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

/// A TCP connection carrying framed messages.
pub struct TcpSocket {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl TcpSocket {
    pub fn from_stream(stream: tokio::net::TcpStream) -> Result<Self, NetError> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
            peer_addr,
            local_addr,
        })
    }

    async fn read_frame(&self) -> Result<Bytes, NetError> {
        let mut reader = self.reader.lock().await;

        let mut header_bytes = [0u8; MESSAGE_HEADER_SIZE];
        match reader.read_exact(&mut header_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetError::ConnectionClosed)
            }
            Err(e) => return Err(e.into()),
        }
        let header = MessageHeader::from_bytes(&header_bytes);
        header.check_header()?;

        let size = header.size as usize;
        let mut buf = BytesMut::zeroed(MESSAGE_HEADER_SIZE + size);
        buf[..MESSAGE_HEADER_SIZE].copy_from_slice(&header_bytes);
        reader.read_exact(&mut buf[MESSAGE_HEADER_SIZE..]).await?;
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[async_trait]
impl Socket for TcpSocket {
    async fn send(&self, data: Bytes) -> Result<(), NetError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes, NetError> {
        self.read_frame().await
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// A TCP listener yielding [`TcpSocket`]s.
pub struct TcpListener {
    inner: tokio::net::TcpListener,
    local_addr: SocketAddr,
}

impl TcpListener {
    /// Bind to `addr` (`host:port`); port 0 picks a free port.
    pub async fn bind(addr: &str) -> Result<Self, NetError> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        tracing::info!(%local_addr, "TCP listener bound");
        Ok(Self { inner, local_addr })
    }
}

#[async_trait]
impl Listener for TcpListener {
    type Socket = TcpSocket;

    async fn accept(&self) -> Result<TcpSocket, NetError> {
        let (stream, peer) = self.inner.accept().await?;
        tracing::debug!(%peer, "accepted TCP connection");
        TcpSocket::from_stream(stream)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Opens TCP connections; `addr` may name a host that needs resolving.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AsyncConnector<TcpSocket> for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<TcpSocket, NetError> {
        tracing::debug!(addr, "connecting via TCP");
        let stream = tokio::net::TcpStream::connect(addr).await?;
        TcpSocket::from_stream(stream)
    }
}
