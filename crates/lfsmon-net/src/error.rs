use lfsmon_types::Status;
use thiserror::Error;

/// Errors that can occur in the networking layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The message checksum did not match the computed CRC32C.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The received header does not carry the message magic number.
    #[error("invalid message: bad magic (checksum low byte: {0:#04x})")]
    InvalidMagic(u8),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Fewer bytes arrived than the header announced.
    #[error("incomplete message: need {need} bytes, have {have}")]
    IncompleteMessage { need: usize, have: usize },

    /// A reply shorter than its status envelope.
    #[error("malformed response: {0} bytes")]
    MalformedResponse(usize),

    /// The server is shutting down and not accepting new requests.
    #[error("server shutting down")]
    ShuttingDown,

    /// The remote handler answered with a non-OK status.
    #[error("remote error: {0}")]
    Remote(Status),
}

impl NetError {
    /// Whether the error leaves the connection itself unusable.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            NetError::ConnectionClosed
                | NetError::Timeout
                | NetError::Io(_)
                | NetError::ChecksumMismatch { .. }
                | NetError::InvalidMagic(_)
                | NetError::IncompleteMessage { .. }
                | NetError::ShuttingDown
        )
    }
}
