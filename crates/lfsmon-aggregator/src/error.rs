use lfsmon_config::ConfigError;
use lfsmon_net::NetError;
use lfsmon_store::StoreError;
use lfsmon_types::{MonitorCode, Status};
use thiserror::Error;

/// Failures seen by one node's pipeline.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The node could not be reached or the connection dropped.
    #[error("connection error: {0}")]
    Connection(NetError),

    /// The node answered, but with a fault or an unreadable body.
    #[error("protocol error: {0}")]
    Protocol(Status),

    /// The node has no counters for the family or could not read them.
    #[error("counter data error: {0}")]
    Data(Status),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// A bounded persistence queue was full and the write was dropped.
    #[error("persistence queue full, {dropped} documents dropped")]
    QueueFull { dropped: usize },

    /// The watermark was not advanced because documents it would cover
    /// were dropped.
    #[error("watermark {ts} held back, an earlier batch was dropped")]
    WatermarkHeld { ts: i64 },

    #[error("shutting down")]
    Shutdown,
}

impl CollectError {
    /// Whether retrying the same operation can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CollectError::Connection(_) => true,
            CollectError::Persistence(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<NetError> for CollectError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Remote(status)
                if status.code() == MonitorCode::COUNTER_READ_FAILED
                    || status.code() == MonitorCode::UNSUPPORTED_ROLE =>
            {
                CollectError::Data(status)
            }
            NetError::Remote(status) => CollectError::Protocol(status),
            e if e.is_connection_loss() => CollectError::Connection(e),
            e => CollectError::Protocol(Status::with_message(
                lfsmon_types::RPCCode::VERIFY_RESPONSE_FAILED,
                e.to_string(),
            )),
        }
    }
}

impl From<Status> for CollectError {
    fn from(status: Status) -> Self {
        CollectError::Protocol(status)
    }
}
