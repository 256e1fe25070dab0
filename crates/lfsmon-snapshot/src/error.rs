use lfsmon_types::{MonitorCode, Role, Status};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// This node does not host the family's counter source.
    #[error("node does not host the {0} role")]
    UnsupportedRole(Role),

    /// A steady-state diff was asked for before any baseline.
    #[error("no {0} baseline on this connection")]
    NotInitialized(Role),
}

impl From<SnapshotError> for Status {
    fn from(e: SnapshotError) -> Self {
        let code = match e {
            SnapshotError::UnsupportedRole(_) => MonitorCode::UNSUPPORTED_ROLE,
            SnapshotError::NotInitialized(_) => MonitorCode::NOT_INITIALIZED,
        };
        Status::with_message(code, e.to_string())
    }
}
