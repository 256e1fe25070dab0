use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The sink could not be reached; a refresh may help.
    #[error("sink unreachable: {0}")]
    Unreachable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying after a connection refresh can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unreachable(_) | StoreError::Io(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}
