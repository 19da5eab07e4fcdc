#![forbid(unsafe_code)]

use cf_core::{NodeId, PersistError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid stored row: {0}")]
    InvalidRow(String),
    #[error("unknown id: {0}")]
    UnknownId(NodeId),
    #[error("id already exists: {0}")]
    AlreadyExists(NodeId),
}

impl StoreError {
    fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Sql(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}

impl From<StoreError> for PersistError {
    fn from(value: StoreError) -> Self {
        if value.is_busy() {
            return Self::Unavailable(value.to_string());
        }
        match value {
            StoreError::UnknownId(id) => Self::NotFound(id),
            StoreError::AlreadyExists(id) => Self::Conflict(id),
            StoreError::InvalidInput(message) => Self::InvalidInput(message),
            other => Self::Backend(other.to_string()),
        }
    }
}
