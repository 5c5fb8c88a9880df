//! Error types shared by the scheduler, selector, ledger and stores

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors surfaced by SRS operations
#[derive(Debug, Error)]
pub enum SrsError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SrsError {
    /// Whether the caller may retry the operation with backoff.
    ///
    /// The presentation layer shows "try again" for these and
    /// "refresh and reload the session" for everything else.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for SrsError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::DiskFull
                | ErrorCode::OutOfMemory => Self::StorageUnavailable(err.to_string()),
                ErrorCode::ConstraintViolation => Self::Conflict(err.to_string()),
                _ => Self::Storage(err.to_string()),
            },
            _ => Self::Storage(err.to_string()),
        }
    }
}

impl From<SrsError> for String {
    fn from(err: SrsError) -> Self {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, SrsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(SrsError::Conflict("x".into()).is_retryable());
        assert!(SrsError::StorageUnavailable("x".into()).is_retryable());
        assert!(!SrsError::InvalidArgument("x".into()).is_retryable());
        assert!(!SrsError::InvalidState("x".into()).is_retryable());
        assert!(!SrsError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_busy_maps_to_unavailable() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(matches!(SrsError::from(err), SrsError::StorageUnavailable(_)));
    }

    #[test]
    fn test_other_errors_map_to_storage() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(SrsError::from(err), SrsError::Storage(_)));
    }
}
