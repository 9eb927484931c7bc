//! Storage-specific error types.
//!
//! This module provides error types that wrap Diesel-specific errors and convert
//! them to the database-agnostic error types defined in `threadmem_core`.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use threadmem_core::errors::{DatabaseError, Error};

/// Storage-specific errors that wrap Diesel and r2d2 types.
///
/// These errors are internal to the storage layer and are converted to
/// `threadmem_core::Error` before being returned to callers.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Query execution failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A stored column could not be decoded.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionFailed(e) => Error::StorageUnavailable(e.to_string()),
            StorageError::PoolError(e) => Error::StorageUnavailable(e.to_string()),
            StorageError::Io(e) => Error::StorageUnavailable(e.to_string()),
            StorageError::QueryFailed(DieselError::NotFound) => {
                Error::NotFound("Record not found".to_string())
            }
            StorageError::QueryFailed(DieselError::DatabaseError(kind, info)) => match kind {
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation
                | DatabaseErrorKind::SerializationFailure => {
                    Error::PersistenceConflict(info.message().to_string())
                }
                DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::UnableToSendCommand => {
                    Error::StorageUnavailable(info.message().to_string())
                }
                _ => Error::Database(DatabaseError::QueryFailed(info.message().to_string())),
            },
            StorageError::QueryFailed(DieselError::BrokenTransactionManager) => {
                Error::StorageUnavailable("transaction manager is broken".to_string())
            }
            StorageError::QueryFailed(e) => Error::Database(DatabaseError::QueryFailed(e.to_string())),
            StorageError::MigrationFailed(e) => Error::Database(DatabaseError::MigrationFailed(e)),
            StorageError::SerializationError(e) => Error::Database(DatabaseError::Internal(e)),
            StorageError::CorruptRecord(e) => Error::Database(DatabaseError::CorruptRecord(e)),
        }
    }
}

/// Extension trait for converting Diesel and pool Results to core Results.
///
/// Since we can't implement `From<DieselError> for Error` due to orphan rules,
/// this goes through [`StorageError`].
pub trait IntoCore<T> {
    fn into_core(self) -> threadmem_core::Result<T>;
}

impl<T> IntoCore<T> for std::result::Result<T, DieselError> {
    fn into_core(self) -> threadmem_core::Result<T> {
        self.map_err(|e| StorageError::from(e).into())
    }
}

impl<T> IntoCore<T> for std::result::Result<T, r2d2::Error> {
    fn into_core(self) -> threadmem_core::Result<T> {
        self.map_err(|e| StorageError::from(e).into())
    }
}

impl<T> IntoCore<T> for std::result::Result<T, StorageError> {
    fn into_core(self) -> threadmem_core::Result<T> {
        self.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_core_not_found() {
        let err: Error = StorageError::QueryFailed(DieselError::NotFound).into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rollback_maps_to_query_failed() {
        let err: Error = StorageError::QueryFailed(DieselError::RollbackTransaction).into();
        assert!(matches!(err, Error::Database(DatabaseError::QueryFailed(_))));
    }

    #[test]
    fn test_diesel_results_convert_through_storage_error() {
        let missing: std::result::Result<(), DieselError> = Err(DieselError::NotFound);
        assert!(missing.into_core().unwrap_err().is_not_found());

        let ok: std::result::Result<u8, DieselError> = Ok(7);
        assert_eq!(ok.into_core().unwrap(), 7);
    }

    #[test]
    fn test_corrupt_record_kept_distinct() {
        let err: Error = StorageError::CorruptRecord("roles".to_string()).into();
        assert!(matches!(err, Error::Database(DatabaseError::CorruptRecord(_))));
    }
}
