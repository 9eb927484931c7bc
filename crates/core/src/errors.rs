//! Core error types for threadmem.
//!
//! This module defines database-agnostic error types. Storage-specific errors
//! (from Diesel, r2d2, SQLite, Postgres) are converted to these types by the
//! storage layer.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for thread, message and image operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown thread or message id.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The image payload could not be decoded as an image.
    #[error("Unsupported image format: {0}")]
    UnsupportedImageFormat(String),

    /// The database, bucket, disk or remote host could not be reached.
    /// Surfaced as-is; the caller decides whether to retry.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The underlying transaction was rejected (constraint violation,
    /// serialization failure).
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Missing configuration key: {0}")]
    MissingConfigKey(String),
}

impl Error {
    pub fn not_found(kind: &str, id: &str) -> Self {
        Error::NotFound(format!("{} '{}'", kind, id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Database-agnostic error type for storage operations.
///
/// Uses `String` for all details so the storage crate can convert
/// backend-specific errors into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored column could not be decoded back into a domain value.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Role must not be empty")]
    EmptyRole,

    #[error("Message needs text or at least one image")]
    EmptyMessage,

    #[error("Role '{0}' is not registered on this thread")]
    RoleNotRegistered(String),

    #[error("Role '{0}' has been removed from this thread")]
    RoleRetired(String),

    #[error("Image is too large ({size} bytes, limit {limit})")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(ValidationError::InvalidInput(err.to_string()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_helper() {
        let err = Error::not_found("thread", "abc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: thread 'abc'");
    }

    #[test]
    fn test_validation_error_display() {
        let err: Error = ValidationError::RoleRetired("tool".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Input validation failed: Role 'tool' has been removed from this thread"
        );
        assert!(!err.is_not_found());
    }
}
