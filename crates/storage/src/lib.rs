//! Storage implementation for threadmem.
//!
//! This crate provides all database-related functionality using Diesel ORM.
//! It implements the repository trait defined in `threadmem-core` and contains:
//! - Database connection pooling and management
//! - Diesel migrations for SQLite and (with the `postgres` feature) Postgres
//! - Repository implementations for threads and messages
//! - Database-specific model types (with Diesel derives)
//!
//! # Architecture
//!
//! This crate is the only place in the workspace where Diesel dependencies exist.
//!
//! ```text
//!   core (domain)          cli
//!         │                 │
//!         └────────┬────────┘
//!                  │
//!                  ▼
//!          storage (this crate)
//!                  │
//!          ┌───────┴───────┐
//!          ▼               ▼
//!      SQLite file     Postgres
//! ```

use std::sync::Arc;

use log::info;
use threadmem_core::config::DatabaseConfig;
use threadmem_core::threads::ThreadRepositoryTrait;

pub mod db;
pub mod errors;
pub mod schema;
pub mod threads;
pub mod utils;

// Re-export database utilities
pub use db::{create_pool, get_connection, init, run_migrations, DbConnection, DbPool};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

#[cfg(feature = "postgres")]
pub use threads::PgThreadRepository;
pub use threads::SqliteThreadRepository;

// Re-export from threadmem-core for convenience
pub use threadmem_core::errors::{DatabaseError, Error, Result};

/// Opens the configured engine, runs its migrations and returns the repository.
pub fn connect(config: &DatabaseConfig) -> Result<Arc<dyn ThreadRepositoryTrait>> {
    match config {
        DatabaseConfig::Sqlite { path, pool_size } => {
            info!("Opening SQLite database at {}", path.display());
            Ok(Arc::new(SqliteThreadRepository::open(path, *pool_size)?))
        }
        #[cfg(feature = "postgres")]
        DatabaseConfig::Postgres {
            host,
            database,
            pool_size,
            ..
        } => {
            info!("Connecting to Postgres database {} on {}", database, host);
            Ok(Arc::new(PgThreadRepository::open(&config.url(), *pool_size)?))
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseConfig::Postgres { .. } => Err(Error::InvalidConfigValue(
            "DB_TYPE=postgres needs threadmem-storage built with the `postgres` feature"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_sqlite_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("threads.db");
        let repo = connect(&DatabaseConfig::Sqlite {
            path: path.clone(),
            pool_size: 2,
        })
        .unwrap();

        assert!(path.exists());
        assert!(repo.load("nope").unwrap_err().is_not_found());
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn test_connect_postgres_without_feature() {
        let result = connect(&DatabaseConfig::Postgres {
            host: "localhost".to_string(),
            user: "u".to_string(),
            password: "p".to_string(),
            database: "threads".to_string(),
            pool_size: 1,
        });
        assert!(matches!(result, Err(Error::InvalidConfigValue(_))));
    }
}
