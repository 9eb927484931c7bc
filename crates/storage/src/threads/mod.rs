//! Thread and message persistence.

mod model;
mod repository;

pub use model::{MessageDB, ThreadDB};
#[cfg(feature = "postgres")]
pub use repository::PgThreadRepository;
pub use repository::SqliteThreadRepository;
