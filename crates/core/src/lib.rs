//! Threadmem Core - Domain entities, services, and traits.
//!
//! This crate contains the thread/message model, content versioning and the
//! image store. It is database-agnostic and defines the repository trait
//! implemented by the `threadmem-storage` crate.

pub mod config;
pub mod errors;
pub mod images;
pub mod threads;

pub use config::{Config, DatabaseConfig, ImageBackendConfig};
pub use images::{ImageInput, ImageRef, ImageStore};
pub use threads::{
    Message, MessageFilter, NewPost, NewThread, Thread, ThreadFilter, ThreadRepositoryTrait,
    ThreadService,
};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
