//! Threads module - versioned message logs, their service, and persistence traits.

pub mod export;
mod threads_model;
mod threads_service;
mod threads_traits;
pub mod version;

pub use export::{ChatImport, ExportMessage, ExportSchema, ImportContent, ImportMessage};
pub use threads_model::{
    now_seconds, Message, MessageEdit, MessageFilter, Messages, Metadata, NewPost, NewThread,
    RoleSet, Thread, ThreadFilter, ThreadRecord,
};
pub use threads_service::ThreadService;
pub use threads_traits::ThreadRepositoryTrait;
pub use version::compute_version;
