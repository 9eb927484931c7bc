use crate::errors::Result;
use crate::threads::threads_model::{Thread, ThreadFilter};

/// Trait for thread persistence.
///
/// `save` stores the whole thread snapshot atomically: the thread row and the
/// exact message list, or nothing. The last committed save wins.
pub trait ThreadRepositoryTrait: Send + Sync {
    fn save(&self, thread: &Thread) -> Result<()>;
    /// Fails with `NotFound` for an unknown id.
    fn load(&self, thread_id: &str) -> Result<Thread>;
    /// Matching threads, oldest first.
    fn find(&self, filter: &ThreadFilter) -> Result<Vec<Thread>>;
    /// Removes the thread and its messages. Fails with `NotFound` if nothing was removed.
    fn delete(&self, thread_id: &str) -> Result<()>;
}
