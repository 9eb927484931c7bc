use std::sync::Arc;

use log::{debug, warn};
use uuid::Uuid;

use super::export::ChatImport;
use super::threads_model::{
    check_content, normalize_role, now_seconds, Message, MessageEdit, Metadata, NewPost,
    NewThread, Thread, ThreadFilter,
};
use super::threads_traits::ThreadRepositoryTrait;
use crate::errors::{Error, Result};
use crate::images::{ImageInput, ImageRef, ImageStore};

/// Performs every thread mutation.
///
/// Mutations are applied to a copy of the caller's thread, versioned, and
/// saved. Only a successful save replaces the caller's thread, so a failed
/// operation leaves it untouched. Images written for a failed operation are
/// removed again; images dropped by a successful one are removed after commit.
pub struct ThreadService {
    repository: Arc<dyn ThreadRepositoryTrait>,
    images: Arc<ImageStore>,
}

impl ThreadService {
    pub fn new(repository: Arc<dyn ThreadRepositoryTrait>, images: Arc<ImageStore>) -> Self {
        Self { repository, images }
    }

    pub fn image_store(&self) -> &ImageStore {
        &self.images
    }

    /// Creates and persists an empty thread.
    pub fn create_thread(&self, new_thread: NewThread) -> Result<Thread> {
        let thread = Thread::create(Uuid::new_v4().to_string(), new_thread, now_seconds());
        self.repository.save(&thread)?;
        debug!("Created thread {}", thread.id());
        Ok(thread)
    }

    /// Appends a message. The message is durable when this returns.
    pub fn post(&self, thread: &mut Thread, post: NewPost) -> Result<Message> {
        let role = normalize_role(&post.role)?;
        check_content(&post.text, post.images.len())?;
        let register = thread.roles().admit(&role)?;

        let images = self.store_images(post.images, thread.id())?;
        let now = now_seconds();
        let mut next = thread.clone();
        if register {
            debug!("Registering role '{}' on thread {}", role, thread.id());
            next.roles_mut().register(&role);
        }
        let message = Message {
            id: Uuid::new_v4().to_string(),
            thread_id: thread.id().to_string(),
            role,
            text: post.text,
            images,
            private: post.private,
            metadata: post.metadata,
            created: next.next_message_time(now),
        };
        next.push_message(message.clone());

        self.commit(thread, next, now, &message.images)?;
        debug!("Posted message {} to thread {}", message.id, thread.id());
        Ok(message)
    }

    pub fn delete_message(&self, thread: &mut Thread, message_id: &str) -> Result<()> {
        let mut next = thread.clone();
        let removed = next
            .remove_message(message_id)
            .ok_or_else(|| Error::not_found("message", message_id))?;

        self.commit(thread, next, now_seconds(), &[])?;
        self.discard_all(&removed.images);
        Ok(())
    }

    /// Replaces the text and/or images of a message. Replaced images are
    /// removed after the change is saved.
    pub fn edit_message(
        &self,
        thread: &mut Thread,
        message_id: &str,
        edit: MessageEdit,
    ) -> Result<Message> {
        let current = thread
            .message(message_id)
            .ok_or_else(|| Error::not_found("message", message_id))?;

        let text_changed = edit.text.as_ref().is_some_and(|text| *text != current.text);
        if !text_changed && edit.images.is_none() {
            return Ok(current.clone());
        }
        let text = edit.text.unwrap_or_else(|| current.text.clone());
        let image_count = edit.images.as_ref().map_or(current.images.len(), Vec::len);
        check_content(&text, image_count)?;

        let new_images = match edit.images {
            Some(inputs) => Some(self.store_images(inputs, thread.id())?),
            None => None,
        };
        let staged = new_images.clone().unwrap_or_default();

        let mut next = thread.clone();
        let message = next
            .message_mut(message_id)
            .ok_or_else(|| Error::not_found("message", message_id))?;
        message.text = text;
        let replaced = new_images.map(|images| std::mem::replace(&mut message.images, images));
        let updated = message.clone();

        self.commit(thread, next, now_seconds(), &staged)?;
        if let Some(replaced) = replaced {
            self.discard_all(&replaced);
        }
        Ok(updated)
    }

    /// Returns `false` without writing when the role is already registered.
    pub fn add_role(&self, thread: &mut Thread, role: &str) -> Result<bool> {
        let role = normalize_role(role)?;
        let mut next = thread.clone();
        if !next.roles_mut().register(&role) {
            return Ok(false);
        }
        self.commit(thread, next, now_seconds(), &[])?;
        Ok(true)
    }

    /// Retires a registered role. Its messages stay; new posts are rejected.
    pub fn remove_role(&self, thread: &mut Thread, role: &str) -> Result<bool> {
        let role = normalize_role(role)?;
        let mut next = thread.clone();
        if !next.roles_mut().retire(&role) {
            return Ok(false);
        }
        self.commit(thread, next, now_seconds(), &[])?;
        Ok(true)
    }

    pub fn rename(&self, thread: &mut Thread, name: Option<String>) -> Result<bool> {
        if thread.name() == name.as_deref() {
            return Ok(false);
        }
        let mut next = thread.clone();
        next.set_name(name);
        self.commit(thread, next, now_seconds(), &[])?;
        Ok(true)
    }

    pub fn set_public(&self, thread: &mut Thread, public: bool) -> Result<bool> {
        if thread.is_public() == public {
            return Ok(false);
        }
        let mut next = thread.clone();
        next.set_public(public);
        self.commit(thread, next, now_seconds(), &[])?;
        Ok(true)
    }

    pub fn set_metadata(&self, thread: &mut Thread, metadata: Metadata) -> Result<bool> {
        if *thread.metadata() == metadata {
            return Ok(false);
        }
        let mut next = thread.clone();
        next.set_metadata(metadata);
        self.commit(thread, next, now_seconds(), &[])?;
        Ok(true)
    }

    /// Drops image attachments, optionally only from one role's messages.
    /// Returns how many images were removed.
    pub fn strip_images(&self, thread: &mut Thread, role: Option<&str>) -> Result<usize> {
        let mut next = thread.clone();
        let mut removed = Vec::new();
        for message in next.messages_mut() {
            if role.map_or(true, |r| message.role == r) {
                removed.append(&mut message.images);
            }
        }
        if removed.is_empty() {
            return Ok(0);
        }

        self.commit(thread, next, now_seconds(), &[])?;
        self.discard_all(&removed);
        Ok(removed.len())
    }

    pub fn find(&self, filter: &ThreadFilter) -> Result<Vec<Thread>> {
        self.repository.find(filter)
    }

    pub fn load(&self, thread_id: &str) -> Result<Thread> {
        self.repository.load(thread_id)
    }

    /// Deletes the thread, its messages and their bucket images. A second
    /// call fails with `NotFound`, meaning there is nothing left to remove.
    ///
    /// Image removal happens after the rows are gone and is best-effort: a
    /// failed discard is logged and leaves the object orphaned.
    pub fn delete(&self, thread_id: &str) -> Result<()> {
        let images: Vec<ImageRef> = if self.images.uses_bucket() {
            self.repository
                .load(thread_id)?
                .image_refs()
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        self.repository.delete(thread_id)?;
        self.discard_all(&images);
        debug!("Deleted thread {}", thread_id);
        Ok(())
    }

    /// Copies a thread under a new id. Messages get new ids and every image is
    /// stored again, so the copy shares nothing with the original.
    pub fn duplicate(&self, thread: &Thread) -> Result<Thread> {
        let now = now_seconds();
        let mut copy = Thread::create(
            Uuid::new_v4().to_string(),
            NewThread {
                owner_id: thread.owner_id().map(str::to_string),
                name: thread.name().map(str::to_string),
                public: thread.is_public(),
                metadata: thread.metadata().clone(),
                roles: Vec::new(),
                open_roles: thread.roles().is_open(),
            },
            now,
        );
        *copy.roles_mut() = thread.roles().clone();

        let mut staged = Vec::new();
        for message in thread.all_messages() {
            let mut images = Vec::with_capacity(message.images.len());
            for image in &message.images {
                match self.images.duplicate(image, copy.id()) {
                    Ok(duplicate) => images.push(duplicate),
                    Err(e) => {
                        self.discard_all(staged.iter().chain(images.iter()));
                        return Err(e);
                    }
                }
            }
            staged.extend(images.iter().cloned());
            copy.push_message(Message {
                id: Uuid::new_v4().to_string(),
                thread_id: copy.id().to_string(),
                images,
                ..message.clone()
            });
        }

        copy.refresh(now);
        if let Err(e) = self.repository.save(&copy) {
            self.discard_all(&staged);
            return Err(e);
        }
        debug!("Duplicated thread {} as {}", thread.id(), copy.id());
        Ok(copy)
    }

    /// Builds and persists a thread from a chat transcript in one save.
    pub fn import_chat(&self, new_thread: NewThread, import: ChatImport) -> Result<Thread> {
        let now = now_seconds();
        let mut thread = Thread::create(Uuid::new_v4().to_string(), new_thread, now);
        let mut staged: Vec<ImageRef> = Vec::new();

        for entry in import.messages {
            let post = entry.into_post();
            let message = match self.build_imported(&mut thread, post, now) {
                Ok(message) => message,
                Err(e) => {
                    self.discard_all(&staged);
                    return Err(e);
                }
            };
            staged.extend(message.images.iter().cloned());
            thread.push_message(message);
        }

        thread.refresh(now);
        if let Err(e) = self.repository.save(&thread) {
            self.discard_all(&staged);
            return Err(e);
        }
        debug!(
            "Imported {} messages into thread {}",
            thread.all_messages().len(),
            thread.id()
        );
        Ok(thread)
    }

    pub fn resolve_image(&self, reference: &ImageRef) -> Result<Vec<u8>> {
        self.images.resolve(reference)
    }

    fn build_imported(&self, thread: &mut Thread, post: NewPost, now: f64) -> Result<Message> {
        let role = normalize_role(&post.role)?;
        check_content(&post.text, post.images.len())?;
        if thread.roles().admit(&role)? {
            thread.roles_mut().register(&role);
        }
        let images = self.store_images(post.images, thread.id())?;
        Ok(Message {
            id: Uuid::new_v4().to_string(),
            thread_id: thread.id().to_string(),
            role,
            text: post.text,
            images,
            private: post.private,
            metadata: post.metadata,
            created: thread.next_message_time(now),
        })
    }

    /// Versions and saves `next`, then swaps it into `thread`. On failure the
    /// `staged` images are removed and `thread` is left as it was.
    fn commit(
        &self,
        thread: &mut Thread,
        mut next: Thread,
        now: f64,
        staged: &[ImageRef],
    ) -> Result<()> {
        next.refresh(now);
        if let Err(e) = self.repository.save(&next) {
            self.discard_all(staged);
            return Err(e);
        }
        *thread = next;
        Ok(())
    }

    /// Stores all inputs or none of them.
    fn store_images(&self, inputs: Vec<ImageInput>, scope: &str) -> Result<Vec<ImageRef>> {
        let mut stored = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.images.store(input, scope) {
                Ok(reference) => stored.push(reference),
                Err(e) => {
                    self.discard_all(&stored);
                    return Err(e);
                }
            }
        }
        Ok(stored)
    }

    /// Best-effort removal; failures only leave orphaned objects behind.
    fn discard_all<'a>(&self, images: impl IntoIterator<Item = &'a ImageRef>) {
        for image in images {
            if let Err(e) = self.images.discard(image) {
                warn!("Failed to discard image {}: {}", image.id(), e);
            }
        }
    }
}
