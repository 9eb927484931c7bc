//! Domain models for threads and messages.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};

use super::export::{export_thread, ExportSchema};
use super::version::compute_version;
use crate::errors::{DatabaseError, Result, ValidationError};
use crate::images::{ImageInput, ImageRef};

/// Free-form key/value metadata. Keys stay sorted so serialization is canonical.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Wall clock as float seconds since the Unix epoch, microsecond resolution.
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Smallest step between two message timestamps of the same thread.
const CLOCK_STEP: f64 = 0.000_001;

/// Roles a thread accepts posts from.
///
/// Retired roles keep their historical messages but reject new posts, even on
/// an open thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RoleSet {
    registered: Vec<String>,
    #[serde(default)]
    retired: Vec<String>,
    /// Unknown roles are registered on first post.
    #[serde(default)]
    open: bool,
}

impl RoleSet {
    pub fn new<I, S>(roles: I, open: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = RoleSet {
            registered: Vec::new(),
            retired: Vec::new(),
            open,
        };
        for role in roles {
            let role = role.into();
            let role = role.trim();
            if !role.is_empty() {
                set.register(role);
            }
        }
        set
    }

    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    pub fn retired(&self) -> &[String] {
        &self.retired
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_registered(&self, role: &str) -> bool {
        self.registered.iter().any(|r| r == role)
    }

    pub fn is_retired(&self, role: &str) -> bool {
        self.retired.iter().any(|r| r == role)
    }

    /// Checks whether `role` may post. `Ok(true)` means the role is unknown and
    /// will be registered by the post.
    pub(crate) fn admit(&self, role: &str) -> Result<bool> {
        if self.is_retired(role) {
            return Err(ValidationError::RoleRetired(role.to_string()).into());
        }
        if self.is_registered(role) {
            return Ok(false);
        }
        if self.open {
            Ok(true)
        } else {
            Err(ValidationError::RoleNotRegistered(role.to_string()).into())
        }
    }

    pub(crate) fn register(&mut self, role: &str) -> bool {
        if self.is_registered(role) {
            return false;
        }
        self.retired.retain(|r| r != role);
        self.registered.push(role.to_string());
        true
    }

    pub(crate) fn retire(&mut self, role: &str) -> bool {
        let Some(pos) = self.registered.iter().position(|r| r == role) else {
            return false;
        };
        let role = self.registered.remove(pos);
        self.retired.push(role);
        true
    }
}

/// A role-tagged post. Messages are created and removed only through
/// [`ThreadService`](super::ThreadService); a [`Thread`] hands out shared
/// references only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: String,
    pub text: String,
    pub images: Vec<ImageRef>,
    pub private: bool,
    pub metadata: Option<Metadata>,
    pub created: f64,
}

/// Trims the role and rejects empty ones.
pub(crate) fn normalize_role(role: &str) -> Result<String> {
    let role = role.trim();
    if role.is_empty() {
        return Err(ValidationError::EmptyRole.into());
    }
    Ok(role.to_string())
}

/// A message needs text, at least one image, or both.
pub(crate) fn check_content(text: &str, image_count: usize) -> Result<()> {
    if text.is_empty() && image_count == 0 {
        return Err(ValidationError::EmptyMessage.into());
    }
    Ok(())
}

/// Input for creating a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct NewThread {
    pub owner_id: Option<String>,
    pub name: Option<String>,
    pub public: bool,
    pub metadata: Metadata,
    /// Roles registered up front, in order.
    pub roles: Vec<String>,
    pub open_roles: bool,
}

impl Default for NewThread {
    fn default() -> Self {
        Self {
            owner_id: None,
            name: None,
            public: false,
            metadata: Metadata::new(),
            roles: Vec::new(),
            open_roles: true,
        }
    }
}

impl NewThread {
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }
}

/// Input for posting a message.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub role: String,
    pub text: String,
    pub images: Vec<ImageInput>,
    pub private: bool,
    pub metadata: Option<Metadata>,
}

impl NewPost {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
            images: Vec::new(),
            private: false,
            metadata: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<ImageInput>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Replacement content for an existing message. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct MessageEdit {
    pub text: Option<String>,
    pub images: Option<Vec<ImageInput>>,
}

/// Selects messages for [`Thread::messages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFilter {
    pub role: Option<String>,
    pub include_private: bool,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            role: None,
            include_private: true,
        }
    }
}

impl MessageFilter {
    pub fn public_only() -> Self {
        Self {
            role: None,
            include_private: false,
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    fn matches(&self, message: &Message) -> bool {
        (self.include_private || !message.private)
            && self.role.as_deref().map_or(true, |role| message.role == role)
    }
}

/// Lazy filtered view over a thread's messages. Clone it to restart.
#[derive(Debug, Clone)]
pub struct Messages<'a> {
    inner: std::slice::Iter<'a, Message>,
    filter: MessageFilter,
}

impl<'a> Iterator for Messages<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<Self::Item> {
        let filter = &self.filter;
        self.inner.by_ref().find(|message| filter.matches(message))
    }
}

/// Query for [`ThreadRepositoryTrait::find`](super::ThreadRepositoryTrait::find).
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadFilter {
    pub id: Option<String>,
    pub owner_id: Option<String>,
    pub public: Option<bool>,
    pub name: Option<String>,
}

impl ThreadFilter {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }
}

/// Plain persisted form of a thread, as read back by a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadRecord {
    pub id: String,
    pub owner_id: Option<String>,
    pub name: Option<String>,
    pub public: bool,
    pub metadata: Metadata,
    pub roles: RoleSet,
    pub version: String,
    pub created: f64,
    pub updated: f64,
    /// In position order.
    pub messages: Vec<Message>,
}

/// An ordered, versioned log of role-tagged messages.
///
/// The version always matches the hashed state. All mutation goes through
/// [`ThreadService`](super::ThreadService), which recomputes the version and
/// persists before the change becomes visible here.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    id: String,
    owner_id: Option<String>,
    name: Option<String>,
    public: bool,
    metadata: Metadata,
    roles: RoleSet,
    messages: Vec<Message>,
    version: String,
    created: f64,
    updated: f64,
}

impl Thread {
    pub(crate) fn create(id: String, new_thread: NewThread, now: f64) -> Self {
        let mut thread = Thread {
            id,
            owner_id: new_thread.owner_id,
            name: new_thread.name,
            public: new_thread.public,
            metadata: new_thread.metadata,
            roles: RoleSet::new(new_thread.roles, new_thread.open_roles),
            messages: Vec::new(),
            version: String::new(),
            created: now,
            updated: now,
        };
        thread.version = compute_version(&thread);
        thread
    }

    /// Rebuilds a thread from storage. Intended for repository
    /// implementations only; applications create threads through
    /// [`ThreadService`](super::ThreadService).
    ///
    /// Records whose messages belong to another thread, lack a role or repeat
    /// an id are rejected as corrupt. The stored version is kept; a mismatch
    /// with the recomputed hash is logged.
    #[doc(hidden)]
    pub fn from_record(record: ThreadRecord) -> Result<Self> {
        let mut seen = HashSet::with_capacity(record.messages.len());
        for message in &record.messages {
            let problem = if message.thread_id != record.id {
                Some("belongs to another thread")
            } else if message.role.trim().is_empty() {
                Some("has no role")
            } else if !seen.insert(message.id.as_str()) {
                Some("is duplicated")
            } else {
                None
            };
            if let Some(problem) = problem {
                return Err(DatabaseError::CorruptRecord(format!(
                    "message {} of thread {} {}",
                    message.id, record.id, problem
                ))
                .into());
            }
        }

        let thread = Thread {
            id: record.id,
            owner_id: record.owner_id,
            name: record.name,
            public: record.public,
            metadata: record.metadata,
            roles: record.roles,
            messages: record.messages,
            version: record.version,
            created: record.created,
            updated: record.updated,
        };
        let expected = compute_version(&thread);
        if expected != thread.version {
            warn!(
                "Thread {} stored version {} does not match its content ({})",
                thread.id, thread.version, expected
            );
        }
        Ok(thread)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn created(&self) -> f64 {
        self.created
    }

    pub fn updated(&self) -> f64 {
        self.updated
    }

    /// Every message in post order.
    pub fn all_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages(&self, filter: MessageFilter) -> Messages<'_> {
        Messages {
            inner: self.messages.iter(),
            filter,
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn image_refs(&self) -> impl Iterator<Item = &ImageRef> {
        self.messages.iter().flat_map(|m| m.images.iter())
    }

    /// Chat projection without private messages.
    pub fn to_export_schema(&self) -> ExportSchema {
        export_thread(self, false)
    }

    pub fn to_export_schema_with(&self, include_private: bool) -> ExportSchema {
        export_thread(self, include_private)
    }

    /// Timestamp for the next message: the clock, pushed past the last message.
    pub(crate) fn next_message_time(&self, now: f64) -> f64 {
        match self.messages.last() {
            Some(last) if now <= last.created => last.created + CLOCK_STEP,
            _ => now,
        }
    }

    pub(crate) fn roles_mut(&mut self) -> &mut RoleSet {
        &mut self.roles
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn remove_message(&mut self, message_id: &str) -> Option<Message> {
        let pos = self.messages.iter().position(|m| m.id == message_id)?;
        Some(self.messages.remove(pos))
    }

    pub(crate) fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    pub(crate) fn messages_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.messages.iter_mut()
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub(crate) fn set_public(&mut self, public: bool) {
        self.public = public;
    }

    pub(crate) fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    /// Recomputes the version and stamps the update time.
    pub(crate) fn refresh(&mut self, now: f64) {
        self.version = compute_version(self);
        self.updated = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_empty_text_without_images_is_rejected() {
        assert!(matches!(
            check_content("", 0),
            Err(crate::Error::Validation(ValidationError::EmptyMessage))
        ));
        assert!(check_content("", 1).is_ok());
        assert!(check_content("  \n", 0).is_ok());
    }

    fn message(id: &str, role: &str, private: bool, created: f64) -> Message {
        Message {
            id: id.to_string(),
            thread_id: "t1".to_string(),
            role: role.to_string(),
            text: format!("text {}", id),
            images: Vec::new(),
            private,
            metadata: None,
            created,
        }
    }

    fn thread_with(messages: Vec<Message>) -> Thread {
        let mut thread = Thread::create("t1".to_string(), NewThread::default(), 1.0);
        for m in messages {
            thread.push_message(m);
        }
        thread.refresh(2.0);
        thread
    }

    fn record_with(messages: Vec<Message>) -> ThreadRecord {
        ThreadRecord {
            id: "t1".to_string(),
            owner_id: None,
            name: None,
            public: false,
            metadata: Metadata::new(),
            roles: RoleSet::new(["user"], true),
            version: String::new(),
            created: 1.0,
            updated: 1.0,
            messages,
        }
    }

    #[test]
    fn test_from_record_rejects_inconsistent_messages() {
        let restored =
            Thread::from_record(record_with(vec![message("m1", "user", false, 2.0)])).unwrap();
        assert_eq!(restored.all_messages().len(), 1);

        let mut foreign = message("m1", "user", false, 2.0);
        foreign.thread_id = "t2".to_string();
        let duplicated = vec![
            message("m1", "user", false, 2.0),
            message("m1", "user", false, 3.0),
        ];
        for messages in [vec![foreign], vec![message("m1", " ", false, 2.0)], duplicated] {
            assert!(matches!(
                Thread::from_record(record_with(messages)),
                Err(crate::Error::Database(DatabaseError::CorruptRecord(_)))
            ));
        }
    }

    #[test]
    fn test_role_set_admission() {
        let mut roles = RoleSet::new(["user", " assistant ", ""], false);
        assert_eq!(roles.registered(), ["user", "assistant"]);
        assert!(!roles.admit("user").unwrap());
        assert!(roles.admit("tool").is_err());

        assert!(roles.retire("user"));
        assert!(!roles.retire("user"));
        assert!(matches!(
            roles.admit("user"),
            Err(crate::Error::Validation(ValidationError::RoleRetired(_)))
        ));

        assert!(roles.register("user"));
        assert!(roles.retired().is_empty());
    }

    #[test]
    fn test_open_role_set_never_readmits_retired_roles() {
        let mut roles = RoleSet::new(Vec::<String>::new(), true);
        assert!(roles.admit("tool").unwrap());
        roles.register("tool");
        roles.retire("tool");
        assert!(roles.admit("tool").is_err());
    }

    #[test]
    fn test_message_filters_are_restartable() {
        let thread = thread_with(vec![
            message("a", "user", false, 1.0),
            message("b", "assistant", true, 2.0),
            message("c", "user", true, 3.0),
            message("d", "assistant", false, 4.0),
        ]);

        let view = thread.messages(MessageFilter::default().role("user"));
        let ids: Vec<&str> = view.clone().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(view.count(), 2);

        let public: Vec<&str> = thread
            .messages(MessageFilter::public_only())
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(public, ["a", "d"]);
    }

    #[test]
    fn test_next_message_time_strictly_increases() {
        let thread = thread_with(vec![message("a", "user", false, 100.0)]);
        assert!(thread.next_message_time(50.0) > 100.0);
        assert_eq!(thread.next_message_time(200.0), 200.0);
    }

    #[test]
    fn test_content_checks() {
        assert!(normalize_role("  ").is_err());
        assert_eq!(normalize_role(" user ").unwrap(), "user");
        assert!(check_content("", 0).is_err());
        assert!(check_content("", 1).is_ok());
        assert!(check_content("hi", 0).is_ok());
    }
}
