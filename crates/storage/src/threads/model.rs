//! Database models for threads and messages.

use diesel::prelude::*;

use threadmem_core::errors::Result;
use threadmem_core::images::ImageRef;
use threadmem_core::threads::{Message, Metadata, RoleSet, Thread, ThreadRecord};

use crate::errors::StorageError;
use crate::schema::{messages, threads};

/// Database model for threads. JSON columns hold metadata and the role set.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Insertable, AsChangeset, Selectable)]
#[diesel(table_name = threads)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ThreadDB {
    pub id: String,
    pub owner_id: Option<String>,
    pub name: Option<String>,
    pub public: bool,
    pub metadata: String,
    pub roles: String,
    pub version: String,
    pub created: f64,
    pub updated: f64,
}

/// Database model for messages. `images` is a JSON list of reference descriptors.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Insertable, AsChangeset, Selectable)]
#[diesel(table_name = messages)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MessageDB {
    pub id: String,
    pub thread_id: String,
    pub position: i32,
    pub role: String,
    pub text: String,
    pub images: String,
    pub private: bool,
    pub metadata: Option<String>,
    pub created: f64,
}

fn encode<T: serde::Serialize>(column: &str, value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", column, e)).into())
}

fn decode<T: serde::de::DeserializeOwned>(column: &str, owner: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        StorageError::CorruptRecord(format!("{} of {}: {}", column, owner, e)).into()
    })
}

impl ThreadDB {
    pub fn from_domain(thread: &Thread) -> Result<Self> {
        Ok(Self {
            id: thread.id().to_string(),
            owner_id: thread.owner_id().map(str::to_string),
            name: thread.name().map(str::to_string),
            public: thread.is_public(),
            metadata: encode("metadata", thread.metadata())?,
            roles: encode("roles", thread.roles())?,
            version: thread.version().to_string(),
            created: thread.created(),
            updated: thread.updated(),
        })
    }

    /// Assembles the domain thread. `messages` must already be in position order.
    pub fn into_domain(self, messages: Vec<MessageDB>) -> Result<Thread> {
        let metadata: Metadata = decode("metadata", &self.id, &self.metadata)?;
        let roles: RoleSet = decode("roles", &self.id, &self.roles)?;
        let messages = messages
            .into_iter()
            .map(MessageDB::into_domain)
            .collect::<Result<Vec<_>>>()?;

        Thread::from_record(ThreadRecord {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            public: self.public,
            metadata,
            roles,
            version: self.version,
            created: self.created,
            updated: self.updated,
            messages,
        })
    }
}

impl MessageDB {
    pub fn from_domain(message: &Message, position: usize) -> Result<Self> {
        let position = i32::try_from(position).map_err(|_| {
            StorageError::SerializationError(format!("message position {} out of range", position))
        })?;
        Ok(Self {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            position,
            role: message.role.clone(),
            text: message.text.clone(),
            images: encode("images", &message.images)?,
            private: message.private,
            metadata: message
                .metadata
                .as_ref()
                .map(|m| encode("metadata", m))
                .transpose()?,
            created: message.created,
        })
    }

    pub fn into_domain(self) -> Result<Message> {
        let images: Vec<ImageRef> = decode("images", &self.id, &self.images)?;
        let metadata = self
            .metadata
            .as_deref()
            .map(|raw| decode::<Metadata>("metadata", &self.id, raw))
            .transpose()?;

        Ok(Message {
            id: self.id,
            thread_id: self.thread_id,
            role: self.role,
            text: self.text,
            images,
            private: self.private,
            metadata,
            created: self.created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadmem_core::errors::{DatabaseError, Error};

    fn message_row(images: &str) -> MessageDB {
        MessageDB {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            position: 0,
            role: "user".to_string(),
            text: "hi".to_string(),
            images: images.to_string(),
            private: false,
            metadata: Some(r#"{"lang":"en"}"#.to_string()),
            created: 12.5,
        }
    }

    #[test]
    fn test_message_row_decodes_image_descriptors() {
        let message = message_row(
            r#"[{"kind":"bucket","id":"i1","mime_type":"image/png","key":"t1/i1.png"}]"#,
        )
        .into_domain()
        .unwrap();
        assert_eq!(message.images.len(), 1);
        assert!(message.images[0].is_bucket());
        assert_eq!(
            message.metadata.unwrap().get("lang"),
            Some(&serde_json::json!("en"))
        );
    }

    #[test]
    fn test_corrupt_images_column() {
        let err = message_row("not json").into_domain().unwrap_err();
        assert!(matches!(
            err,
            Error::Database(DatabaseError::CorruptRecord(_))
        ));
    }
}
