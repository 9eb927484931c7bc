//! Conversion between threads and the `{"messages":[{role, content}]}` chat
//! schema used by language-model clients.

use serde::{Deserialize, Serialize};

use super::threads_model::{Message, NewPost, Thread};
use crate::images::ImageInput;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSchema {
    pub messages: Vec<ExportMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMessage {
    pub role: String,
    pub content: String,
}

pub(crate) fn export_thread(thread: &Thread, include_private: bool) -> ExportSchema {
    let messages = thread
        .all_messages()
        .iter()
        .filter(|m| include_private || !m.private)
        .map(|m| ExportMessage {
            role: m.role.clone(),
            content: export_content(m),
        })
        .collect();
    ExportSchema { messages }
}

/// Text followed by one `[image:<id>]` line per attachment.
fn export_content(message: &Message) -> String {
    let mut content = message.text.clone();
    for image in &message.images {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str("[image:");
        content.push_str(image.id());
        content.push(']');
    }
    content
}

/// A chat transcript to build a thread from. Accepts plain string content as
/// well as the multi-part form with `text` and `image_url` parts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatImport {
    pub messages: Vec<ImportMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportMessage {
    pub role: String,
    pub content: ImportContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImportContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageUrl {
    Plain(String),
    Object { url: String },
}

impl ImageUrl {
    pub fn url(&self) -> &str {
        match self {
            ImageUrl::Plain(url) | ImageUrl::Object { url } => url,
        }
    }
}

impl ImportMessage {
    /// Text parts are joined with newlines; image parts become image inputs.
    pub fn into_post(self) -> NewPost {
        match self.content {
            ImportContent::Text(text) => NewPost::new(self.role, text),
            ImportContent::Parts(parts) => {
                let mut texts = Vec::new();
                let mut images = Vec::new();
                for part in parts {
                    match part {
                        ContentPart::Text { text } => texts.push(text),
                        ContentPart::ImageUrl { image_url } => {
                            images.push(ImageInput::from(image_url.url()))
                        }
                    }
                }
                let mut post = NewPost::new(self.role, texts.join("\n"));
                post.images = images;
                post
            }
        }
    }
}
