use std::path::PathBuf;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

const MIB: usize = 1_048_576;

/// Largest accepted image payload after normalization.
pub const MAX_IMAGE_BYTES: usize = MIB * 20;

/// The accepted shapes of an image attachment. Each variant has its own
/// normalization path to canonical bytes.
#[derive(Debug, Clone)]
pub enum ImageInput {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Bitmap(DynamicImage),
    /// `data:<mime>;base64,<payload>`
    DataUri(String),
    /// `http://` or `https://` location fetched at store time.
    Url(String),
}

impl ImageInput {
    pub fn kind(&self) -> &'static str {
        match self {
            ImageInput::Bytes(_) => "bytes",
            ImageInput::Path(_) => "path",
            ImageInput::Bitmap(_) => "bitmap",
            ImageInput::DataUri(_) => "data-uri",
            ImageInput::Url(_) => "url",
        }
    }
}

/// Classifies a string: data URI, remote URL, or local path.
impl From<&str> for ImageInput {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        let lower = trimmed.get(..8).unwrap_or(trimmed).to_ascii_lowercase();
        if lower.starts_with("data:") {
            ImageInput::DataUri(trimmed.to_string())
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageInput::Url(trimmed.to_string())
        } else {
            ImageInput::Path(PathBuf::from(trimmed))
        }
    }
}

impl From<String> for ImageInput {
    fn from(value: String) -> Self {
        ImageInput::from(value.as_str())
    }
}

impl From<Vec<u8>> for ImageInput {
    fn from(value: Vec<u8>) -> Self {
        ImageInput::Bytes(value)
    }
}

impl From<PathBuf> for ImageInput {
    fn from(value: PathBuf) -> Self {
        ImageInput::Path(value)
    }
}

impl From<DynamicImage> for ImageInput {
    fn from(value: DynamicImage) -> Self {
        ImageInput::Bitmap(value)
    }
}

/// A stored image. The backend is recorded on the reference itself so a
/// thread can hold inline and bucket images side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImageRef {
    Inline {
        id: String,
        mime_type: String,
        /// Standard base64 of the image bytes.
        data: String,
    },
    Bucket {
        id: String,
        mime_type: String,
        key: String,
    },
}

impl ImageRef {
    pub fn id(&self) -> &str {
        match self {
            ImageRef::Inline { id, .. } | ImageRef::Bucket { id, .. } => id,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            ImageRef::Inline { mime_type, .. } | ImageRef::Bucket { mime_type, .. } => mime_type,
        }
    }

    pub fn is_bucket(&self) -> bool {
        matches!(self, ImageRef::Bucket { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_classification() {
        assert!(matches!(
            ImageInput::from("data:image/png;base64,AAAA"),
            ImageInput::DataUri(_)
        ));
        assert!(matches!(
            ImageInput::from("HTTPS://example.com/cat.png"),
            ImageInput::Url(_)
        ));
        assert!(matches!(ImageInput::from("./cat.png"), ImageInput::Path(_)));
        assert!(matches!(ImageInput::from("c"), ImageInput::Path(_)));
    }

    #[test]
    fn test_reference_descriptor_shape() {
        let reference = ImageRef::Bucket {
            id: "img-1".to_string(),
            mime_type: "image/png".to_string(),
            key: "t1/img-1.png".to_string(),
        };
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["kind"], "bucket");
        assert_eq!(json["key"], "t1/img-1.png");

        let parsed: ImageRef = serde_json::from_value(serde_json::json!({
            "kind": "inline",
            "id": "img-2",
            "mime_type": "image/gif",
            "data": "R0lG"
        }))
        .unwrap();
        assert_eq!(parsed.id(), "img-2");
        assert!(!parsed.is_bucket());
    }
}
