//! Turns every [`ImageInput`] variant into validated canonical bytes.

use std::borrow::Cow;
use std::io::{Cursor, Read};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use log::debug;
use reqwest::blocking::Client;

use super::images_model::{ImageInput, MAX_IMAGE_BYTES};
use crate::errors::{Error, Result, ValidationError};

/// Image bytes that decoded successfully, with their sniffed format.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub extension: &'static str,
}

pub(crate) fn normalize(input: ImageInput, http: &Client) -> Result<NormalizedImage> {
    debug!("Normalizing {} image input", input.kind());
    match input {
        ImageInput::Bytes(bytes) => validate(bytes),
        ImageInput::Path(path) => from_path(&path),
        ImageInput::Bitmap(bitmap) => from_bitmap(&bitmap),
        ImageInput::DataUri(uri) => from_data_uri(&uri),
        ImageInput::Url(url) => from_url(&url, http),
    }
}

/// Checks the size limit and decodes the payload to prove it is an image.
pub(crate) fn validate(bytes: Vec<u8>) -> Result<NormalizedImage> {
    check_size(bytes.len())?;
    if bytes.is_empty() {
        return Err(Error::UnsupportedImageFormat("empty payload".to_string()));
    }

    let format = image::guess_format(&bytes)
        .map_err(|e| Error::UnsupportedImageFormat(e.to_string()))?;
    let (mime_type, extension) = mime_for(format)?;
    image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| Error::UnsupportedImageFormat(e.to_string()))?;

    Ok(NormalizedImage {
        bytes,
        mime_type,
        extension,
    })
}

fn check_size(size: usize) -> Result<()> {
    if size > MAX_IMAGE_BYTES {
        return Err(ValidationError::ImageTooLarge {
            size,
            limit: MAX_IMAGE_BYTES,
        }
        .into());
    }
    Ok(())
}

fn mime_for(format: ImageFormat) -> Result<(&'static str, &'static str)> {
    match format {
        ImageFormat::Png => Ok(("image/png", "png")),
        ImageFormat::Jpeg => Ok(("image/jpeg", "jpg")),
        ImageFormat::Gif => Ok(("image/gif", "gif")),
        ImageFormat::WebP => Ok(("image/webp", "webp")),
        ImageFormat::Bmp => Ok(("image/bmp", "bmp")),
        other => Err(Error::UnsupportedImageFormat(format!("{:?}", other))),
    }
}

fn from_path(path: &Path) -> Result<NormalizedImage> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ValidationError::InvalidInput(format!(
            "image file '{}' does not exist",
            path.display()
        ))
        .into(),
        _ => Error::StorageUnavailable(format!("reading '{}': {}", path.display(), e)),
    })?;
    validate(bytes)
}

fn from_bitmap(bitmap: &DynamicImage) -> Result<NormalizedImage> {
    // PNG has no float samples; 16 bits per channel is the closest it holds.
    let bitmap = match bitmap {
        DynamicImage::ImageRgb32F(_) => Cow::Owned(DynamicImage::ImageRgb16(bitmap.to_rgb16())),
        DynamicImage::ImageRgba32F(_) => {
            Cow::Owned(DynamicImage::ImageRgba16(bitmap.to_rgba16()))
        }
        _ => Cow::Borrowed(bitmap),
    };
    let mut buffer = Cursor::new(Vec::new());
    bitmap
        .write_to(&mut buffer, ImageOutputFormat::Png)
        .map_err(|e| Error::UnsupportedImageFormat(e.to_string()))?;
    validate(buffer.into_inner())
}

fn from_data_uri(uri: &str) -> Result<NormalizedImage> {
    let invalid = |reason: &str| -> Error { ValidationError::InvalidInput(reason.to_string()).into() };

    let rest = uri
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &uri[5..])
        .ok_or_else(|| invalid("data URI must start with 'data:'"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("data URI has no payload"))?;
    if !header.to_ascii_lowercase().ends_with(";base64") {
        return Err(invalid("data URI must be base64 encoded"));
    }

    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    check_size(payload.len() / 4 * 3)?;
    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| invalid(&format!("data URI payload is not valid base64: {}", e)))?;
    validate(bytes)
}

fn from_url(url: &str, http: &Client) -> Result<NormalizedImage> {
    debug!("Fetching image from {}", url);
    let response = http
        .get(url)
        .send()
        .map_err(|e| Error::StorageUnavailable(format!("fetching {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ValidationError::InvalidInput(format!("{} returned {}", url, status)).into());
    }
    if let Some(length) = response.content_length() {
        check_size(usize::try_from(length).unwrap_or(usize::MAX))?;
    }

    validate(read_capped(response, url)?)
}

/// Reads at most one byte past the size limit, so an unbounded body is cut
/// off and then rejected by `validate`.
fn read_capped(reader: impl Read, source: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_IMAGE_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::StorageUnavailable(format!("reading {}: {}", source, e)))?;
    Ok(bytes)
}
