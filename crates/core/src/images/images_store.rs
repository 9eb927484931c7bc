use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info};
use reqwest::blocking::Client;
use uuid::Uuid;

use super::images_bucket::{DirectoryBucket, HttpBucket, ObjectBucket};
use super::images_model::{ImageInput, ImageRef};
use super::images_normalize::{normalize, validate, NormalizedImage};
use crate::config::{BucketLocation, ImageBackendConfig};
use crate::errors::{DatabaseError, Error, Result};

/// Stores and resolves message images.
///
/// New images go to the bucket when one is configured and inline otherwise.
/// Resolution follows the backend recorded on each reference.
pub struct ImageStore {
    bucket: Option<Arc<dyn ObjectBucket>>,
    http: Client,
}

impl ImageStore {
    pub fn new(bucket: Option<Arc<dyn ObjectBucket>>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| Error::StorageUnavailable(format!("Failed to initialize HTTP client: {}", e)))?;
        Ok(Self { bucket, http })
    }

    pub fn inline() -> Result<Self> {
        Self::new(None)
    }

    pub fn from_config(config: &ImageBackendConfig) -> Result<Self> {
        let bucket_config = match config {
            ImageBackendConfig::Inline => {
                info!("Images are stored inline");
                return Self::inline();
            }
            ImageBackendConfig::Bucket(bucket) => bucket,
        };

        let bucket: Arc<dyn ObjectBucket> = match &bucket_config.location {
            BucketLocation::Http { endpoint, token } => {
                info!("Images are stored in bucket '{}' at {}", bucket_config.name, endpoint);
                let client = Client::builder().build().map_err(|e| {
                    Error::StorageUnavailable(format!("Failed to initialize HTTP client: {}", e))
                })?;
                Arc::new(HttpBucket::new(client, endpoint, &bucket_config.name, token.clone()))
            }
            BucketLocation::Directory(root) => {
                info!(
                    "Images are stored in bucket '{}' under {}",
                    bucket_config.name,
                    root.display()
                );
                Arc::new(DirectoryBucket::new(root, &bucket_config.name)?)
            }
        };
        Self::new(Some(bucket))
    }

    pub fn uses_bucket(&self) -> bool {
        self.bucket.is_some()
    }

    /// Normalizes the input and writes it. Bucket keys are grouped under `scope`
    /// (the owning thread id).
    pub fn store(&self, input: ImageInput, scope: &str) -> Result<ImageRef> {
        let image = normalize(input, &self.http)?;
        self.write(image, scope)
    }

    pub fn resolve(&self, reference: &ImageRef) -> Result<Vec<u8>> {
        match reference {
            ImageRef::Inline { id, data, .. } => STANDARD.decode(data.as_bytes()).map_err(|e| {
                DatabaseError::CorruptRecord(format!("inline image {}: {}", id, e)).into()
            }),
            ImageRef::Bucket { key, .. } => self.bucket_for(reference)?.get(key),
        }
    }

    /// Removes the stored bytes. Inline references need no cleanup.
    pub fn discard(&self, reference: &ImageRef) -> Result<()> {
        match reference {
            ImageRef::Inline { .. } => Ok(()),
            ImageRef::Bucket { key, .. } => {
                debug!("Discarding image object {}", key);
                self.bucket_for(reference)?.delete(key)
            }
        }
    }

    /// Copies the bytes behind `reference` into a new reference with a fresh id,
    /// written to the current backend.
    pub fn duplicate(&self, reference: &ImageRef, scope: &str) -> Result<ImageRef> {
        let bytes = self.resolve(reference)?;
        self.write(validate(bytes)?, scope)
    }

    fn bucket_for(&self, reference: &ImageRef) -> Result<&Arc<dyn ObjectBucket>> {
        self.bucket.as_ref().ok_or_else(|| {
            Error::StorageUnavailable(format!(
                "image {} is bucket stored but no bucket is configured",
                reference.id()
            ))
        })
    }

    fn write(&self, image: NormalizedImage, scope: &str) -> Result<ImageRef> {
        let id = Uuid::new_v4().to_string();
        match &self.bucket {
            None => Ok(ImageRef::Inline {
                id,
                mime_type: image.mime_type.to_string(),
                data: STANDARD.encode(&image.bytes),
            }),
            Some(bucket) => {
                let key = format!("{}/{}.{}", scope, id, image.extension);
                bucket.put(&key, &image.bytes, image.mime_type)?;
                debug!("Stored image {} in bucket '{}'", key, bucket.name());
                Ok(ImageRef::Bucket {
                    id,
                    mime_type: image.mime_type.to_string(),
                    key,
                })
            }
        }
    }
}
