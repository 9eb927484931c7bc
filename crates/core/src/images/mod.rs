//! Images module - input normalization, references, and storage backends.

mod images_bucket;
mod images_model;
mod images_normalize;
mod images_store;

pub use images_bucket::{DirectoryBucket, HttpBucket, ObjectBucket};
pub use images_model::{ImageInput, ImageRef, MAX_IMAGE_BYTES};
pub use images_store::ImageStore;

#[cfg(test)]
pub(crate) use images_normalize::tests::png_fixture;
