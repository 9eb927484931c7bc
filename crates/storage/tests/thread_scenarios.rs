//! End-to-end thread scenarios against a SQLite database.

use std::io::Cursor;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use tempfile::TempDir;

use threadmem_core::config::{BucketConfig, BucketLocation, DatabaseConfig, ImageBackendConfig};
use threadmem_core::images::{ImageInput, ImageStore};
use threadmem_core::threads::{
    MessageFilter, NewPost, NewThread, ThreadFilter, ThreadService,
};
use threadmem_storage::connect;

fn png() -> Vec<u8> {
    let bitmap = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([0, 128, 255])));
    let mut buffer = Cursor::new(Vec::new());
    bitmap.write_to(&mut buffer, ImageOutputFormat::Png).unwrap();
    buffer.into_inner()
}

fn service(dir: &TempDir, images: ImageBackendConfig) -> ThreadService {
    let repository = connect(&DatabaseConfig::Sqlite {
        path: dir.path().join("threads.db"),
        pool_size: 2,
    })
    .unwrap();
    let images = ImageStore::from_config(&images).unwrap();
    ThreadService::new(repository, Arc::new(images))
}

#[test]
fn owner_scenario_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let thread_id = {
        let service = service(&dir, ImageBackendConfig::Inline);
        let mut thread = service.create_thread(NewThread::owned_by("u1")).unwrap();
        service.post(&mut thread, NewPost::new("user", "Hi")).unwrap();
        service
            .post(&mut thread, NewPost::new("assistant", "Hello"))
            .unwrap();
        thread.id().to_string()
    };

    let service = service(&dir, ImageBackendConfig::Inline);
    let found = service.find(&ThreadFilter::owner("u1")).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), thread_id);
    assert_eq!(found[0].messages(MessageFilter::default()).count(), 2);
    assert_eq!(
        serde_json::to_value(found[0].to_export_schema()).unwrap(),
        serde_json::json!({"messages": [
            {"role": "user", "content": "Hi"},
            {"role": "assistant", "content": "Hello"}
        ]})
    );
}

#[test]
fn data_uri_image_round_trips_through_database() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir, ImageBackendConfig::Inline);
    let mut thread = service.create_thread(NewThread::default()).unwrap();

    let uri = format!("data:image/png;base64,{}", STANDARD.encode(png()));
    service
        .post(&mut thread, NewPost::new("user", "see").with_image(uri))
        .unwrap();

    let loaded = service.load(thread.id()).unwrap();
    let first = loaded.messages(MessageFilter::default()).next().unwrap();
    assert_eq!(first.images.len(), 1);
    assert_eq!(service.resolve_image(&first.images[0]).unwrap(), png());
    assert_eq!(loaded.version(), thread.version());
}

#[test]
fn bucket_images_follow_thread_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let bucket_root = dir.path().join("objects");
    let service = service(
        &dir,
        ImageBackendConfig::Bucket(BucketConfig {
            name: "images".to_string(),
            location: BucketLocation::Directory(bucket_root.clone()),
        }),
    );
    let mut thread = service.create_thread(NewThread::default()).unwrap();
    let message = service
        .post(
            &mut thread,
            NewPost::new("user", "pic").with_image(ImageInput::Bytes(png())),
        )
        .unwrap();
    let image = message.images[0].clone();
    assert!(image.is_bucket());
    assert!(bucket_root.join("images").join(thread.id()).exists());

    service.delete(thread.id()).unwrap();
    assert!(service.resolve_image(&image).unwrap_err().is_not_found());
    assert!(service.delete(thread.id()).unwrap_err().is_not_found());
}

#[test]
fn deleted_message_stays_gone_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir, ImageBackendConfig::Inline);
    let mut thread = service.create_thread(NewThread::default()).unwrap();
    let first = service.post(&mut thread, NewPost::new("user", "one")).unwrap();
    service.post(&mut thread, NewPost::new("user", "two")).unwrap();
    let version_before = thread.version().to_string();

    service.delete_message(&mut thread, &first.id).unwrap();
    assert_ne!(thread.version(), version_before);

    let loaded = service.load(thread.id()).unwrap();
    assert!(loaded.message(&first.id).is_none());
    assert_eq!(loaded.all_messages().len(), 1);
    assert_eq!(loaded, thread);
}
