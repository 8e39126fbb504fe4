#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Rendition engine integration tests.
//!
//! Exercise derivation, coalescing and invalidation against real image
//! processing and a temporary media directory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use folio_kernel::media::{
    FileStorage, FocalPoint, LocalFileStorage, MediaError, OutputFormat, RenditionSpec,
};
use folio_test_utils::{test_jpeg, test_png};

mod common;
use common::{engine, engine_with_storage};

fn spec(filter: &str) -> RenditionSpec {
    RenditionSpec::parse(filter).unwrap()
}

#[tokio::test]
async fn derives_and_reuses_rendition() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let source = engine
        .add_source("Landscape", "landscape.png", &test_png(800, 600), None, None)
        .await
        .unwrap();

    let first = engine.get_or_create(source.id, &spec("width-400")).await.unwrap();
    assert_eq!((first.width, first.height), (400, 300));
    assert_eq!(first.format, OutputFormat::Png);
    assert!(first.url.starts_with("/media/renditions/"));

    let second = engine.get_or_create(source.id, &spec("width-400")).await.unwrap();
    assert_eq!(first.file_uri, second.file_uri);
    assert_eq!(engine.derivation_count(), 1);

    let a = engine.read_artifact(&first).await.unwrap();
    let b = engine.read_artifact(&second).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len() as u64, first.file_size);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_derive_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let source = engine
        .add_source("Photo", "photo.jpg", &test_jpeg(1200, 900), None, None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .get_or_create(source.id, &spec("fill-300x300"))
                .await
                .unwrap()
        }));
    }

    let mut uris = Vec::new();
    for handle in handles {
        uris.push(handle.await.unwrap().file_uri.clone());
    }
    uris.dedup();
    assert_eq!(uris.len(), 1);
    assert_eq!(engine.derivation_count(), 1);
}

#[tokio::test]
async fn deleted_source_is_not_served() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let source = engine
        .add_source("Doomed", "doomed.png", &test_png(100, 100), None, None)
        .await
        .unwrap();
    let rendition = engine.get_or_create(source.id, &spec("max-50x50")).await.unwrap();

    let report = engine.delete_source(source.id).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.renditions_removed, 1);
    assert_eq!(report.files_removed, 2);

    let err = engine
        .get_or_create(source.id, &spec("max-50x50"))
        .await
        .unwrap_err();
    assert_eq!(err, MediaError::SourceNotFound(source.id));
    assert!(engine.read_artifact(&rendition).await.is_err());

    assert_eq!(
        engine.delete_source(source.id).await.unwrap_err(),
        MediaError::SourceNotFound(source.id)
    );
}

#[tokio::test]
async fn replacing_the_file_invalidates_renditions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let source = engine
        .add_source("Banner", "banner.png", &test_png(400, 200), None, None)
        .await
        .unwrap();
    let before = engine.get_or_create(source.id, &spec("original")).await.unwrap();
    assert_eq!((before.width, before.height), (400, 200));

    let replaced = engine
        .replace_source_file(source.id, "banner.png", &test_png(300, 300))
        .await
        .unwrap();
    assert_ne!(replaced.content_hash, source.content_hash);

    let after = engine.get_or_create(source.id, &spec("original")).await.unwrap();
    assert_eq!((after.width, after.height), (300, 300));
    assert_ne!(before.file_uri, after.file_uri);
    assert_eq!(engine.derivation_count(), 2);
}

#[tokio::test]
async fn focal_point_changes_the_crop_key() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let source = engine
        .add_source("Wide", "wide.png", &test_png(800, 200), None, None)
        .await
        .unwrap();

    let centred = engine.get_or_create(source.id, &spec("fill-100x100")).await.unwrap();
    assert_eq!(centred.focal_point_key, "");

    let focal = FocalPoint::new(0.0, 0.0, 0.1, 1.0).unwrap();
    engine.set_focal_point(source.id, Some(focal)).await.unwrap();
    let focused = engine.get_or_create(source.id, &spec("fill-100x100")).await.unwrap();
    assert_eq!(focused.focal_point_key, focal.key());
    assert_ne!(centred.file_uri, focused.file_uri);
    assert_eq!((focused.width, focused.height), (100, 100));

    // Non-cropping modes ignore the focal point
    let scaled = engine.get_or_create(source.id, &spec("width-200")).await.unwrap();
    assert_eq!(scaled.focal_point_key, "");
}

#[tokio::test]
async fn invalid_requests_are_typed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);

    assert!(matches!(
        RenditionSpec::parse("fill-0x100"),
        Err(MediaError::InvalidSpec { .. })
    ));

    let missing = uuid::Uuid::now_v7();
    assert_eq!(
        engine.get_or_create(missing, &spec("width-10")).await.unwrap_err(),
        MediaError::SourceNotFound(missing)
    );

    assert!(matches!(
        engine.add_source("Junk", "junk.png", b"not an image", None, None).await,
        Err(MediaError::Derivation(_))
    ));
}

/// Local storage whose first rendition write fails.
struct FlakyStorage {
    inner: LocalFileStorage,
    failed: AtomicBool,
}

#[async_trait]
impl FileStorage for FlakyStorage {
    async fn write(&self, uri: &str, data: &[u8]) -> Result<()> {
        if uri.starts_with("local://renditions/") && !self.failed.swap(true, Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.write(uri, data).await
    }

    async fn read(&self, uri: &str) -> Result<Vec<u8>> {
        self.inner.read(uri).await
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        self.inner.delete(uri).await
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        self.inner.exists(uri).await
    }

    fn public_url(&self, uri: &str) -> String {
        self.inner.public_url(uri)
    }

    fn scheme(&self) -> &'static str {
        "local"
    }
}

#[tokio::test]
async fn failed_write_is_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_storage(Arc::new(FlakyStorage {
        inner: LocalFileStorage::new(dir.path(), "/media"),
        failed: AtomicBool::new(false),
    }));
    let source = engine
        .add_source("Retry", "retry.png", &test_png(64, 64), None, None)
        .await
        .unwrap();

    let err = engine
        .get_or_create(source.id, &spec("width-32"))
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::Storage(_)));
    assert!(!dir.path().join("renditions").join(source.id.to_string()).exists());

    let rendition = engine.get_or_create(source.id, &spec("width-32")).await.unwrap();
    assert_eq!(rendition.width, 32);
    assert_eq!(engine.derivation_count(), 2);
}
