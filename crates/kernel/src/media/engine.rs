//! Rendition engine.
//!
//! Derives renditions on demand and guarantees at most one derivation per
//! key: concurrent callers for the same key are coalesced onto a single
//! in-flight derivation by the moka cache, and the persistent index keeps
//! the first published artifact if several processes race.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::MediaError;
use super::geometry;
use super::rendition::{Rendition, RenditionIndex, RenditionKey};
use super::source::{ImageSource, SourceStore};
use super::spec::{FocalPoint, OutputFormat, RenditionSpec, ResizeMode};
use super::storage::{FileStorage, sanitize_filename};

/// Maximum original size accepted for processing (50 MB).
const MAX_INPUT_SIZE: usize = 50 * 1024 * 1024;

/// Renditions kept in the in-process cache.
const CACHE_CAPACITY: u64 = 10_000;

/// Outcome of deleting an image source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub source_id: Uuid,
    pub renditions_removed: usize,
    pub files_removed: usize,
    /// Storage failures encountered while cleaning up; the records are gone regardless.
    pub failures: Vec<String>,
}

impl DeletionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Image source management and rendition derivation.
#[derive(Clone)]
pub struct RenditionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    sources: Arc<dyn SourceStore>,
    index: Arc<dyn RenditionIndex>,
    storage: Arc<dyn FileStorage>,
    cache: Cache<RenditionKey, Arc<Rendition>>,
    /// Caps concurrent pixel work.
    permits: Semaphore,
    derivations: AtomicU64,
}

struct DerivationJob {
    mode: ResizeMode,
    focal: Option<FocalPoint>,
    format: Option<OutputFormat>,
    quality: u8,
}

struct DerivedImage {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    format: OutputFormat,
}

impl RenditionEngine {
    pub fn new(
        sources: Arc<dyn SourceStore>,
        index: Arc<dyn RenditionIndex>,
        storage: Arc<dyn FileStorage>,
        max_concurrent: usize,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .support_invalidation_closures()
            .build();

        Self {
            inner: Arc::new(EngineInner {
                sources,
                index,
                storage,
                cache,
                permits: Semaphore::new(max_concurrent.max(1)),
                derivations: AtomicU64::new(0),
            }),
        }
    }

    /// Number of derivations started since the engine was created.
    pub fn derivation_count(&self) -> u64 {
        self.inner.derivations.load(Ordering::SeqCst)
    }

    /// Store a new original image.
    pub async fn add_source(
        &self,
        title: &str,
        filename: &str,
        bytes: &[u8],
        focal_point: Option<FocalPoint>,
        credit: Option<&str>,
    ) -> Result<ImageSource, MediaError> {
        let id = Uuid::now_v7();
        let (file_uri, width, height, content_hash) = self.store_original(id, filename, bytes).await?;

        let source = ImageSource {
            id,
            title: title.to_string(),
            file_uri,
            width,
            height,
            file_size: bytes.len() as u64,
            content_hash,
            focal_point,
            credit: credit.map(str::to_string),
            created: Utc::now(),
        };
        self.inner
            .sources
            .insert(&source)
            .await
            .map_err(MediaError::storage)?;

        info!(source_id = %id, width, height, "image source added");
        Ok(source)
    }

    pub async fn source(&self, id: Uuid) -> Result<ImageSource, MediaError> {
        self.inner
            .sources
            .get(id)
            .await
            .map_err(MediaError::storage)?
            .ok_or(MediaError::SourceNotFound(id))
    }

    /// Credits of the given sources, keyed by id. Sources without a credit
    /// are left out; lookup failures are logged and skipped.
    pub async fn credits(&self, ids: &[Uuid]) -> HashMap<Uuid, String> {
        let mut credits = HashMap::new();
        for &id in ids {
            match self.inner.sources.get(id).await {
                Ok(Some(source)) => {
                    if let Some(credit) = source.credit {
                        credits.insert(id, credit);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(source_id = %id, error = %e, "failed to look up image credit"),
            }
        }
        credits
    }

    /// Replace the original bytes of a source. Existing renditions are purged.
    pub async fn replace_source_file(
        &self,
        id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ImageSource, MediaError> {
        let mut source = self.source(id).await?;
        let previous_uri = source.file_uri.clone();
        let (file_uri, width, height, content_hash) = self.store_original(id, filename, bytes).await?;

        source.file_uri = file_uri;
        source.width = width;
        source.height = height;
        source.file_size = bytes.len() as u64;
        source.content_hash = content_hash;
        self.update_source(&source).await?;

        let report = self.purge_renditions(id).await?;
        if previous_uri != source.file_uri
            && let Err(e) = self.inner.storage.delete(&previous_uri).await
        {
            warn!(source_id = %id, error = %e, "failed to remove replaced original");
        }

        info!(
            source_id = %id,
            renditions_removed = report.renditions_removed,
            "image source file replaced"
        );
        Ok(source)
    }

    /// Set or clear the stored focal point. Existing renditions are purged.
    pub async fn set_focal_point(
        &self,
        id: Uuid,
        focal_point: Option<FocalPoint>,
    ) -> Result<ImageSource, MediaError> {
        let mut source = self.source(id).await?;
        source.focal_point = focal_point;
        self.update_source(&source).await?;
        self.purge_renditions(id).await?;
        debug!(source_id = %id, "focal point updated");
        Ok(source)
    }

    /// Delete a source together with its original and every rendition.
    pub async fn delete_source(&self, id: Uuid) -> Result<DeletionReport, MediaError> {
        let source = self.source(id).await?;
        if !self
            .inner
            .sources
            .delete(id)
            .await
            .map_err(MediaError::storage)?
        {
            return Err(MediaError::SourceNotFound(id));
        }

        let mut report = self.purge_renditions(id).await?;
        match self.inner.storage.delete(&source.file_uri).await {
            Ok(()) => report.files_removed += 1,
            Err(e) => report.failures.push(format!("{}: {e:#}", source.file_uri)),
        }

        if report.is_clean() {
            info!(
                source_id = %id,
                renditions_removed = report.renditions_removed,
                "image source deleted"
            );
        } else {
            warn!(
                source_id = %id,
                failures = report.failures.len(),
                "image source deleted with storage cleanup failures"
            );
        }
        Ok(report)
    }

    /// Return the rendition of `source_id` described by `spec`, deriving it if needed.
    pub async fn get_or_create(
        &self,
        source_id: Uuid,
        spec: &RenditionSpec,
    ) -> Result<Arc<Rendition>, MediaError> {
        let source = self.source(source_id).await?;
        let key = rendition_key(&source, spec);

        for _ in 0..2 {
            let rendition = self
                .inner
                .cache
                .try_get_with(key.clone(), self.materialize(&source, spec, &key))
                .await
                .map_err(|e| (*e).clone())?;

            if rendition.source_hash == source.content_hash && self.artifact_present(&rendition).await
            {
                return Ok(rendition);
            }

            warn!(key = %key, "discarding stale rendition");
            self.inner.cache.invalidate(&key).await;
            if let Err(e) = self.inner.index.remove(&key).await {
                warn!(key = %key, error = %e, "failed to drop stale rendition record");
            }
        }

        Err(MediaError::Derivation(format!(
            "rendition {key} could not be published"
        )))
    }

    /// Bytes of a published rendition.
    pub async fn read_artifact(&self, rendition: &Rendition) -> Result<Vec<u8>, MediaError> {
        self.inner
            .storage
            .read(&rendition.file_uri)
            .await
            .map_err(MediaError::storage)
    }

    /// Look up the persistent index or derive a fresh artifact.
    async fn materialize(
        &self,
        source: &ImageSource,
        spec: &RenditionSpec,
        key: &RenditionKey,
    ) -> Result<Arc<Rendition>, MediaError> {
        let inner = &self.inner;

        if let Some(existing) = inner.index.get(key).await.map_err(MediaError::storage)? {
            if existing.source_hash == source.content_hash && self.artifact_present(&existing).await
            {
                debug!(key = %key, "rendition found in index");
                return Ok(Arc::new(existing));
            }
            inner.index.remove(key).await.map_err(MediaError::storage)?;
        }

        if source.file_size > MAX_INPUT_SIZE as u64 {
            return Err(MediaError::Derivation(format!(
                "source is {} bytes, limit is {MAX_INPUT_SIZE}",
                source.file_size
            )));
        }

        let _permit = inner
            .permits
            .acquire()
            .await
            .map_err(|_| MediaError::Derivation("rendition worker pool closed".to_string()))?;

        let original = inner
            .storage
            .read(&source.file_uri)
            .await
            .map_err(MediaError::storage)?;
        if original.len() > MAX_INPUT_SIZE {
            return Err(MediaError::Derivation(format!(
                "source is {} bytes, limit is {MAX_INPUT_SIZE}",
                original.len()
            )));
        }

        inner.derivations.fetch_add(1, Ordering::SeqCst);
        debug!(key = %key, "deriving rendition");

        let mode = spec.mode();
        let job = DerivationJob {
            mode,
            focal: mode
                .uses_focal_point()
                .then(|| effective_focal_point(source, spec))
                .flatten(),
            format: spec.format(),
            quality: spec.jpeg_quality(),
        };
        let derived = tokio::task::spawn_blocking(move || process_image(&original, &job))
            .await
            .map_err(|e| MediaError::Derivation(format!("derivation task failed: {e}")))??;

        let file_uri = format!(
            "local://renditions/{}/{}.{}",
            source.id,
            artifact_digest(key, &source.content_hash),
            derived.format.extension()
        );
        inner
            .storage
            .write(&file_uri, &derived.bytes)
            .await
            .map_err(MediaError::storage)?;

        let rendition = Rendition {
            source_id: source.id,
            spec_key: key.spec_key.clone(),
            focal_point_key: key.focal_point_key.clone(),
            url: inner.storage.public_url(&file_uri),
            file_uri,
            width: derived.width,
            height: derived.height,
            file_size: derived.bytes.len() as u64,
            format: derived.format,
            source_hash: source.content_hash.clone(),
            created: Utc::now(),
        };
        let stored = inner.index.put(rendition).await.map_err(MediaError::storage)?;

        // A delete that ran during derivation wins over the new artifact.
        if inner
            .sources
            .get(source.id)
            .await
            .map_err(MediaError::storage)?
            .is_none()
        {
            self.discard(&stored).await;
            return Err(MediaError::SourceNotFound(source.id));
        }

        info!(
            source_id = %source.id,
            spec = %key.spec_key,
            width = stored.width,
            height = stored.height,
            "rendition derived"
        );
        Ok(Arc::new(stored))
    }

    async fn artifact_present(&self, rendition: &Rendition) -> bool {
        match self.inner.storage.exists(&rendition.file_uri).await {
            Ok(present) => present,
            Err(e) => {
                warn!(uri = %rendition.file_uri, error = %e, "failed to check rendition artifact");
                false
            }
        }
    }

    async fn discard(&self, rendition: &Rendition) {
        if let Err(e) = self.inner.index.remove(&rendition.key()).await {
            warn!(key = %rendition.key(), error = %e, "failed to drop orphaned rendition record");
        }
        if let Err(e) = self.inner.storage.delete(&rendition.file_uri).await {
            warn!(uri = %rendition.file_uri, error = %e, "failed to delete orphaned rendition");
        }
    }

    /// Remove every rendition of a source from the index, the cache and storage.
    async fn purge_renditions(&self, source_id: Uuid) -> Result<DeletionReport, MediaError> {
        let inner = &self.inner;
        let removed = inner
            .index
            .remove_for_source(source_id)
            .await
            .map_err(MediaError::storage)?;

        if let Err(e) = inner
            .cache
            .invalidate_entries_if(move |key, _| key.source_id == source_id)
        {
            warn!(source_id = %source_id, error = %e, "failed to invalidate cached renditions");
        }

        let mut report = DeletionReport {
            source_id,
            renditions_removed: removed.len(),
            ..Default::default()
        };
        for rendition in &removed {
            match inner.storage.delete(&rendition.file_uri).await {
                Ok(()) => report.files_removed += 1,
                Err(e) => report
                    .failures
                    .push(format!("{}: {e:#}", rendition.file_uri)),
            }
        }

        debug!(source_id = %source_id, count = removed.len(), "renditions purged");
        Ok(report)
    }

    async fn update_source(&self, source: &ImageSource) -> Result<(), MediaError> {
        if self
            .inner
            .sources
            .update(source)
            .await
            .map_err(MediaError::storage)?
        {
            Ok(())
        } else {
            Err(MediaError::SourceNotFound(source.id))
        }
    }

    /// Validate and write original bytes; returns (uri, width, height, hash).
    async fn store_original(
        &self,
        id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(String, u32, u32, String), MediaError> {
        if bytes.len() > MAX_INPUT_SIZE {
            return Err(MediaError::Derivation(format!(
                "image is {} bytes, limit is {MAX_INPUT_SIZE}",
                bytes.len()
            )));
        }

        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| MediaError::Derivation(format!("unreadable image: {e}")))?
            .into_dimensions()
            .map_err(|e| MediaError::Derivation(format!("unreadable image: {e}")))?;

        let content_hash = hex::encode(Sha256::digest(bytes));
        let file_uri = format!(
            "local://originals/{id}/{}_{}",
            &content_hash[..8],
            sanitize_filename(filename)
        );
        self.inner
            .storage
            .write(&file_uri, bytes)
            .await
            .map_err(MediaError::storage)?;

        Ok((file_uri, width, height, content_hash))
    }
}

impl std::fmt::Debug for RenditionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenditionEngine")
            .field("cached", &self.inner.cache.entry_count())
            .field("derivations", &self.derivation_count())
            .finish()
    }
}

/// Focal point precedence: explicit override, then the stored point.
/// `None` means the geometric centre.
fn effective_focal_point(source: &ImageSource, spec: &RenditionSpec) -> Option<FocalPoint> {
    spec.focal_override().or(source.focal_point)
}

/// Cache key for a source and filter.
pub fn rendition_key(source: &ImageSource, spec: &RenditionSpec) -> RenditionKey {
    let focal_point_key = if spec.mode().uses_focal_point() {
        effective_focal_point(source, spec)
            .map(|f| f.key())
            .unwrap_or_default()
    } else {
        String::new()
    };
    RenditionKey {
        source_id: source.id,
        spec_key: spec.spec_key(),
        focal_point_key,
    }
}

fn artifact_digest(key: &RenditionKey, source_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(source_hash.as_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

fn process_image(original: &[u8], job: &DerivationJob) -> Result<DerivedImage, MediaError> {
    let source_format = image::guess_format(original).ok();
    let img = image::load_from_memory(original)
        .map_err(|e| MediaError::Derivation(format!("failed to decode source: {e}")))?;

    let plan = geometry::plan(img.width(), img.height(), job.mode, job.focal);
    let img = match plan.crop {
        Some(crop) => img.crop_imm(crop.x, crop.y, crop.width, crop.height),
        None => img,
    };
    let img = if (img.width(), img.height()) != (plan.width, plan.height) {
        img.resize_exact(plan.width, plan.height, FilterType::Lanczos3)
    } else {
        img
    };

    let format = job.format.unwrap_or(match source_format {
        Some(ImageFormat::Png | ImageFormat::Gif) => OutputFormat::Png,
        _ => OutputFormat::Jpeg,
    });

    let mut bytes = Vec::new();
    let encoded = match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut bytes, job.quality);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
        }
        OutputFormat::Png => img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png),
    };
    encoded.map_err(|e| MediaError::Derivation(format!("failed to encode rendition: {e}")))?;

    Ok(DerivedImage {
        bytes,
        width: img.width(),
        height: img.height(),
        format,
    })
}
