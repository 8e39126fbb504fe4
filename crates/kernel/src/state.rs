//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::RngCore;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::Config;
use crate::content::{BlockTypeRegistry, RendererRegistry, STORY_STREAM};
use crate::db;
use crate::listing::{FeedService, PageStore, PgPageStore};
use crate::media::{
    FileStorage, LocalFileStorage, PgRenditionIndex, PgSourceStore, RenditionEngine,
    RenditionIndex, SourceStore, UrlSigner,
};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// PostgreSQL connection pool; None when running on in-memory stores.
    db: Option<PgPool>,

    /// Frozen block schema.
    schema: BlockTypeRegistry,

    /// HTML renderers for the story stream.
    renderers: Arc<RendererRegistry>,

    /// Rendition engine.
    engine: RenditionEngine,

    /// Artifact storage, also served under the media URL.
    files: Arc<dyn FileStorage>,

    /// Public prefix of stored media.
    media_url: String,

    /// Listing and feed service.
    feeds: FeedService,

    /// Signs dynamic image URLs; None disables the image endpoint.
    signer: Option<UrlSigner>,

    /// Items per listing page.
    listing_page_size: u32,
}

/// Storage backends the state is assembled from.
pub struct Stores {
    pub db: Option<PgPool>,
    pub sources: Arc<dyn SourceStore>,
    pub renditions: Arc<dyn RenditionIndex>,
    pub pages: Arc<dyn PageStore>,
    pub files: Arc<dyn FileStorage>,
}

impl AppState {
    /// Create application state backed by PostgreSQL.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config)
            .await
            .context("failed to create database pool")?;
        db::run_migrations(&pool).await?;

        let stores = Stores {
            sources: Arc::new(PgSourceStore::new(pool.clone())),
            renditions: Arc::new(PgRenditionIndex::new(pool.clone())),
            pages: Arc::new(PgPageStore::new(pool.clone())),
            files: Arc::new(LocalFileStorage::new(
                config.media_dir.clone(),
                config.media_url.clone(),
            )),
            db: Some(pool),
        };
        Self::assemble(config, stores)
    }

    /// Wire services over the given stores.
    pub fn assemble(config: &Config, stores: Stores) -> Result<Self> {
        let schema = BlockTypeRegistry::standard().context("invalid block schema")?;

        let signer = config
            .image_serve_key
            .as_deref()
            .map(|key| UrlSigner::new(key.as_bytes()))
            .transpose()?;

        // Image blocks need a signer even when the endpoint is off.
        let render_signer = match &signer {
            Some(signer) => signer.clone(),
            None => {
                warn!("IMAGE_SERVE_KEY not set, dynamic image endpoint disabled");
                let mut key = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                UrlSigner::new(&key)?
            }
        };
        let renderers = Arc::new(RendererRegistry::html(render_signer));
        renderers
            .verify(&schema, STORY_STREAM)
            .context("story renderers incomplete")?;

        let engine = RenditionEngine::new(
            stores.sources,
            stores.renditions,
            stores.files.clone(),
            config.max_concurrent_renditions,
        );

        let feeds = FeedService::new(stores.pages, schema.clone(), config.feed_settings()?)
            .with_renderers(renderers.clone())
            .with_engine(engine.clone());

        info!(
            block_types = schema.len(),
            database = stores.db.is_some(),
            "application state initialized"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                db: stores.db,
                schema,
                renderers,
                engine,
                files: stores.files,
                media_url: config.media_url.trim_end_matches('/').to_string(),
                feeds,
                signer,
                listing_page_size: config.listing_page_size,
            }),
        })
    }

    /// Get the database pool, if any.
    pub fn db(&self) -> Option<&PgPool> {
        self.inner.db.as_ref()
    }

    pub fn schema(&self) -> &BlockTypeRegistry {
        &self.inner.schema
    }

    pub fn renderers(&self) -> &RendererRegistry {
        &self.inner.renderers
    }

    pub fn engine(&self) -> &RenditionEngine {
        &self.inner.engine
    }

    pub fn files(&self) -> &Arc<dyn FileStorage> {
        &self.inner.files
    }

    pub fn media_url(&self) -> &str {
        &self.inner.media_url
    }

    pub fn feeds(&self) -> &FeedService {
        &self.inner.feeds
    }

    pub fn signer(&self) -> Option<&UrlSigner> {
        self.inner.signer.as_ref()
    }

    pub fn listing_page_size(&self) -> u32 {
        self.inner.listing_page_size
    }

    /// Check if PostgreSQL is reachable. Always true without a database.
    pub async fn postgres_healthy(&self) -> bool {
        match &self.inner.db {
            Some(pool) => db::check_health(pool).await,
            None => true,
        }
    }
}
