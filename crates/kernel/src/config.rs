//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::listing::FeedSettings;
use crate::media::RenditionSpec;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Root directory for originals and renditions (default: ./media).
    pub media_dir: PathBuf,

    /// Base URL the media directory is served from (default: /media).
    pub media_url: String,

    /// Public site URL, used for absolute links in feeds.
    pub site_url: String,

    pub feed_title: String,
    pub feed_description: String,

    /// Items per feed document (default: 20).
    pub feed_limit: u32,

    /// Items per listing page (default: 12).
    pub listing_page_size: u32,

    /// Tree path of the blog index; listings only include its descendants.
    pub blog_index_path: Option<String>,

    /// Tag selecting the legacy aggregator feed (default: planet-drupal).
    pub legacy_feed_tag: String,

    /// Tag hiding a post from the legacy feed (default: planet-drupal-hidden).
    pub legacy_feed_exclude_tag: String,

    /// Rendition filter for feed images (default: fill-1200x630).
    pub feed_image_filter: String,

    /// HMAC key for dynamic image URLs. When None, the image endpoint is disabled.
    pub image_serve_key: Option<String>,

    /// Concurrent rendition derivations (default: 4).
    pub max_concurrent_renditions: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let media_dir = env::var("MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./media"));

        let media_url = env::var("MEDIA_URL").unwrap_or_else(|_| "/media".to_string());

        let site_url = env::var("SITE_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));

        let feed_title = env::var("FEED_TITLE").unwrap_or_else(|_| "Blog".to_string());
        let feed_description = env::var("FEED_DESCRIPTION").unwrap_or_default();

        let feed_limit = env::var("FEED_LIMIT")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .context("FEED_LIMIT must be a valid u32")?;

        let listing_page_size = env::var("LISTING_PAGE_SIZE")
            .unwrap_or_else(|_| "12".to_string())
            .parse()
            .context("LISTING_PAGE_SIZE must be a valid u32")?;

        let blog_index_path = match env::var("BLOG_INDEX_PATH") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(path),
            Err(_) => Some("/blog/".to_string()),
        };

        let legacy_feed_tag =
            env::var("LEGACY_FEED_TAG").unwrap_or_else(|_| "planet-drupal".to_string());

        let legacy_feed_exclude_tag = env::var("LEGACY_FEED_EXCLUDE_TAG")
            .unwrap_or_else(|_| "planet-drupal-hidden".to_string());

        let feed_image_filter =
            env::var("FEED_IMAGE_FILTER").unwrap_or_else(|_| "fill-1200x630".to_string());
        RenditionSpec::parse(&feed_image_filter).context("FEED_IMAGE_FILTER is not a valid filter")?;

        let image_serve_key = env::var("IMAGE_SERVE_KEY").ok().filter(|k| !k.is_empty());

        let max_concurrent_renditions = env::var("MAX_CONCURRENT_RENDITIONS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .context("MAX_CONCURRENT_RENDITIONS must be a valid usize")?;

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            media_dir,
            media_url,
            site_url,
            feed_title,
            feed_description,
            feed_limit,
            listing_page_size,
            blog_index_path,
            legacy_feed_tag,
            legacy_feed_exclude_tag,
            feed_image_filter,
            image_serve_key,
            max_concurrent_renditions,
        })
    }

    /// Feed settings derived from this configuration.
    pub fn feed_settings(&self) -> Result<FeedSettings> {
        Ok(FeedSettings {
            title: self.feed_title.clone(),
            description: self.feed_description.clone(),
            site_url: self.site_url.trim_end_matches('/').to_string(),
            blog_index_path: self.blog_index_path.clone(),
            feed_limit: self.feed_limit,
            legacy_tag: self.legacy_feed_tag.clone(),
            legacy_exclude_tag: self.legacy_feed_exclude_tag.clone(),
            feed_image: RenditionSpec::parse(&self.feed_image_filter)
                .context("FEED_IMAGE_FILTER is not a valid filter")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: String::new(),
            database_max_connections: 10,
            media_dir: PathBuf::from("./media"),
            media_url: "/media".to_string(),
            site_url: "http://localhost:3000".to_string(),
            feed_title: "Blog".to_string(),
            feed_description: String::new(),
            feed_limit: 20,
            listing_page_size: 12,
            blog_index_path: Some("/blog/".to_string()),
            legacy_feed_tag: "planet-drupal".to_string(),
            legacy_feed_exclude_tag: "planet-drupal-hidden".to_string(),
            feed_image_filter: "fill-1200x630".to_string(),
            image_serve_key: None,
            max_concurrent_renditions: 4,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_feed_settings() {
        let settings = Config::default().feed_settings().unwrap();
        assert_eq!(settings.feed_image.spec_key(), "fill-1200x630");
        assert_eq!(settings.legacy_tag, "planet-drupal");
        assert_eq!(settings.blog_index_path.as_deref(), Some("/blog/"));
    }

    #[test]
    fn invalid_feed_image_filter_is_rejected() {
        let config = Config {
            feed_image_filter: "fill-0x0".to_string(),
            ..Config::default()
        };
        assert!(config.feed_settings().is_err());
    }
}
