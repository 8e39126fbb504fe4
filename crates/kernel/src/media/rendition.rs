//! Rendition records and the key → artifact index.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::spec::OutputFormat;
use crate::markup::html_escape;

/// Identity of a rendition: one per (source, transformation, focal point).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenditionKey {
    pub source_id: Uuid,
    pub spec_key: String,
    /// Empty when the transformation ignores the focal point.
    pub focal_point_key: String,
}

impl fmt::Display for RenditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id, self.spec_key)?;
        if !self.focal_point_key.is_empty() {
            write!(f, "/{}", self.focal_point_key)?;
        }
        Ok(())
    }
}

/// A derived image artifact. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendition {
    pub source_id: Uuid,
    pub spec_key: String,
    pub focal_point_key: String,
    /// Storage URI of the artifact bytes.
    pub file_uri: String,
    /// Public URL of the artifact.
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub format: OutputFormat,
    /// Content hash of the original the artifact was derived from.
    pub source_hash: String,
    pub created: DateTime<Utc>,
}

impl Rendition {
    pub fn key(&self) -> RenditionKey {
        RenditionKey {
            source_id: self.source_id,
            spec_key: self.spec_key.clone(),
            focal_point_key: self.focal_point_key.clone(),
        }
    }

    /// `<img>` element for this rendition.
    pub fn img_tag(&self, alt: &str) -> String {
        format!(
            "<img src=\"{}\" width=\"{}\" height=\"{}\" alt=\"{}\">",
            html_escape(&self.url),
            self.width,
            self.height,
            html_escape(alt)
        )
    }
}

/// Persistent map from rendition key to artifact.
#[async_trait]
pub trait RenditionIndex: Send + Sync {
    async fn get(&self, key: &RenditionKey) -> Result<Option<Rendition>>;

    /// Record a rendition unless one already exists for its key.
    ///
    /// Returns whichever record is stored after the call; the first writer wins.
    async fn put(&self, rendition: Rendition) -> Result<Rendition>;

    async fn remove(&self, key: &RenditionKey) -> Result<Option<Rendition>>;

    /// Remove and return every rendition of a source.
    async fn remove_for_source(&self, source_id: Uuid) -> Result<Vec<Rendition>>;
}

/// In-memory rendition index.
#[derive(Debug, Default)]
pub struct MemoryRenditionIndex {
    renditions: DashMap<RenditionKey, Rendition>,
}

impl MemoryRenditionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.renditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renditions.is_empty()
    }
}

#[async_trait]
impl RenditionIndex for MemoryRenditionIndex {
    async fn get(&self, key: &RenditionKey) -> Result<Option<Rendition>> {
        Ok(self.renditions.get(key).map(|r| r.clone()))
    }

    async fn put(&self, rendition: Rendition) -> Result<Rendition> {
        let stored = self
            .renditions
            .entry(rendition.key())
            .or_insert(rendition)
            .clone();
        Ok(stored)
    }

    async fn remove(&self, key: &RenditionKey) -> Result<Option<Rendition>> {
        Ok(self.renditions.remove(key).map(|(_, r)| r))
    }

    async fn remove_for_source(&self, source_id: Uuid) -> Result<Vec<Rendition>> {
        let keys: Vec<RenditionKey> = self
            .renditions
            .iter()
            .filter(|entry| entry.key().source_id == source_id)
            .map(|entry| entry.key().clone())
            .collect();
        Ok(keys
            .iter()
            .filter_map(|key| self.renditions.remove(key).map(|(_, r)| r))
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct RenditionRow {
    source_id: Uuid,
    spec_key: String,
    focal_point_key: String,
    file_uri: String,
    url: String,
    width: i32,
    height: i32,
    file_size: i64,
    format: String,
    source_hash: String,
    created: DateTime<Utc>,
}

impl From<RenditionRow> for Rendition {
    fn from(row: RenditionRow) -> Self {
        Self {
            source_id: row.source_id,
            spec_key: row.spec_key,
            focal_point_key: row.focal_point_key,
            file_uri: row.file_uri,
            url: row.url,
            width: u32::try_from(row.width).unwrap_or(0),
            height: u32::try_from(row.height).unwrap_or(0),
            file_size: u64::try_from(row.file_size).unwrap_or(0),
            format: if row.format == "png" {
                OutputFormat::Png
            } else {
                OutputFormat::Jpeg
            },
            source_hash: row.source_hash,
            created: row.created,
        }
    }
}

const RENDITION_COLUMNS: &str = "source_id, spec_key, focal_point_key, file_uri, url, width, \
     height, file_size, format, source_hash, created";

/// PostgreSQL rendition index (`image_rendition` table).
#[derive(Debug, Clone)]
pub struct PgRenditionIndex {
    pool: PgPool,
}

impl PgRenditionIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RenditionIndex for PgRenditionIndex {
    async fn get(&self, key: &RenditionKey) -> Result<Option<Rendition>> {
        let row = sqlx::query_as::<_, RenditionRow>(&format!(
            "SELECT {RENDITION_COLUMNS} FROM image_rendition \
             WHERE source_id = $1 AND spec_key = $2 AND focal_point_key = $3"
        ))
        .bind(key.source_id)
        .bind(&key.spec_key)
        .bind(&key.focal_point_key)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch rendition")?;
        Ok(row.map(Rendition::from))
    }

    async fn put(&self, rendition: Rendition) -> Result<Rendition> {
        sqlx::query(&format!(
            "INSERT INTO image_rendition ({RENDITION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (source_id, spec_key, focal_point_key) DO NOTHING"
        ))
        .bind(rendition.source_id)
        .bind(&rendition.spec_key)
        .bind(&rendition.focal_point_key)
        .bind(&rendition.file_uri)
        .bind(&rendition.url)
        .bind(rendition.width as i32)
        .bind(rendition.height as i32)
        .bind(rendition.file_size as i64)
        .bind(match rendition.format {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        })
        .bind(&rendition.source_hash)
        .bind(rendition.created)
        .execute(&self.pool)
        .await
        .context("failed to record rendition")?;

        self.get(&rendition.key())
            .await?
            .context("rendition vanished immediately after insert")
    }

    async fn remove(&self, key: &RenditionKey) -> Result<Option<Rendition>> {
        let row = sqlx::query_as::<_, RenditionRow>(&format!(
            "DELETE FROM image_rendition \
             WHERE source_id = $1 AND spec_key = $2 AND focal_point_key = $3 \
             RETURNING {RENDITION_COLUMNS}"
        ))
        .bind(key.source_id)
        .bind(&key.spec_key)
        .bind(&key.focal_point_key)
        .fetch_optional(&self.pool)
        .await
        .context("failed to remove rendition")?;
        Ok(row.map(Rendition::from))
    }

    async fn remove_for_source(&self, source_id: Uuid) -> Result<Vec<Rendition>> {
        let rows = sqlx::query_as::<_, RenditionRow>(&format!(
            "DELETE FROM image_rendition WHERE source_id = $1 RETURNING {RENDITION_COLUMNS}"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to remove renditions for source")?;
        Ok(rows.into_iter().map(Rendition::from).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn rendition(source_id: Uuid, spec_key: &str, file_uri: &str) -> Rendition {
        Rendition {
            source_id,
            spec_key: spec_key.to_string(),
            focal_point_key: String::new(),
            file_uri: file_uri.to_string(),
            url: format!("/media/{file_uri}"),
            width: 10,
            height: 10,
            file_size: 100,
            format: OutputFormat::Jpeg,
            source_hash: "abc".to_string(),
            created: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let index = MemoryRenditionIndex::new();
        let id = Uuid::now_v7();
        let first = index.put(rendition(id, "width-10", "a")).await.unwrap();
        let second = index.put(rendition(id, "width-10", "b")).await.unwrap();
        assert_eq!(first.file_uri, "a");
        assert_eq!(second.file_uri, "a");
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn remove_for_source_leaves_other_sources() {
        let index = MemoryRenditionIndex::new();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        index.put(rendition(a, "width-10", "1")).await.unwrap();
        index.put(rendition(a, "width-20", "2")).await.unwrap();
        index.put(rendition(b, "width-10", "3")).await.unwrap();

        let removed = index.remove_for_source(a).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(index.len(), 1);
        assert!(index.get(&rendition(b, "width-10", "").key()).await.unwrap().is_some());
    }

    #[test]
    fn img_tag_escapes_attributes() {
        let r = rendition(Uuid::nil(), "width-10", "x.jpg");
        assert_eq!(
            r.img_tag("\"quoted\" <alt>"),
            "<img src=\"/media/x.jpg\" width=\"10\" height=\"10\" alt=\"&quot;quoted&quot; &lt;alt&gt;\">"
        );
    }

    #[test]
    fn key_display_includes_focal_point_only_when_set() {
        let mut key = rendition(Uuid::nil(), "fill-1x1", "").key();
        assert_eq!(key.to_string(), format!("{}/fill-1x1", Uuid::nil()));
        key.focal_point_key = "focus-0,0,1,1".to_string();
        assert!(key.to_string().ends_with("/focus-0,0,1,1"));
    }
}
