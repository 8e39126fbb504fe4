//! Image source records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::spec::FocalPoint;

/// A stored original image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSource {
    pub id: Uuid,
    pub title: String,
    /// Storage URI of the original bytes.
    pub file_uri: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    /// SHA-256 of the original bytes, hex encoded.
    pub content_hash: String,
    pub focal_point: Option<FocalPoint>,
    /// Photographer or rights holder, shown when a block has no attribution.
    pub credit: Option<String>,
    pub created: DateTime<Utc>,
}

/// Persistence for image sources.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn insert(&self, source: &ImageSource) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<ImageSource>>;

    /// Overwrite an existing record. Returns false if it does not exist.
    async fn update(&self, source: &ImageSource) -> Result<bool>;

    /// Remove a record. Returns false if it did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// In-memory source store.
#[derive(Debug, Default)]
pub struct MemorySourceStore {
    sources: DashMap<Uuid, ImageSource>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn insert(&self, source: &ImageSource) -> Result<()> {
        if self.sources.contains_key(&source.id) {
            anyhow::bail!("image source {} already exists", source.id);
        }
        self.sources.insert(source.id, source.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImageSource>> {
        Ok(self.sources.get(&id).map(|s| s.clone()))
    }

    async fn update(&self, source: &ImageSource) -> Result<bool> {
        match self.sources.get_mut(&source.id) {
            Some(mut existing) => {
                *existing = source.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.sources.remove(&id).is_some())
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    title: String,
    file_uri: String,
    width: i32,
    height: i32,
    file_size: i64,
    content_hash: String,
    focal_left: Option<f64>,
    focal_top: Option<f64>,
    focal_right: Option<f64>,
    focal_bottom: Option<f64>,
    credit: Option<String>,
    created: DateTime<Utc>,
}

impl From<SourceRow> for ImageSource {
    fn from(row: SourceRow) -> Self {
        let focal_point = match (row.focal_left, row.focal_top, row.focal_right, row.focal_bottom) {
            (Some(l), Some(t), Some(r), Some(b)) => FocalPoint::new(l, t, r, b).ok(),
            _ => None,
        };
        Self {
            id: row.id,
            title: row.title,
            file_uri: row.file_uri,
            width: u32::try_from(row.width).unwrap_or(0),
            height: u32::try_from(row.height).unwrap_or(0),
            file_size: u64::try_from(row.file_size).unwrap_or(0),
            content_hash: row.content_hash,
            focal_point,
            credit: row.credit,
            created: row.created,
        }
    }
}

/// PostgreSQL source store (`image_source` table).
#[derive(Debug, Clone)]
pub struct PgSourceStore {
    pool: PgPool,
}

impl PgSourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn insert(&self, source: &ImageSource) -> Result<()> {
        let focal = source.focal_point;
        sqlx::query(
            r#"
            INSERT INTO image_source
                (id, title, file_uri, width, height, file_size, content_hash,
                 focal_left, focal_top, focal_right, focal_bottom, credit, created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(source.id)
        .bind(&source.title)
        .bind(&source.file_uri)
        .bind(source.width as i32)
        .bind(source.height as i32)
        .bind(source.file_size as i64)
        .bind(&source.content_hash)
        .bind(focal.map(|f| f.left))
        .bind(focal.map(|f| f.top))
        .bind(focal.map(|f| f.right))
        .bind(focal.map(|f| f.bottom))
        .bind(&source.credit)
        .bind(source.created)
        .execute(&self.pool)
        .await
        .context("failed to insert image source")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImageSource>> {
        let row = sqlx::query_as::<_, SourceRow>("SELECT * FROM image_source WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch image source")?;
        Ok(row.map(ImageSource::from))
    }

    async fn update(&self, source: &ImageSource) -> Result<bool> {
        let focal = source.focal_point;
        let result = sqlx::query(
            r#"
            UPDATE image_source
            SET title = $2, file_uri = $3, width = $4, height = $5, file_size = $6,
                content_hash = $7, focal_left = $8, focal_top = $9, focal_right = $10,
                focal_bottom = $11, credit = $12
            WHERE id = $1
            "#,
        )
        .bind(source.id)
        .bind(&source.title)
        .bind(&source.file_uri)
        .bind(source.width as i32)
        .bind(source.height as i32)
        .bind(source.file_size as i64)
        .bind(&source.content_hash)
        .bind(focal.map(|f| f.left))
        .bind(focal.map(|f| f.top))
        .bind(focal.map(|f| f.right))
        .bind(focal.map(|f| f.bottom))
        .bind(&source.credit)
        .execute(&self.pool)
        .await
        .context("failed to update image source")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM image_source WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete image source")?;
        Ok(result.rows_affected() > 0)
    }
}
