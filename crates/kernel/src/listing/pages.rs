//! Blog page storage.
//!
//! The page tree itself is owned elsewhere; this store exposes the dated,
//! tagged view of blog posts that listings and feeds read from.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use super::query::{ListingFilter, listing_order, select};
use super::types::BlogPage;

/// Read access to blog pages in listing order.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Number of pages matching the filter.
    async fn count(&self, filter: &ListingFilter) -> Result<u64>;

    /// Matching pages in listing order (date descending, then id).
    async fn fetch(&self, filter: &ListingFilter, offset: u64, limit: u64) -> Result<Vec<BlogPage>>;

    async fn get(&self, id: Uuid) -> Result<Option<BlogPage>>;

    /// Insert or replace a page and its tags.
    async fn save(&self, page: &BlogPage) -> Result<()>;

    /// Usage count of every tag on the pages matching the filter.
    async fn tag_counts(&self, filter: &ListingFilter) -> Result<Vec<(String, u64)>>;
}

/// In-memory page store.
#[derive(Debug, Default)]
pub struct MemoryPageStore {
    pages: DashMap<Uuid, BlogPage>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(pages: impl IntoIterator<Item = BlogPage>) -> Self {
        let store = Self::new();
        for page in pages {
            store.pages.insert(page.id, page);
        }
        store
    }

    fn snapshot(&self) -> Vec<BlogPage> {
        self.pages.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn count(&self, filter: &ListingFilter) -> Result<u64> {
        let pages = self.snapshot();
        Ok(select(&pages, filter).len() as u64)
    }

    async fn fetch(&self, filter: &ListingFilter, offset: u64, limit: u64) -> Result<Vec<BlogPage>> {
        let pages = self.snapshot();
        Ok(select(&pages, filter)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BlogPage>> {
        Ok(self.pages.get(&id).map(|p| p.clone()))
    }

    async fn save(&self, page: &BlogPage) -> Result<()> {
        self.pages.insert(page.id, page.clone());
        Ok(())
    }

    async fn tag_counts(&self, filter: &ListingFilter) -> Result<Vec<(String, u64)>> {
        let pages = self.snapshot();
        let mut counts: HashMap<String, u64> = HashMap::new();
        for page in select(&pages, filter) {
            for tag in &page.tags {
                *counts.entry(tag.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

#[derive(sqlx::FromRow)]
struct BlogPageRow {
    id: Uuid,
    title: String,
    slug: String,
    url_path: String,
    live: bool,
    date: NaiveDate,
    body: String,
    search_description: Option<String>,
    canonical_url: Option<String>,
    feed_image: Option<Uuid>,
}

impl BlogPageRow {
    fn into_page(self, tags: BTreeSet<String>) -> BlogPage {
        BlogPage {
            id: self.id,
            title: self.title,
            slug: self.slug,
            url_path: self.url_path,
            live: self.live,
            date: self.date,
            body: self.body,
            search_description: self.search_description,
            canonical_url: self.canonical_url,
            feed_image: self.feed_image,
            tags,
        }
    }
}

/// Shared WHERE clause; binds tag ($1), exclude tag ($2), ancestor path ($3).
const FILTER_CLAUSE: &str = r#"
    p.live
    AND ($1::text IS NULL OR EXISTS (
        SELECT 1 FROM blog_page_tag t WHERE t.page_id = p.id AND t.tag = $1))
    AND ($2::text IS NULL OR NOT EXISTS (
        SELECT 1 FROM blog_page_tag t WHERE t.page_id = p.id AND t.tag = $2))
    AND ($3::text IS NULL OR (starts_with(p.url_path, $3) AND p.url_path <> $3))
"#;

/// PostgreSQL page store (`blog_page` and `blog_page_tag` tables).
#[derive(Debug, Clone)]
pub struct PgPageStore {
    pool: PgPool,
}

impl PgPageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_tags(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, BTreeSet<String>>> {
        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT page_id, tag FROM blog_page_tag WHERE page_id = ANY($1)")
                .bind(ids)
                .fetch_all(&self.pool)
                .await
                .context("failed to load page tags")?;

        let mut tags: HashMap<Uuid, BTreeSet<String>> = HashMap::new();
        for (page_id, tag) in rows {
            tags.entry(page_id).or_default().insert(tag);
        }
        Ok(tags)
    }
}

#[async_trait]
impl PageStore for PgPageStore {
    async fn count(&self, filter: &ListingFilter) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM blog_page p WHERE {FILTER_CLAUSE}"
        ))
        .bind(filter.tag.as_deref())
        .bind(filter.exclude_tag.as_deref())
        .bind(filter.ancestor_path.as_deref())
        .fetch_one(&self.pool)
        .await
        .context("failed to count blog pages")?;
        row_count(count)
    }

    async fn fetch(&self, filter: &ListingFilter, offset: u64, limit: u64) -> Result<Vec<BlogPage>> {
        let rows = sqlx::query_as::<_, BlogPageRow>(&format!(
            "SELECT p.id, p.title, p.slug, p.url_path, p.live, p.date, p.body, \
                    p.search_description, p.canonical_url, p.feed_image \
             FROM blog_page p WHERE {FILTER_CLAUSE} \
             ORDER BY p.date DESC, p.id ASC LIMIT $4 OFFSET $5"
        ))
        .bind(filter.tag.as_deref())
        .bind(filter.exclude_tag.as_deref())
        .bind(filter.ancestor_path.as_deref())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to list blog pages")?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut tags = self.load_tags(&ids).await?;
        let mut pages: Vec<BlogPage> = rows
            .into_iter()
            .map(|row| {
                let page_tags = tags.remove(&row.id).unwrap_or_default();
                row.into_page(page_tags)
            })
            .collect();
        // Database collation of uuid matches Uuid::cmp; keep the order explicit anyway.
        pages.sort_by(listing_order);
        Ok(pages)
    }

    async fn get(&self, id: Uuid) -> Result<Option<BlogPage>> {
        let row = sqlx::query_as::<_, BlogPageRow>(
            "SELECT id, title, slug, url_path, live, date, body, search_description, \
                    canonical_url, feed_image \
             FROM blog_page WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch blog page")?;

        match row {
            Some(row) => {
                let tags = self.load_tags(&[id]).await?.remove(&id).unwrap_or_default();
                Ok(Some(row.into_page(tags)))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, page: &BlogPage) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO blog_page
                (id, title, slug, url_path, live, date, body, search_description,
                 canonical_url, feed_image)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                slug = EXCLUDED.slug,
                url_path = EXCLUDED.url_path,
                live = EXCLUDED.live,
                date = EXCLUDED.date,
                body = EXCLUDED.body,
                search_description = EXCLUDED.search_description,
                canonical_url = EXCLUDED.canonical_url,
                feed_image = EXCLUDED.feed_image
            "#,
        )
        .bind(page.id)
        .bind(&page.title)
        .bind(&page.slug)
        .bind(&page.url_path)
        .bind(page.live)
        .bind(page.date)
        .bind(&page.body)
        .bind(&page.search_description)
        .bind(&page.canonical_url)
        .bind(page.feed_image)
        .execute(&mut *tx)
        .await
        .context("failed to save blog page")?;

        sqlx::query("DELETE FROM blog_page_tag WHERE page_id = $1")
            .bind(page.id)
            .execute(&mut *tx)
            .await
            .context("failed to clear page tags")?;

        for tag in &page.tags {
            sqlx::query("INSERT INTO blog_page_tag (page_id, tag) VALUES ($1, $2)")
                .bind(page.id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .context("failed to save page tag")?;
        }

        tx.commit().await.context("failed to commit blog page")?;
        Ok(())
    }

    async fn tag_counts(&self, filter: &ListingFilter) -> Result<Vec<(String, u64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT pt.tag, COUNT(*) \
             FROM blog_page_tag pt JOIN blog_page p ON p.id = pt.page_id \
             WHERE {FILTER_CLAUSE} \
             GROUP BY pt.tag"
        ))
        .bind(filter.tag.as_deref())
        .bind(filter.exclude_tag.as_deref())
        .bind(filter.ancestor_path.as_deref())
        .fetch_all(&self.pool)
        .await
        .context("failed to count tags")?;

        rows.into_iter()
            .map(|(tag, count)| Ok((tag, row_count(count)?)))
            .collect()
    }
}

fn row_count(count: i64) -> Result<u64> {
    u64::try_from(count).with_context(|| format!("database returned a negative count ({count})"))
}
