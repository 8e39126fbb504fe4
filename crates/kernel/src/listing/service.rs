//! Feed and listing service.
//!
//! Projects stored blog pages into [`FeedItem`]s and assembles listing pages
//! and syndication documents from them. Nothing here mutates content.

use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use super::feed::{FeedFormat, FeedMeta, render_feed};
use super::pages::PageStore;
use super::query::{ListingError, ListingFilter, PageRequest, clamp_page_size};
use super::types::{BlogPage, FeedItem, ListingPage, PageInfo, total_pages};
use crate::content::{
    BlockTypeRegistry, ContentStream, ImageCredits, RendererRegistry, STORY_STREAM, render,
};
use crate::media::{RenditionEngine, RenditionSpec, ResizeMode};

/// Longest generated summary, in characters.
pub const SUMMARY_LENGTH: usize = 300;

static TAGS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"<[^>]*>").expect("tag pattern is valid")
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\s+").expect("whitespace pattern is valid")
});

/// Which syndication feed to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// Every live blog post.
    Blog,
    /// Posts carrying the legacy aggregator tag, minus the hidden ones.
    Legacy,
}

impl FeedKind {
    /// Path the feed is served from.
    pub fn path(self) -> &'static str {
        match self {
            FeedKind::Blog => "/blog/feed/",
            FeedKind::Legacy => "/blog/feed/planet_drupal/",
        }
    }
}

/// Site-level feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub title: String,
    pub description: String,
    /// Public site address, without trailing slash.
    pub site_url: String,
    /// Listings only include descendants of this page.
    pub blog_index_path: Option<String>,
    /// Items per feed document.
    pub feed_limit: u32,
    pub legacy_tag: String,
    pub legacy_exclude_tag: String,
    pub feed_image: RenditionSpec,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            title: "Blog".to_string(),
            description: String::new(),
            site_url: "http://localhost:3000".to_string(),
            blog_index_path: Some("/blog/".to_string()),
            feed_limit: 20,
            legacy_tag: "planet-drupal".to_string(),
            legacy_exclude_tag: "planet-drupal-hidden".to_string(),
            feed_image: RenditionSpec::new(ResizeMode::Fill {
                width: 1200,
                height: 630,
                closeness: 0,
            }),
        }
    }
}

/// Listing and feed queries over a [`PageStore`].
#[derive(Clone)]
pub struct FeedService {
    inner: Arc<FeedServiceInner>,
}

struct FeedServiceInner {
    pages: Arc<dyn PageStore>,
    schema: BlockTypeRegistry,
    renderers: Option<Arc<RendererRegistry>>,
    engine: Option<RenditionEngine>,
    settings: FeedSettings,
}

impl FeedService {
    pub fn new(pages: Arc<dyn PageStore>, schema: BlockTypeRegistry, settings: FeedSettings) -> Self {
        Self {
            inner: Arc::new(FeedServiceInner {
                pages,
                schema,
                renderers: None,
                engine: None,
                settings,
            }),
        }
    }

    /// Render body HTML into feed documents with these renderers.
    pub fn with_renderers(self, renderers: Arc<RendererRegistry>) -> Self {
        self.rebuild(|inner| inner.renderers = Some(renderers))
    }

    /// Attach feed images derived by this engine.
    pub fn with_engine(self, engine: RenditionEngine) -> Self {
        self.rebuild(|inner| inner.engine = Some(engine))
    }

    fn rebuild(self, f: impl FnOnce(&mut FeedServiceInner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => FeedServiceInner {
                pages: shared.pages.clone(),
                schema: shared.schema.clone(),
                renderers: shared.renderers.clone(),
                engine: shared.engine.clone(),
                settings: shared.settings.clone(),
            },
        };
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.inner.settings
    }

    /// Filter scoped to the blog index.
    pub fn blog_filter(&self) -> ListingFilter {
        match &self.inner.settings.blog_index_path {
            Some(path) => ListingFilter::new().under(path),
            None => ListingFilter::new(),
        }
    }

    /// One page of live items, newest first.
    ///
    /// Out-of-range pages are corrected, never rejected.
    pub async fn list_feed_items(
        &self,
        filter: &ListingFilter,
        page: PageRequest,
        page_size: u32,
    ) -> Result<ListingPage> {
        self.page_of(filter, page, page_size, false).await
    }

    async fn page_of(
        &self,
        filter: &ListingFilter,
        page: PageRequest,
        page_size: u32,
        with_content: bool,
    ) -> Result<ListingPage> {
        let page_size = clamp_page_size(page_size);
        let total = self.inner.pages.count(filter).await?;
        let current = page.resolve(total_pages(total, page_size));
        let page_info = PageInfo::new(total, current, page_size);

        let pages = self
            .inner
            .pages
            .fetch(filter, page_info.offset(), u64::from(page_size))
            .await?;

        let mut items = Vec::with_capacity(pages.len());
        for page in &pages {
            items.push(self.project(page, with_content).await);
        }

        debug!(
            page = page_info.page,
            total = page_info.total,
            items = items.len(),
            "listing page assembled"
        );
        Ok(ListingPage { items, page_info })
    }

    /// Filter backing a feed.
    pub fn feed_filter(&self, kind: FeedKind) -> std::result::Result<ListingFilter, ListingError> {
        let filter = self.blog_filter();
        match kind {
            FeedKind::Blog => Ok(filter),
            FeedKind::Legacy => {
                let settings = &self.inner.settings;
                filter
                    .with_tag(Some(&settings.legacy_tag))?
                    .excluding(&settings.legacy_exclude_tag)
            }
        }
    }

    /// Complete feed document.
    pub async fn feed_document(&self, kind: FeedKind, format: FeedFormat) -> Result<String> {
        let filter = self.feed_filter(kind)?;
        let settings = &self.inner.settings;
        let listing = self
            .page_of(&filter, PageRequest::First, settings.feed_limit, true)
            .await?;

        let meta = FeedMeta {
            title: settings.title.clone(),
            description: settings.description.clone(),
            site_url: settings.site_url.clone(),
            self_url: format!("{}{}", settings.site_url.trim_end_matches('/'), kind.path()),
        };

        info!(feed = ?kind, format = ?format, items = listing.items.len(), "feed generated");
        Ok(render_feed(&meta, &listing.items, format))
    }

    /// Most used tags on live pages under the blog index, most frequent first.
    /// The legacy tag is left out.
    pub async fn popular_tags(&self, limit: usize) -> Result<Vec<(String, u64)>> {
        let mut counts = self.inner.pages.tag_counts(&self.blog_filter()).await?;
        counts.retain(|(tag, _)| *tag != self.inner.settings.legacy_tag);
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(limit);
        Ok(counts)
    }

    /// Feed projection of one page.
    pub async fn project(&self, page: &BlogPage, with_content: bool) -> FeedItem {
        let stream = self.parse_body(page);
        let summary = match page.search_description.as_deref().map(str::trim) {
            Some(description) if !description.is_empty() => description.to_string(),
            _ => stream
                .as_ref()
                .and_then(|s| s.first_text(&self.inner.schema))
                .map(summarize)
                .unwrap_or_default(),
        };

        let content_html = match (&self.inner.renderers, &stream) {
            (Some(renderers), Some(stream)) if with_content => {
                let credits = match &self.inner.engine {
                    Some(engine) => engine.credits(&stream.image_refs(&self.inner.schema)).await,
                    None => ImageCredits::new(),
                };
                Some(render(stream, renderers).with_credits(&credits).to_html())
            }
            _ => None,
        };

        FeedItem {
            id: page.id,
            title: page.title.clone(),
            date: page.date,
            summary,
            url: format!(
                "{}{}",
                self.inner.settings.site_url.trim_end_matches('/'),
                page.url_path
            ),
            canonical_url: page.canonical_url.clone().filter(|url| !url.is_empty()),
            tags: page.tags.clone(),
            feed_image: self.feed_image(page).await,
            content_html,
        }
    }

    fn parse_body(&self, page: &BlogPage) -> Option<ContentStream> {
        if page.body.trim().is_empty() {
            return None;
        }
        match ContentStream::parse_for(&page.body, &self.inner.schema, STORY_STREAM) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(page_id = %page.id, error = %e, "failed to parse page body");
                None
            }
        }
    }

    async fn feed_image(&self, page: &BlogPage) -> Option<crate::media::Rendition> {
        let (engine, source_id) = (self.inner.engine.as_ref()?, page.feed_image?);
        match engine
            .get_or_create(source_id, &self.inner.settings.feed_image)
            .await
        {
            Ok(rendition) => Some((*rendition).clone()),
            Err(e) => {
                warn!(page_id = %page.id, source_id = %source_id, error = %e, "feed image unavailable");
                None
            }
        }
    }
}

/// Plain-text teaser from an HTML fragment.
pub fn summarize(html: &str) -> String {
    let text = TAGS.replace_all(html, " ");
    let text = decode_entities(&text);
    let text = WHITESPACE.replace_all(text.trim(), " ");
    text.chars().take(SUMMARY_LENGTH).collect::<String>().trim_end().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::listing::MemoryPageStore;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn page(day: u32, tags: &[&str], body: &str) -> BlogPage {
        BlogPage {
            id: Uuid::from_u128(u128::from(day)),
            title: format!("Post {day}"),
            slug: format!("post-{day}"),
            url_path: format!("/blog/post-{day}/"),
            live: true,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            body: body.to_string(),
            search_description: None,
            canonical_url: None,
            feed_image: None,
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn service(pages: Vec<BlogPage>) -> FeedService {
        FeedService::new(
            Arc::new(MemoryPageStore::with_pages(pages)),
            BlockTypeRegistry::standard().unwrap(),
            FeedSettings {
                site_url: "https://example.com".to_string(),
                ..FeedSettings::default()
            },
        )
    }

    #[test]
    fn summarize_strips_markup() {
        assert_eq!(
            summarize("<p>Fish &amp; <b>chips</b></p>\n<p>today</p>"),
            "Fish & chips today"
        );
        assert_eq!(summarize(&"a".repeat(400)).chars().count(), SUMMARY_LENGTH);
    }

    #[tokio::test]
    async fn summary_prefers_search_description() {
        let body = r#"[{"type": "paragraph", "value": "<p>From the body</p>"}]"#;
        let mut described = page(1, &[], body);
        described.search_description = Some("Described".to_string());
        let svc = service(vec![]);

        assert_eq!(svc.project(&described, false).await.summary, "Described");
        assert_eq!(svc.project(&page(2, &[], body), false).await.summary, "From the body");
    }

    #[tokio::test]
    async fn malformed_body_still_projects() {
        let svc = service(vec![]);
        let item = svc.project(&page(1, &[], "not json"), true).await;
        assert_eq!(item.summary, "");
        assert_eq!(item.url, "https://example.com/blog/post-1/");
    }

    #[tokio::test]
    async fn legacy_feed_filters_tags() {
        let svc = service(vec![
            page(1, &["blog"], ""),
            page(2, &["planet-drupal"], ""),
            page(3, &["planet-drupal", "planet-drupal-hidden"], ""),
        ]);

        let xml = svc.feed_document(FeedKind::Legacy, FeedFormat::Rss).await.unwrap();
        assert!(xml.contains("<title>Post 2</title>"));
        assert!(!xml.contains("<title>Post 1</title>"));
        assert!(!xml.contains("<title>Post 3</title>"));
        assert!(xml.contains("https://example.com/blog/feed/planet_drupal/"));

        let xml = svc.feed_document(FeedKind::Blog, FeedFormat::Atom).await.unwrap();
        for n in 1..=3 {
            assert!(xml.contains(&format!("<title>Post {n}</title>")));
        }
    }

    #[tokio::test]
    async fn popular_tags_skip_legacy_tag() {
        let svc = service(vec![
            page(1, &["rust", "planet-drupal"], ""),
            page(2, &["rust", "wagtail"], ""),
            page(3, &["planet-drupal", "wagtail", "rust"], ""),
        ]);
        let tags = svc.popular_tags(2).await.unwrap();
        assert_eq!(
            tags,
            vec![("rust".to_string(), 3), ("wagtail".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn popular_tags_are_scoped_to_blog_index() {
        let mut elsewhere = page(4, &["news", "rust"], "");
        elsewhere.url_path = "/news/post-4/".to_string();
        let mut news = page(5, &["news"], "");
        news.url_path = "/news/post-5/".to_string();
        let svc = service(vec![page(1, &["rust"], ""), elsewhere, news]);

        let tags = svc.popular_tags(10).await.unwrap();
        assert_eq!(tags, vec![("rust".to_string(), 1)]);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_blog_index() {
        let mut elsewhere = page(4, &["rust"], "");
        elsewhere.url_path = "/news/post-4/".to_string();
        let svc = service(vec![page(1, &["rust"], ""), page(2, &[], ""), elsewhere]);

        let filter = svc.blog_filter().with_tag(Some("rust")).unwrap();
        let listing = svc
            .list_feed_items(&filter, PageRequest::First, 10)
            .await
            .unwrap();
        assert_eq!(listing.items.len(), 1);
        assert_eq!(listing.items[0].title, "Post 1");
        assert_eq!(listing.page_info.total, 1);
    }
}
