//! Listing data types.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::Rendition;

/// A dated blog post as stored by the page tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogPage {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    /// Tree path, e.g. `/blog/my-post/`. Also the page's own address.
    pub url_path: String,
    /// Publicly visible.
    pub live: bool,
    pub date: NaiveDate,
    /// Body stream in its stored JSON form.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub search_description: Option<String>,
    #[serde(default)]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub feed_image: Option<Uuid>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Anything that can be listed in a dated, tagged, paginated view.
pub trait Listable {
    fn id(&self) -> Uuid;
    fn date(&self) -> NaiveDate;
    fn is_live(&self) -> bool;
    fn tags(&self) -> &BTreeSet<String>;
    fn path(&self) -> &str;
}

impl Listable for BlogPage {
    fn id(&self) -> Uuid {
        self.id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn path(&self) -> &str {
        &self.url_path
    }
}

/// Paging state of one listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Current page number (1-indexed).
    pub page: u32,
    pub page_size: u32,
    /// Matching items across all pages.
    pub total: u64,
    /// Always at least 1, even for an empty listing.
    pub total_pages: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PageInfo {
    pub fn new(total: u64, page: u32, page_size: u32) -> Self {
        let total_pages = total_pages(total, page_size);
        let page = page.clamp(1, total_pages);
        Self {
            page,
            page_size,
            total,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }

    /// Index of the first item on this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// Number of pages for `total` items; never zero.
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 1;
    }
    let pages = total.div_ceil(u64::from(page_size)).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Read-only feed projection of a dated page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: Uuid,
    pub title: String,
    pub date: NaiveDate,
    pub summary: String,
    /// The page's own address.
    pub url: String,
    pub canonical_url: Option<String>,
    pub tags: BTreeSet<String>,
    pub feed_image: Option<Rendition>,
    /// Rendered body, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
}

impl FeedItem {
    /// Link published for this item: the canonical URL when set.
    pub fn link(&self) -> &str {
        self.canonical_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.url)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub items: Vec<FeedItem>,
    pub page_info: PageInfo,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn page_info_paging() {
        let info = PageInfo::new(10, 2, 4);
        assert_eq!(info.total_pages, 3);
        assert!(info.has_next);
        assert!(info.has_previous);
        assert_eq!(info.offset(), 4);

        let last = PageInfo::new(10, 3, 4);
        assert!(!last.has_next);
    }

    #[test]
    fn empty_listing_has_one_page() {
        let info = PageInfo::new(0, 1, 12);
        assert_eq!(info.total_pages, 1);
        assert_eq!(info.page, 1);
        assert!(!info.has_next);
        assert!(!info.has_previous);
    }

    #[test]
    fn page_info_clamps() {
        assert_eq!(PageInfo::new(10, 99, 4).page, 3);
        assert_eq!(PageInfo::new(10, 0, 4).page, 1);
    }

    #[test]
    fn link_prefers_canonical_url() {
        let mut item = FeedItem {
            id: Uuid::nil(),
            title: "Post".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            summary: String::new(),
            url: "https://example.com/blog/post/".to_string(),
            canonical_url: Some("https://elsewhere.example/post".to_string()),
            tags: BTreeSet::new(),
            feed_image: None,
            content_html: None,
        };
        assert_eq!(item.link(), "https://elsewhere.example/post");
        item.canonical_url = Some(String::new());
        assert_eq!(item.link(), "https://example.com/blog/post/");
        item.canonical_url = None;
        assert_eq!(item.link(), "https://example.com/blog/post/");
    }
}
