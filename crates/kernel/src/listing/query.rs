//! Listing filters, page parameter handling and in-memory selection.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::types::{Listable, PageInfo};

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z0-9_-]{1,255}$").expect("tag pattern is valid")
});

/// Invalid listing input that cannot be corrected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListingError {
    #[error("invalid tag '{0}': tags are lowercase slugs")]
    InvalidTag(String),
}

/// Which items a listing includes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingFilter {
    /// Keep only items carrying this tag.
    pub tag: Option<String>,
    /// Drop items carrying this tag.
    pub exclude_tag: Option<String>,
    /// Keep only descendants of this tree path.
    pub ancestor_path: Option<String>,
}

impl ListingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by a user-supplied tag. Blank values mean "no filter".
    pub fn with_tag(mut self, tag: Option<&str>) -> Result<Self, ListingError> {
        self.tag = normalize_tag(tag)?;
        Ok(self)
    }

    pub fn excluding(mut self, tag: &str) -> Result<Self, ListingError> {
        self.exclude_tag = normalize_tag(Some(tag))?;
        Ok(self)
    }

    pub fn under(mut self, ancestor_path: &str) -> Self {
        self.ancestor_path = Some(ancestor_path.to_string());
        self
    }

    /// Whether a single item passes the filter.
    pub fn matches<T: Listable + ?Sized>(&self, item: &T) -> bool {
        if !item.is_live() {
            return false;
        }
        if let Some(tag) = &self.tag
            && !item.tags().contains(tag)
        {
            return false;
        }
        if let Some(tag) = &self.exclude_tag
            && item.tags().contains(tag)
        {
            return false;
        }
        if let Some(ancestor) = &self.ancestor_path {
            let path = item.path();
            if !(path.starts_with(ancestor.as_str()) && path != ancestor) {
                return false;
            }
        }
        true
    }
}

fn normalize_tag(tag: Option<&str>) -> Result<Option<String>, ListingError> {
    match tag.map(str::trim) {
        None | Some("") => Ok(None),
        Some(tag) if TAG_PATTERN.is_match(tag) => Ok(Some(tag.to_string())),
        Some(tag) => Err(ListingError::InvalidTag(tag.to_string())),
    }
}

/// The `page` query parameter before it is checked against the listing size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    /// Missing or not a number.
    First,
    Number(i64),
}

impl PageRequest {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).map(str::parse::<i64>) {
            Some(Ok(n)) => PageRequest::Number(n),
            _ => PageRequest::First,
        }
    }

    /// Actual page to show, given the number of pages.
    ///
    /// Numbers below 1 or past the end land on the last page.
    pub fn resolve(self, total_pages: u32) -> u32 {
        let last = total_pages.max(1);
        match self {
            PageRequest::First => 1,
            PageRequest::Number(n) if n >= 1 && n <= i64::from(last) => n as u32,
            PageRequest::Number(_) => last,
        }
    }
}

impl From<u32> for PageRequest {
    fn from(page: u32) -> Self {
        PageRequest::Number(i64::from(page))
    }
}

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(page_size: u32) -> u32 {
    page_size.clamp(1, MAX_PAGE_SIZE)
}

/// Listing order: newest first, ties broken by id.
pub fn listing_order<T: Listable + ?Sized>(a: &T, b: &T) -> Ordering {
    b.date().cmp(&a.date()).then_with(|| a.id().cmp(&b.id()))
}

/// Filter and sort a collection.
pub fn select<'a, T: Listable>(items: &'a [T], filter: &ListingFilter) -> Vec<&'a T> {
    let mut selected: Vec<&T> = items.iter().filter(|item| filter.matches(*item)).collect();
    selected.sort_by(|a, b| listing_order(*a, *b));
    selected
}

/// Cut one page out of an already sorted selection.
pub fn paginate<T>(sorted: Vec<T>, page: PageRequest, page_size: u32) -> (Vec<T>, PageInfo) {
    let page_size = clamp_page_size(page_size);
    let total = sorted.len() as u64;
    let info = PageInfo::new(
        total,
        page.resolve(super::types::total_pages(total, page_size)),
        page_size,
    );
    let items = sorted
        .into_iter()
        .skip(info.offset() as usize)
        .take(page_size as usize)
        .collect();
    (items, info)
}
