//! Folio test utilities.
//!
//! Helpers for integration testing: blog page fixtures, stream documents,
//! generated images, and assertion utilities.

// Fixture helpers panic on misuse; they only ever run inside tests.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Cursor;

use chrono::NaiveDate;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

/// Create a live blog page dated `2024-01-{day}` under `/blog/`.
pub fn test_page(day: u32) -> TestPage {
    TestPage {
        id: Uuid::from_u128(u128::from(day)),
        title: format!("Post {day}"),
        slug: format!("post-{day}"),
        url_path: format!("/blog/post-{day}/"),
        live: true,
        date: NaiveDate::from_ymd_opt(2024, 1, day).expect("valid day of January"),
        body: JsonValue::Array(Vec::new()),
        search_description: None,
        canonical_url: None,
        feed_image: None,
        tags: Vec::new(),
    }
}

/// A blog page builder for creating test fixtures.
#[derive(Debug, Clone)]
pub struct TestPage {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub url_path: String,
    pub live: bool,
    pub date: NaiveDate,
    pub body: JsonValue,
    pub search_description: Option<String>,
    pub canonical_url: Option<String>,
    pub feed_image: Option<Uuid>,
    pub tags: Vec<String>,
}

impl TestPage {
    /// Set a custom ID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    /// Move the page to another tree path.
    pub fn at(mut self, url_path: &str) -> Self {
        self.url_path = url_path.to_string();
        self
    }

    /// Set as draft.
    pub fn unpublished(mut self) -> Self {
        self.live = false;
        self
    }

    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = body;
        self
    }

    pub fn with_search_description(mut self, description: &str) -> Self {
        self.search_description = Some(description.to_string());
        self
    }

    pub fn with_canonical_url(mut self, url: &str) -> Self {
        self.canonical_url = Some(url.to_string());
        self
    }

    pub fn with_feed_image(mut self, source_id: Uuid) -> Self {
        self.feed_image = Some(source_id);
        self
    }

    /// JSON form, deserializable as a kernel `BlogPage`.
    pub fn to_json(&self) -> JsonValue {
        json!({
            "id": self.id,
            "title": self.title,
            "slug": self.slug,
            "url_path": self.url_path,
            "live": self.live,
            "date": self.date.format("%Y-%m-%d").to_string(),
            "body": self.body.to_string(),
            "search_description": self.search_description,
            "canonical_url": self.canonical_url,
            "feed_image": self.feed_image,
            "tags": self.tags,
        })
    }
}

/// Stream document builders.
pub mod stream {
    use serde_json::{Value, json};

    /// `{"type": .., "value": ..}` entry.
    pub fn block(block_type: &str, value: Value) -> Value {
        json!({ "type": block_type, "value": value })
    }

    pub fn paragraph(html: &str) -> Value {
        block("paragraph", json!(html))
    }

    pub fn heading(text: &str) -> Value {
        block("h2", json!(text))
    }

    pub fn aligned_image(image: uuid::Uuid, alignment: &str, caption: &str) -> Value {
        block(
            "aligned_image",
            json!({ "image": image, "alignment": alignment, "caption": caption }),
        )
    }

    /// A whole stream document.
    pub fn document(entries: Vec<Value>) -> Value {
        Value::Array(entries)
    }
}

/// Encode a `width` × `height` gradient as PNG.
pub fn test_png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

/// Encode a `width` × `height` gradient as JPEG.
pub fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("in-memory image encoding");
    bytes
}

/// Assertion helpers for rendered output.
pub mod assert {
    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string to NOT contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that `first` appears before `second`.
    pub fn ordered(haystack: &str, first: &str, second: &str) {
        let a = haystack.find(first);
        let b = haystack.find(second);
        assert!(
            matches!((a, b), (Some(a), Some(b)) if a < b),
            "Expected '{first}' before '{second}'\nActual: {haystack}"
        );
    }
}
