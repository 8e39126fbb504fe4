//! RSS 2.0 and Atom 1.0 document rendering.
//!
//! Rendering is pure: it takes already projected [`FeedItem`]s and never
//! touches storage.

use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::Deserialize;

use super::types::FeedItem;
use crate::markup::xml_escape;

/// Syndication format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Rss,
    Atom,
}

impl FeedFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            FeedFormat::Rss => "application/rss+xml; charset=utf-8",
            FeedFormat::Atom => "application/atom+xml; charset=utf-8",
        }
    }
}

/// Channel-level metadata of a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMeta {
    pub title: String,
    pub description: String,
    /// Public address of the site the feed describes.
    pub site_url: String,
    /// Address the feed itself is served from.
    pub self_url: String,
}

/// Render a feed document. Items are emitted in the order given.
pub fn render_feed(meta: &FeedMeta, items: &[FeedItem], format: FeedFormat) -> String {
    match format {
        FeedFormat::Rss => render_rss(meta, items),
        FeedFormat::Atom => render_atom(meta, items),
    }
}

fn render_rss(meta: &FeedMeta, items: &[FeedItem]) -> String {
    let mut body = String::new();
    for item in items {
        let link = xml_escape(item.link());
        body.push_str(&format!(
            "    <item>\n      <title>{}</title>\n      <link>{}</link>\n      <guid isPermaLink=\"false\">{}</guid>\n      <pubDate>{}</pubDate>\n      <description>{}</description>\n",
            xml_escape(&item.title),
            link,
            item.id,
            rfc2822(item.date),
            xml_escape(&item.summary),
        ));
        for tag in &item.tags {
            body.push_str(&format!("      <category>{}</category>\n", xml_escape(tag)));
        }
        if let Some(image) = &item.feed_image {
            body.push_str(&format!(
                "      <enclosure url=\"{}\" length=\"{}\" type=\"{}\"/>\n",
                xml_escape(&absolute(&meta.site_url, &image.url)),
                image.file_size,
                image.format.content_type(),
            ));
        }
        if let Some(html) = &item.content_html {
            body.push_str(&format!(
                "      <content:encoded>{}</content:encoded>\n",
                xml_escape(html)
            ));
        }
        body.push_str("    </item>\n");
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\" xmlns:atom=\"http://www.w3.org/2005/Atom\" xmlns:content=\"http://purl.org/rss/1.0/modules/content/\">\n  <channel>\n    <title>{}</title>\n    <link>{}</link>\n    <description>{}</description>\n    <atom:link href=\"{}\" rel=\"self\" type=\"application/rss+xml\"/>\n{}  </channel>\n</rss>\n",
        xml_escape(&meta.title),
        xml_escape(&meta.site_url),
        xml_escape(&meta.description),
        xml_escape(&meta.self_url),
        body
    )
}

fn render_atom(meta: &FeedMeta, items: &[FeedItem]) -> String {
    // Newest item date, or now for an empty feed.
    let updated = items
        .iter()
        .map(|item| item.date)
        .max()
        .map(rfc3339)
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    let mut entries = String::new();
    for item in items {
        let link = xml_escape(item.link());
        entries.push_str(&format!(
            "  <entry>\n    <title>{}</title>\n    <link href=\"{}\"/>\n    <id>urn:uuid:{}</id>\n    <updated>{}</updated>\n    <summary>{}</summary>\n",
            xml_escape(&item.title),
            link,
            item.id,
            rfc3339(item.date),
            xml_escape(&item.summary),
        ));
        for tag in &item.tags {
            entries.push_str(&format!("    <category term=\"{}\"/>\n", xml_escape(tag)));
        }
        if let Some(image) = &item.feed_image {
            entries.push_str(&format!(
                "    <link rel=\"enclosure\" href=\"{}\" length=\"{}\" type=\"{}\"/>\n",
                xml_escape(&absolute(&meta.site_url, &image.url)),
                image.file_size,
                image.format.content_type(),
            ));
        }
        if let Some(html) = &item.content_html {
            entries.push_str(&format!(
                "    <content type=\"html\">{}</content>\n",
                xml_escape(html)
            ));
        }
        entries.push_str("  </entry>\n");
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<feed xmlns=\"http://www.w3.org/2005/Atom\">\n  <title>{}</title>\n  <subtitle>{}</subtitle>\n  <id>{}</id>\n  <updated>{}</updated>\n  <link href=\"{}\"/>\n  <link href=\"{}\" rel=\"self\"/>\n{}</feed>\n",
        xml_escape(&meta.title),
        xml_escape(&meta.description),
        xml_escape(&meta.self_url),
        updated,
        xml_escape(&meta.site_url),
        xml_escape(&meta.self_url),
        entries
    )
}

// Items are dated, not timed: publish at midnight UTC.
fn rfc2822(date: NaiveDate) -> String {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().to_rfc2822())
        .unwrap_or_else(|| date.to_string())
}

fn rfc3339(date: NaiveDate) -> String {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| date.to_string())
}

/// Prefix site-relative URLs with the site address.
pub(crate) fn absolute(site_url: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!(
            "{}/{}",
            site_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}
