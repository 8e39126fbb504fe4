#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Listing and feed integration tests over in-memory page stores.

use std::sync::Arc;

use folio_kernel::content::BlockTypeRegistry;
use folio_kernel::listing::{
    FeedFormat, FeedKind, FeedService, FeedSettings, ListingFilter, MemoryPageStore, PageRequest,
};
use folio_kernel::media::RenditionSpec;
use folio_test_utils::{TestPage, assert, stream, test_page, test_png};

mod common;
use common::{blog_page, engine};

fn service(pages: &[TestPage]) -> FeedService {
    FeedService::new(
        Arc::new(MemoryPageStore::with_pages(pages.iter().map(blog_page))),
        BlockTypeRegistry::standard().unwrap(),
        FeedSettings {
            site_url: "https://example.com".to_string(),
            ..FeedSettings::default()
        },
    )
}

fn ten_days() -> Vec<TestPage> {
    (1..=10).map(test_page).collect()
}

fn titles(listing: &folio_kernel::listing::ListingPage) -> Vec<String> {
    listing.items.iter().map(|i| i.title.clone()).collect()
}

#[tokio::test]
async fn pagination_is_date_descending_and_clamped() {
    let feeds = service(&ten_days());
    let filter = ListingFilter::new();

    let first = feeds
        .list_feed_items(&filter, PageRequest::Number(1), 4)
        .await
        .unwrap();
    assert_eq!(titles(&first), ["Post 10", "Post 9", "Post 8", "Post 7"]);
    assert_eq!(first.page_info.total_pages, 3);
    assert!(first.page_info.has_next);
    assert!(!first.page_info.has_previous);

    let last = feeds
        .list_feed_items(&filter, PageRequest::Number(3), 4)
        .await
        .unwrap();
    assert_eq!(titles(&last), ["Post 2", "Post 1"]);
    assert!(!last.page_info.has_next);

    let beyond = feeds
        .list_feed_items(&filter, PageRequest::Number(99), 4)
        .await
        .unwrap();
    assert_eq!(beyond.page_info.page, 3);
    assert_eq!(titles(&beyond), titles(&last));

    let garbage = feeds
        .list_feed_items(&filter, PageRequest::parse(Some("abc")), 4)
        .await
        .unwrap();
    assert_eq!(garbage.page_info.page, 1);
}

#[tokio::test]
async fn drafts_are_never_listed() {
    let mut pages = ten_days();
    pages[9] = test_page(10).unpublished();
    let feeds = service(&pages);

    let listing = feeds
        .list_feed_items(&ListingFilter::new(), PageRequest::First, 4)
        .await
        .unwrap();
    assert_eq!(listing.page_info.total, 9);
    assert_eq!(listing.items[0].title, "Post 9");
}

#[tokio::test]
async fn tag_filter_selects_exactly_tagged_items() {
    let feeds = service(&[
        test_page(1).tagged(&["blog"]),
        test_page(2).tagged(&["blog", "legacy"]),
    ]);
    let filter = ListingFilter::new().with_tag(Some("legacy")).unwrap();

    let listing = feeds
        .list_feed_items(&filter, PageRequest::First, 10)
        .await
        .unwrap();
    assert_eq!(titles(&listing), ["Post 2"]);
}

#[tokio::test]
async fn same_day_posts_have_stable_order() {
    let date = chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let pages: Vec<TestPage> = (1..=6).map(|n| test_page(n).with_date(date)).collect();
    let feeds = service(&pages);

    let mut seen = Vec::new();
    for page in 1..=3 {
        let listing = feeds
            .list_feed_items(&ListingFilter::new(), PageRequest::Number(page), 2)
            .await
            .unwrap();
        seen.extend(listing.items.iter().map(|i| i.id));
    }
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
}

#[tokio::test]
async fn feeds_use_canonical_url_when_present() {
    let feeds = service(&[
        test_page(1),
        test_page(2).with_canonical_url("https://medium.example/original"),
    ]);

    for format in [FeedFormat::Rss, FeedFormat::Atom] {
        let xml = feeds.feed_document(FeedKind::Blog, format).await.unwrap();
        assert::contains(&xml, "https://medium.example/original");
        assert::contains(&xml, "https://example.com/blog/post-1/");
        assert::not_contains(&xml, "https://example.com/blog/post-2/");
        assert::ordered(&xml, "Post 2", "Post 1");
    }
}

#[tokio::test]
async fn feed_items_carry_summary_content_and_image() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let image = engine
        .add_source("Hero", "hero.png", &test_png(1600, 900), None, None)
        .await
        .unwrap();

    let body = stream::document(vec![
        stream::heading("Heading"),
        stream::paragraph("<p>First <em>paragraph</em> text.</p>"),
    ]);
    let pages = [
        test_page(1).with_body(body).with_feed_image(image.id),
        test_page(2).with_feed_image(uuid::Uuid::now_v7()),
    ];
    let feeds = service(&pages)
        .with_renderers(Arc::new(folio_kernel::content::RendererRegistry::html(
            folio_kernel::media::UrlSigner::new(b"feed").unwrap(),
        )))
        .with_engine(engine.clone());

    let item = feeds.project(&blog_page(&pages[0]), true).await;
    assert_eq!(item.summary, "First paragraph text.");
    let rendition = item.feed_image.unwrap();
    assert_eq!(rendition.spec_key, RenditionSpec::parse("fill-1200x630").unwrap().spec_key());
    assert_eq!((rendition.width, rendition.height), (1200, 630));
    assert::contains(&item.content_html.unwrap(), "<h2>Heading</h2>");

    // A missing image is logged and skipped
    let missing = feeds.project(&blog_page(&pages[1]), true).await;
    assert!(missing.feed_image.is_none());

    let rss = feeds.feed_document(FeedKind::Blog, FeedFormat::Rss).await.unwrap();
    assert::contains(&rss, "<enclosure url=\"https://example.com/media/renditions/");
}

#[tokio::test]
async fn feed_content_falls_back_to_library_credit() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let image = engine
        .add_source("Harbour", "harbour.png", &test_png(64, 48), None, Some("Grace Hopper"))
        .await
        .unwrap();

    let body = stream::document(vec![stream::aligned_image(image.id, "left", "Harbour at dawn")]);
    let pages = [test_page(1).with_body(body)];
    let feeds = service(&pages)
        .with_renderers(Arc::new(folio_kernel::content::RendererRegistry::html(
            folio_kernel::media::UrlSigner::new(b"feed").unwrap(),
        )))
        .with_engine(engine);

    let item = feeds.project(&blog_page(&pages[0]), true).await;
    let html = item.content_html.unwrap();
    assert::contains(&html, "Harbour at dawn");
    assert::contains(&html, "<span class=\"attribution\">Grace Hopper</span>");
}

#[tokio::test]
async fn legacy_feed_excludes_hidden_posts() {
    let feeds = service(&[
        test_page(1).tagged(&["planet-drupal"]),
        test_page(2).tagged(&["planet-drupal", "planet-drupal-hidden"]),
        test_page(3).tagged(&["wagtail"]),
    ]);

    let xml = feeds.feed_document(FeedKind::Legacy, FeedFormat::Rss).await.unwrap();
    assert::contains(&xml, "<title>Post 1</title>");
    assert::not_contains(&xml, "<title>Post 2</title>");
    assert::not_contains(&xml, "<title>Post 3</title>");
}
