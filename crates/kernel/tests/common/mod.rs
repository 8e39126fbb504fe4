#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Every test builds its own application over in-memory stores and a
//! temporary media directory, using the real kernel services and routes.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use folio_kernel::config::Config;
use folio_kernel::listing::{BlogPage, MemoryPageStore};
use folio_kernel::media::{
    FileStorage, LocalFileStorage, MemoryRenditionIndex, MemorySourceStore, RenditionEngine,
};
use folio_kernel::routes;
use folio_kernel::state::{AppState, Stores};
use folio_test_utils::TestPage;

pub const IMAGE_KEY: &str = "integration-test-key";

/// Convert a fixture into a kernel page.
pub fn blog_page(page: &TestPage) -> BlogPage {
    serde_json::from_value(page.to_json()).expect("fixture is a valid BlogPage")
}

/// Rendition engine over in-memory records and a temporary media directory.
pub fn engine(dir: &TempDir) -> RenditionEngine {
    engine_with_storage(Arc::new(LocalFileStorage::new(dir.path(), "/media")))
}

pub fn engine_with_storage(storage: Arc<dyn FileStorage>) -> RenditionEngine {
    RenditionEngine::new(
        Arc::new(MemorySourceStore::new()),
        Arc::new(MemoryRenditionIndex::new()),
        storage,
        4,
    )
}

/// Test application wrapper using the real routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub media: TempDir,
}

impl TestApp {
    pub fn new(pages: Vec<TestPage>) -> Self {
        Self::with_config(pages, Config {
            site_url: "https://example.com".to_string(),
            image_serve_key: Some(IMAGE_KEY.to_string()),
            ..Config::default()
        })
    }

    pub fn with_config(pages: Vec<TestPage>, config: Config) -> Self {
        let media = tempfile::tempdir().expect("create media dir");
        let stores = Stores {
            db: None,
            sources: Arc::new(MemorySourceStore::new()),
            renditions: Arc::new(MemoryRenditionIndex::new()),
            pages: Arc::new(MemoryPageStore::with_pages(pages.iter().map(blog_page))),
            files: Arc::new(LocalFileStorage::new(media.path(), config.media_url.clone())),
        };
        let state = AppState::assemble(&config, stores).expect("assemble state");
        Self {
            router: routes::app(state.clone()),
            state,
            media,
        }
    }

    /// Send a GET request and collect the response.
    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        TestResponse {
            status,
            content_type,
            body,
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response is JSON")
    }
}
