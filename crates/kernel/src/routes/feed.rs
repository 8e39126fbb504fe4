//! Syndication feed routes.

use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::listing::{FeedFormat, FeedKind};
use crate::state::AppState;

/// Create the feed routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(FeedKind::Blog.path(), get(blog_feed))
        .route(FeedKind::Legacy.path(), get(legacy_feed))
}

#[derive(Debug, Default, Deserialize)]
struct FeedQuery {
    #[serde(default)]
    format: Option<FeedFormat>,
}

/// GET /blog/feed/
async fn blog_feed(State(state): State<AppState>, Query(query): Query<FeedQuery>) -> AppResult<Response> {
    feed(&state, FeedKind::Blog, query.format.unwrap_or_default()).await
}

/// GET /blog/feed/planet_drupal/
async fn legacy_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> AppResult<Response> {
    feed(&state, FeedKind::Legacy, query.format.unwrap_or_default()).await
}

async fn feed(state: &AppState, kind: FeedKind, format: FeedFormat) -> AppResult<Response> {
    let document = state.feeds().feed_document(kind, format).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, format.content_type())],
        document,
    )
        .into_response())
}
