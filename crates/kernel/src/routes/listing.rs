//! Blog listing API.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::listing::{ListingPage, PageRequest};
use crate::state::AppState;

/// Create the listing routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/blog/posts", get(list_posts))
        .route("/api/blog/tags", get(popular_tags))
}

/// Query parameters are taken as strings so bad page numbers can be corrected.
#[derive(Debug, Default, Deserialize)]
struct ListingQuery {
    tag: Option<String>,
    page: Option<String>,
}

/// GET /api/blog/posts?tag=&page=
async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> AppResult<Json<ListingPage>> {
    let feeds = state.feeds();
    let filter = feeds.blog_filter().with_tag(query.tag.as_deref())?;
    let page = PageRequest::parse(query.page.as_deref());
    let listing = feeds
        .list_feed_items(&filter, page, state.listing_page_size())
        .await?;
    Ok(Json(listing))
}

#[derive(Debug, Deserialize)]
struct TagsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TagCount {
    tag: String,
    count: u64,
}

/// GET /api/blog/tags?limit=
async fn popular_tags(
    State(state): State<AppState>,
    Query(query): Query<TagsQuery>,
) -> AppResult<Json<Vec<TagCount>>> {
    let limit = query.limit.unwrap_or(10).min(100);
    let tags = state.feeds().popular_tags(limit).await?;
    Ok(Json(
        tags.into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect(),
    ))
}
