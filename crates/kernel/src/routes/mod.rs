//! HTTP route handlers.

pub mod feed;
pub mod health;
pub mod helpers;
pub mod image;
pub mod listing;
pub mod media;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(feed::router())
        .merge(listing::router())
        .merge(image::router())
        .merge(media::router(state.media_url()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
