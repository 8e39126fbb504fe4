//! Stored media serving.
//!
//! Originals and published renditions are served read-only from the
//! configured media URL.

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::warn;

use crate::state::AppState;

/// Create the media router, mounted under `media_url` (e.g. `/media`).
pub fn router(media_url: &str) -> Router<AppState> {
    let prefix = media_url.trim_end_matches('/');
    if !prefix.starts_with('/') {
        // Media is served from another host.
        return Router::new();
    }
    Router::new().route(&format!("{prefix}/{{*path}}"), get(serve_media))
}

/// GET {media_url}/{path}
async fn serve_media(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let path = path.trim_start_matches('/');
    // Rejects traversal and in-flight temporary files
    if path.contains('\0') || path.split('/').any(|c| c.is_empty() || c.starts_with('.')) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let uri = format!("local://{path}");
    match state.files().read(&uri).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, mime_from_path(path)),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            Body::from(bytes),
        )
            .into_response(),
        Err(e) => {
            if state.files().exists(&uri).await.unwrap_or(false) {
                warn!(uri = %uri, error = %e, "failed to read media file");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
    }
}

fn mime_from_path(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
