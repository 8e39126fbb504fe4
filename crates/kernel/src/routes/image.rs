//! Dynamic image routes.
//!
//! Serves a rendition of a source for a signed filter, deriving it on first
//! request.

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::media::RenditionSpec;
use crate::state::AppState;

/// Create the dynamic image routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/images/{signature}/{source_id}/{filter}/", get(serve_rendition))
}

/// GET /images/{signature}/{source_id}/{filter}/
async fn serve_rendition(
    State(state): State<AppState>,
    Path((signature, source_id, filter)): Path<(String, Uuid, String)>,
) -> AppResult<Response> {
    let Some(signer) = state.signer() else {
        return Err(AppError::NotFound);
    };
    if !signer.verify(&signature, source_id, &filter) {
        debug!(source_id = %source_id, filter = %filter, "rejected image signature");
        return Err(AppError::Forbidden);
    }

    let spec = RenditionSpec::parse(&filter)?;
    let rendition = state.engine().get_or_create(source_id, &spec).await?;
    let bytes = state.engine().read_artifact(&rendition).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, rendition.format.content_type()),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        Body::from(bytes),
    )
        .into_response())
}
