//! HTTP-facing error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::content::{ContentError, SchemaError};
use crate::listing::ListingError;
use crate::media::MediaError;

/// Errors returned by route handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl From<MediaError> for AppError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::SourceNotFound(_) => AppError::NotFound,
            MediaError::InvalidSpec { .. } => AppError::BadRequest(e.to_string()),
            MediaError::Derivation(_) | MediaError::Storage(_) => AppError::Internal(e.into()),
        }
    }
}

impl From<ListingError> for AppError {
    fn from(e: ListingError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<ContentError> for AppError {
    fn from(e: ContentError) -> Self {
        AppError::Internal(e.into())
    }
}

impl From<SchemaError> for AppError {
    fn from(e: SchemaError) -> Self {
        AppError::Internal(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        // Server-side detail goes to the log only
        let body = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "internal server error".to_string()
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status(e: impl Into<AppError>) -> StatusCode {
        e.into().into_response().status()
    }

    #[test]
    fn domain_errors_map_to_status_codes() {
        assert_eq!(status(MediaError::SourceNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(MediaError::InvalidSpec {
                spec: "fill-0x0".to_string(),
                reason: "zero".to_string(),
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(MediaError::Storage("disk full".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ListingError::InvalidTag("X".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(AppError::Forbidden), StatusCode::FORBIDDEN);
    }
}
