//! Custom error types for the bookmarks service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use backend::BackendError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::view::ViewError;

/// Custom error type for the bookmarks service
#[derive(Error, Debug)]
pub enum ApiError {
    /// No signed-in user
    #[error("Unauthorized")]
    Unauthorized,

    /// The backend refused to act for the current user
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The backend could not be reached or failed
    #[error("Backend error: {0}")]
    BadGateway(String),

    /// Internal server error
    #[error("Internal server error")]
    InternalServerError,
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthenticated => ApiError::Unauthorized,
            BackendError::PermissionDenied(msg) => ApiError::Forbidden(msg),
            BackendError::UnsupportedProvider(_) | BackendError::InvalidSignInState => {
                ApiError::BadRequest(err.to_string())
            }
            other => {
                error!("Backend request failed: {}", other);
                ApiError::BadGateway(other.to_string())
            }
        }
    }
}

impl From<ViewError> for ApiError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::NotSignedIn => ApiError::Unauthorized,
            ViewError::Backend(e) => e.into(),
            ViewError::Unmounted => {
                error!("Request reached an unmounted bookmark view");
                ApiError::InternalServerError
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BadGateway(_) => (StatusCode::BAD_GATEWAY, "Backend error".to_string()),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
