use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use proxops_common::{api::ErrorBody, error::Error};
use tracing::error;

/// Edge-of-the-world error type: every category maps to 500 except the
/// request-shape failures the client can fix.
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    BadRequest(String),
    UnsupportedMediaType(String),
    Unauthorized,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Core(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(r) => {
                ApiError::UnsupportedMediaType(r.body_text())
            }
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            ApiError::Core(e) => {
                error!("request failed: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(e.to_string()),
                )
            }
            ApiError::BadRequest(details) => (
                StatusCode::BAD_REQUEST,
                "Invalid request body".to_string(),
                Some(details),
            ),
            ApiError::UnsupportedMediaType(details) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Unsupported media type".to_string(),
                Some(details),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized".to_string(),
                None,
            ),
        };

        (status, Json(ErrorBody { message, details })).into_response()
    }
}
