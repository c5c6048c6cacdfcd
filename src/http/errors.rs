use crate::errors::HttpError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub(super) enum WebError {
    #[error("HTTP error: {0}")]
    Http(HttpError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::Http(err) => {
                let (status, code) = match &err {
                    HttpError::RequestValidation { .. } => {
                        (StatusCode::BAD_REQUEST, "RequestValidation")
                    }
                    HttpError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "BadRequest"),
                    HttpError::NotFound { .. } => (StatusCode::NOT_FOUND, "NotFound"),
                    HttpError::Conflict { .. } => (StatusCode::CONFLICT, "Conflict"),
                    HttpError::Unhandled { details } => {
                        tracing::error!(details = ?details, "Unhandled web error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
                    }
                };
                let body = json!({
                    "error": code,
                    "message": err.to_string(),
                });
                (status, Json(body)).into_response()
            }
        }
    }
}
