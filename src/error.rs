use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Every way a background-removal request can fail
///
/// All variants are reported to the client the same way: HTTP 400 with the
/// message as `detail`.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Image data is empty")]
    EmptyUpload,

    #[error("No file field in multipart upload")]
    MissingFile,

    #[error("Invalid multipart upload: {0}")]
    Multipart(String),

    #[error("Invalid query parameters: {0}")]
    InvalidQuery(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Background removal failed: {0}")]
    Segmentation(String),

    #[error("Failed to encode PNG: {0}")]
    Encode(String),

    #[error("Background removal worker failed: {0}")]
    Worker(String),
}

/// JSON body of an error response
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub detail: String,
}

impl IntoResponse for TransformError {
    fn into_response(self) -> Response {
        let detail = self.to_string();
        tracing::warn!("Background removal rejected: {}", detail);
        (StatusCode::BAD_REQUEST, Json(ErrorDetail { detail })).into_response()
    }
}
