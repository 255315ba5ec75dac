use super::AppState;
use crate::error::TransformError;
use crate::transform::{self, RemovalOptions};
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::Json;
use serde::Serialize;

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Multipart field the upload page sends the image in
const UPLOAD_FIELD: &str = "file";

/// Suggested download name for results
const RESULT_FILENAME: &str = "removed_bg.png";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET / - the upload page
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /api/health - liveness
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// POST /api/remove-background - cut the background out of an uploaded image
///
/// Accepts `multipart/form-data` with the image in the `file` field and
/// answers with a PNG attachment. Any failure is a 400 with a JSON `detail`.
pub async fn remove_background(
    State(state): State<AppState>,
    options: Result<Query<RemovalOptions>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, TransformError> {
    let Query(options) = options.map_err(|e| TransformError::InvalidQuery(e.body_text()))?;
    let multipart = multipart.map_err(|e| TransformError::Multipart(e.body_text()))?;

    let data = read_upload(multipart).await?;
    tracing::debug!("Received upload of {} bytes", data.len());

    let model = state.model.clone();
    let png = tokio::task::spawn_blocking(move || {
        transform::remove_background(model.as_ref(), &data, options)
    })
    .await
    .map_err(|e| TransformError::Worker(e.to_string()))??;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", RESULT_FILENAME),
            ),
        ],
        png,
    ))
}

/// Pick the uploaded image out of the form
///
/// Prefers the `file` field, then the first field with a filename, then the
/// first field of any kind.
async fn read_upload(mut multipart: Multipart) -> Result<Bytes, TransformError> {
    let mut fallback: Option<(bool, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TransformError::Multipart(e.body_text()))?
    {
        let is_upload_field = field.name() == Some(UPLOAD_FIELD);
        let has_filename = field.file_name().is_some();
        let data = field
            .bytes()
            .await
            .map_err(|e| TransformError::Multipart(e.body_text()))?;

        if is_upload_field {
            return Ok(data);
        }

        match fallback {
            None => fallback = Some((has_filename, data)),
            Some((false, _)) if has_filename => fallback = Some((true, data)),
            _ => {}
        }
    }

    fallback
        .map(|(_, data)| data)
        .ok_or(TransformError::MissingFile)
}
