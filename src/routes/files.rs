use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::app_state::AppState;
use crate::routes::error::ApiError;
use crate::services::storage::StoredFile;

/// GET /files/{name}: Stream a completed job's artifact.
pub async fn download_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    // Only names recorded by completed jobs are served.
    state.tracker.find_completed_by_name(&name).await?;
    let (stream, len) = state.storage.open(&name).await?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&name).to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// GET /api/downloads: Files currently in the download directory.
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<StoredFile>>, ApiError> {
    Ok(Json(state.storage.list().await?))
}

/// DELETE /api/downloads/{name}
pub async fn delete_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.storage.delete(&name).await?;
    tracing::info!(file = %name, "Deleted download");
    Ok(Json(json!({ "success": true })))
}

/// POST /api/downloads/clear: Delete every stored file.
pub async fn clear_files(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.storage.clear().await?;
    tracing::info!(deleted, "Cleared download directory");
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

fn content_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("opus") | Some("ogg") => "audio/ogg",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
