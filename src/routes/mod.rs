pub mod download;
pub mod error;
pub mod files;
pub mod health;
pub mod metrics;
pub mod presets;

use axum::response::Html;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::app_state::AppState;

/// Application routes, without middleware or the metrics endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Static UI (embedded at compile time)
        .route("/", get(|| async { Html(include_str!("../../static/index.html")) }))
        .route("/health", get(health::health_check))
        .route("/download", post(download::submit_download))
        .route("/status/{job_id}", get(download::get_job_status))
        .route("/batches/{batch_id}", get(download::get_batch_status))
        .route("/files/{name}", get(files::download_file))
        .route("/api/quality-presets", get(presets::list_quality_presets))
        .route("/api/video-info", post(presets::video_info))
        .route("/api/downloads", get(files::list_files))
        .route("/api/downloads/clear", post(files::clear_files))
        .route("/api/downloads/{name}", delete(files::delete_file))
        .with_state(state)
}
