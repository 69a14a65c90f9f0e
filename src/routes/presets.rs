use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use garde::Validate;
use strum::IntoEnumIterator;

use crate::app_state::AppState;
use crate::models::download::{QualityPresetInfo, VideoInfoRequest};
use crate::models::job::QualityPreset;
use crate::routes::error::ApiError;
use crate::services::extractor::MediaInfo;

/// GET /api/quality-presets
pub async fn list_quality_presets() -> Json<Vec<QualityPresetInfo>> {
    Json(
        QualityPreset::iter()
            .map(|p| QualityPresetInfo {
                id: p.to_string(),
                name: p.label().to_string(),
            })
            .collect(),
    )
}

/// POST /api/video-info: Probe a URL without downloading it.
pub async fn video_info(
    State(state): State<AppState>,
    body: Result<Json<VideoInfoRequest>, JsonRejection>,
) -> Result<Json<MediaInfo>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    request.validate()?;

    let info = state.extractor.probe(request.url.trim()).await?;
    Ok(Json(info))
}
