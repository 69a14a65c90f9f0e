use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::download::{
    BatchStatusResponse, DownloadRequest, DownloadResponse, JobStatusResponse, StateCounts,
};
use crate::models::job::{BatchId, JobId};
use crate::routes::error::ApiError;

/// POST /download: Queue a batch of URLs and return their job ids.
pub async fn submit_download(
    State(state): State<AppState>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DownloadResponse>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let items = request.into_items();

    if items.len() > state.max_batch_size {
        return Err(ApiError::InvalidRequest(format!(
            "batch of {} URLs exceeds the limit of {}",
            items.len(),
            state.max_batch_size
        )));
    }
    for item in &items {
        item.validate()?;
    }

    let submission = state.dispatcher.submit(items).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadResponse {
            batch_id: submission.batch_id,
            job_ids: submission.job_ids,
        }),
    ))
}

/// GET /status/{job_id}: Current state of one job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = Uuid::parse_str(&job_id)
        .map(JobId)
        .map_err(|_| ApiError::NotFound(format!("job {} not found", job_id)))?;
    let job = state.tracker.get(job_id).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// GET /batches/{batch_id}: Every job of a batch, in submission order.
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let batch_id = Uuid::parse_str(&batch_id)
        .map(BatchId)
        .map_err(|_| ApiError::NotFound(format!("batch {} not found", batch_id)))?;
    let jobs = state.tracker.get_batch(batch_id).await?;

    let mut counts = StateCounts::default();
    for job in &jobs {
        counts.record(job.state());
    }

    Ok(Json(BatchStatusResponse {
        batch_id,
        done: counts.queued == 0 && counts.running == 0,
        counts,
        jobs: jobs.iter().map(JobStatusResponse::from).collect(),
    }))
}
