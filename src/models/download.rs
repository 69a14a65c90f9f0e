use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{
    BatchId, JobError, JobId, JobRecord, JobState, MediaMode, QualityPreset,
};

/// One URL with its output options.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DownloadItem {
    #[garde(length(min = 1, max = 2048))]
    pub url: String,

    #[serde(default)]
    #[garde(skip)]
    pub mode: MediaMode,

    #[serde(default)]
    #[garde(skip)]
    pub quality: QualityPreset,
}

/// Body of `POST /download`.
///
/// Accepts either a list of items or the form shape where every URL shares
/// one mode and quality.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DownloadRequest {
    Items(Vec<DownloadItem>),
    Shared {
        urls: Vec<String>,
        #[serde(default, alias = "type")]
        mode: MediaMode,
        #[serde(default)]
        quality: QualityPreset,
    },
}

impl DownloadRequest {
    pub fn into_items(self) -> Vec<DownloadItem> {
        match self {
            DownloadRequest::Items(items) => items,
            DownloadRequest::Shared { urls, mode, quality } => urls
                .into_iter()
                .map(|url| DownloadItem { url, mode, quality })
                .collect(),
        }
    }
}

/// Response after a batch is accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub batch_id: BatchId,
    pub job_ids: Vec<JobId>,
}

/// Public view of a job, as returned by the status endpoints.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub batch_id: BatchId,
    pub url: String,
    pub mode: MediaMode,
    pub quality: QualityPreset,
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobStatusResponse {
    fn from(job: &JobRecord) -> Self {
        let file_name = job.output().map(|o| o.file_name.clone());
        Self {
            job_id: job.id,
            batch_id: job.batch_id,
            url: job.url.clone(),
            mode: job.mode,
            quality: job.quality,
            state: job.state(),
            progress: job.progress(),
            download_url: file_name.as_ref().map(|name| format!("/files/{}", name)),
            file_name,
            error: job.error().cloned(),
            created_at: job.created_at,
            started_at: job.started_at(),
            finished_at: job.finished_at(),
        }
    }
}

/// Per-state totals.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Queued => self.queued += 1,
            JobState::Running => self.running += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed
    }
}

/// Response for `GET /batches/{batch_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub batch_id: BatchId,
    pub counts: StateCounts,
    pub done: bool,
    pub jobs: Vec<JobStatusResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QualityPresetInfo {
    pub id: String,
    pub name: String,
}

/// Body of `POST /api/video-info`.
#[derive(Debug, Deserialize, Validate)]
pub struct VideoInfoRequest {
    #[garde(length(min = 1, max = 2048))]
    pub url: String,
}
