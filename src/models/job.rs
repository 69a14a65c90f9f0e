use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

/// Identifier of a single download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex characters, used to keep output names unique.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier grouping the jobs of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the job should produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaMode {
    #[default]
    Audio,
    Video,
    #[serde(alias = "audio+video")]
    #[strum(to_string = "both", serialize = "audio+video")]
    Both,
}

/// Quality presets offered to clients.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum QualityPreset {
    /// 720p H.264/AAC re-encode for in-car players.
    #[serde(rename = "minivan")]
    #[strum(serialize = "minivan")]
    Minivan,
    #[serde(rename = "1080p")]
    #[strum(serialize = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    #[strum(serialize = "720p")]
    P720,
    #[serde(rename = "480p")]
    #[strum(serialize = "480p")]
    P480,
    #[default]
    #[serde(rename = "best")]
    #[strum(serialize = "best")]
    Best,
    #[serde(rename = "worst")]
    #[strum(serialize = "worst")]
    Worst,
}

impl QualityPreset {
    /// Human-readable label for preset pickers.
    pub fn label(&self) -> &'static str {
        match self {
            QualityPreset::Minivan => "Minivan (720p H.264 AAC)",
            QualityPreset::P1080 => "1080p HD",
            QualityPreset::P720 => "720p",
            QualityPreset::P480 => "480p (Low Quality)",
            QualityPreset::Best => "Best Available",
            QualityPreset::Worst => "Worst Available",
        }
    }

    /// Height cap applied to video stream selection, if any.
    pub fn max_height(&self) -> Option<u32> {
        match self {
            QualityPreset::Minivan | QualityPreset::P720 => Some(720),
            QualityPreset::P1080 => Some(1080),
            QualityPreset::P480 => Some(480),
            QualityPreset::Best | QualityPreset::Worst => None,
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Failure taxonomy recorded on failed jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    ExtractionFailed,
    UnsupportedFormat,
    Timeout,
    StorageError,
    InternalError,
}

/// Structured failure reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Where a completed job's artifact lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobOutput {
    pub path: PathBuf,
    pub file_name: String,
}

/// A single download job.
///
/// Fields that depend on the state (`output`, `error`, timestamps) are only
/// changed through the transition methods, which keep them consistent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub batch_id: BatchId,
    pub url: String,
    pub mode: MediaMode,
    pub quality: QualityPreset,
    state: JobState,
    progress: u8,
    output: Option<JobOutput>,
    error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobState,
    pub to: JobState,
}

impl JobRecord {
    pub fn new(batch_id: BatchId, url: String, mode: MediaMode, quality: QualityPreset) -> Self {
        Self {
            id: JobId::new(),
            batch_id,
            url,
            mode,
            quality,
            state: JobState::Queued,
            progress: 0,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn output(&self) -> Option<&JobOutput> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    fn check(&self, to: JobState) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.state, to),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
        );
        if allowed {
            Ok(())
        } else {
            Err(TransitionError {
                id: self.id,
                from: self.state,
                to,
            })
        }
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(JobState::Running)?;
        self.state = JobState::Running;
        self.started_at = Some(at);
        Ok(())
    }

    pub fn complete(&mut self, output: JobOutput, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(JobState::Completed)?;
        self.state = JobState::Completed;
        self.progress = 100;
        self.output = Some(output);
        self.finished_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, error: JobError, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(JobState::Failed)?;
        self.state = JobState::Failed;
        self.error = Some(error);
        self.finished_at = Some(at);
        Ok(())
    }

    /// Progress is advisory and only moves while the job is running.
    pub fn set_progress(&mut self, percent: u8) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.progress = percent.min(100);
        true
    }
}
