//! Boundary to the media extraction tool.
//!
//! The worker pool only sees the [`Extractor`] trait. [`YtDlpExtractor`]
//! drives the external `yt-dlp` binary (and `ffmpeg` for the minivan
//! re-encode); tests substitute their own implementations.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::models::job::{ErrorKind, JobId, MediaMode, QualityPreset};
use crate::services::tracker::StatusTracker;

/// Prefix of the progress lines requested from yt-dlp.
const PROGRESS_PREFIX: &str = "[progress]";

/// Number of formats of each kind reported by `probe`.
const MAX_LISTED_FORMATS: usize = 5;

/// What to fetch for one job.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub job_id: JobId,
    pub url: String,
    pub mode: MediaMode,
    pub quality: QualityPreset,
    /// Empty per-job directory the produced file must be written into.
    pub staging_dir: PathBuf,
}

/// Forwards progress percentages of a running job to the status tracker.
#[derive(Clone)]
pub struct ProgressReporter {
    tracker: Arc<StatusTracker>,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn new(tracker: Arc<StatusTracker>, job_id: JobId) -> Self {
        Self { tracker, job_id }
    }

    pub async fn report(&self, percent: u8) {
        self.tracker.set_progress(self.job_id, percent).await;
    }
}

/// Metadata returned by a probe, without downloading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    pub title: String,
    pub duration: Option<f64>,
    pub url: String,
    pub formats: FormatSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatSummary {
    pub video_formats: Vec<VideoFormat>,
    pub audio_formats: Vec<AudioFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoFormat {
    pub format_id: String,
    pub resolution: String,
    pub fps: Option<f64>,
    pub ext: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioFormat {
    pub format_id: String,
    pub abr: Option<f64>,
    pub ext: Option<String>,
}

/// Capability that turns a URL into a file on disk.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Produce the requested media inside `request.staging_dir` and return
    /// the path of the produced file. Must stop promptly once `cancel` fires.
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: CancellationToken,
        progress: ProgressReporter,
    ) -> Result<PathBuf, ExtractError>;

    /// Look up title, duration and available formats.
    async fn probe(&self, url: &str) -> Result<MediaInfo, ExtractError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported URL: {0}")]
    InvalidUrl(String),

    #[error("source unavailable: {0}")]
    Source(String),

    #[error("format not available: {0}")]
    UnsupportedFormat(String),

    #[error("extraction cancelled")]
    Cancelled,

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected tool output: {0}")]
    Output(String),
}

impl ExtractError {
    /// Job error category for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            ExtractError::Source(_) => ErrorKind::ExtractionFailed,
            ExtractError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            ExtractError::Cancelled => ErrorKind::Timeout,
            ExtractError::Spawn { .. } | ExtractError::Io(_) | ExtractError::Output(_) => {
                ErrorKind::InternalError
            }
        }
    }
}

/// [`Extractor`] backed by the `yt-dlp` command line tool.
pub struct YtDlpExtractor {
    binary: PathBuf,
    ffmpeg: PathBuf,
    rate_limit: u64,
    socket_timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(binary: PathBuf, ffmpeg: PathBuf, rate_limit: u64, socket_timeout: Duration) -> Self {
        Self {
            binary,
            ffmpeg,
            rate_limit,
            socket_timeout,
        }
    }

    /// Whether the configured yt-dlp binary can be found.
    pub fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    fn download_args(&self, request: &ExtractRequest) -> Result<Vec<String>, ExtractError> {
        let template = request.staging_dir.join("%(title)s.%(ext)s");
        let mut args = vec![
            "--no-playlist".to_string(),
            "--restrict-filenames".to_string(),
            "--newline".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            format!("download:{} %(progress._percent_str)s", PROGRESS_PREFIX),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--limit-rate".to_string(),
            self.rate_limit.to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout.as_secs().to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
        ];
        args.extend(format_args(request.mode, request.quality)?);
        args.push("--".to_string());
        args.push(request.url.clone());
        Ok(args)
    }

    /// Minivan re-encode. A failure keeps the original download.
    async fn reencode_minivan(&self, job_id: JobId, input: &Path, mode: MediaMode) -> PathBuf {
        let temp = input.with_extension("reencode.mp4");
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-i")
            .arg(input)
            .args(["-vf", "scale=1280:720:force_original_aspect_ratio=1"])
            .args(["-c:v", "libx264", "-b:v", "706k"]);
        if mode == MediaMode::Video {
            cmd.arg("-an");
        } else {
            cmd.args(["-c:a", "aac", "-b:a", "192k"]);
        }
        cmd.arg("-y").arg(&temp).kill_on_drop(true);

        match cmd.output().await {
            Ok(output) if output.status.success() => {
                match tokio::fs::rename(&temp, input).await {
                    Ok(()) => tracing::info!(job_id = %job_id, "Minivan re-encode complete"),
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Could not replace file with re-encode")
                    }
                }
            }
            Ok(output) => {
                tracing::warn!(
                    job_id = %job_id,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "ffmpeg re-encode failed, keeping original download"
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not run ffmpeg, keeping original download");
            }
        }
        input.to_path_buf()
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: CancellationToken,
        progress: ProgressReporter,
    ) -> Result<PathBuf, ExtractError> {
        let args = self.download_args(request)?;
        tracing::debug!(job_id = %request.job_id, ?args, "Running yt-dlp");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractError::Spawn {
                tool: self.binary.display().to_string(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Output("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::Output("stderr not captured".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut produced = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(ExtractError::Cancelled);
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(percent) = parse_progress_line(&line) {
                            progress.report(percent).await;
                        } else if !line.trim().is_empty() {
                            produced = Some(PathBuf::from(line.trim()));
                        }
                    }
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ExtractError::Cancelled);
            }
            status = child.wait() => status?,
        };
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_failure(&stderr));
        }

        let produced = produced
            .filter(|p| p.starts_with(&request.staging_dir))
            .ok_or_else(|| ExtractError::Output("yt-dlp did not report an output file".to_string()))?;

        if request.quality == QualityPreset::Minivan {
            return Ok(self
                .reencode_minivan(request.job_id, &produced, request.mode)
                .await);
        }
        Ok(produced)
    }

    async fn probe(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        let output = Command::new(&self.binary)
            .args(["-J", "--no-playlist", "--no-warnings", "--"])
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExtractError::Spawn {
                tool: self.binary.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        let info: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractError::Output(format!("invalid yt-dlp JSON: {}", e)))?;
        Ok(media_info_from_json(url, &info))
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// yt-dlp format selection and post-processing flags.
fn format_args(mode: MediaMode, quality: QualityPreset) -> Result<Vec<String>, ExtractError> {
    let height = quality
        .max_height()
        .map(|h| format!("[height<={}]", h))
        .unwrap_or_default();
    let worst = quality == QualityPreset::Worst;

    let args = match mode {
        MediaMode::Audio => {
            if quality == QualityPreset::Minivan {
                return Err(ExtractError::UnsupportedFormat(
                    "the minivan preset needs a video stream".to_string(),
                ));
            }
            let (selector, audio_quality) = if worst {
                ("worstaudio/worst", "9")
            } else {
                ("bestaudio/best", "192K")
            };
            vec![
                "-f".to_string(),
                selector.to_string(),
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--audio-quality".to_string(),
                audio_quality.to_string(),
            ]
        }
        MediaMode::Video => {
            let selector = if worst {
                "worstvideo/worst".to_string()
            } else {
                format!("bestvideo{}/best{}", height, height)
            };
            vec!["-f".to_string(), selector]
        }
        MediaMode::Both => {
            let selector = if worst {
                "worst".to_string()
            } else {
                format!(
                    "bestvideo[ext=mp4]{h}+bestaudio[ext=m4a]/best[ext=mp4]{h}/best{h}/best",
                    h = height
                )
            };
            vec![
                "-f".to_string(),
                selector,
                "--merge-output-format".to_string(),
                "mp4".to_string(),
            ]
        }
    };
    Ok(args)
}

/// Parse a `[progress]  42.3%` line into a whole percentage.
pub fn parse_progress_line(line: &str) -> Option<u8> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let value = rest.trim().trim_end_matches('%').trim();
    let percent: f64 = value.parse().ok()?;
    if !percent.is_finite() {
        return None;
    }
    Some(percent.clamp(0.0, 100.0) as u8)
}

/// Map yt-dlp's stderr to an error category.
pub fn classify_failure(stderr: &str) -> ExtractError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("yt-dlp exited with an error")
        .trim()
        .to_string();

    let lower = message.to_lowercase();
    if lower.contains("unsupported url") || lower.contains("is not a valid url") {
        ExtractError::InvalidUrl(message)
    } else if lower.contains("requested format is not available") {
        ExtractError::UnsupportedFormat(message)
    } else {
        ExtractError::Source(message)
    }
}

/// Build a [`MediaInfo`] from `yt-dlp -J` output.
///
/// Keeps the first format per resolution (highest first) and per audio
/// bitrate, at most five of each.
pub fn media_info_from_json(url: &str, info: &serde_json::Value) -> MediaInfo {
    let mut video = Vec::new();
    let mut audio = Vec::new();
    let mut seen_heights = HashSet::new();
    let mut seen_abr = HashSet::new();

    let formats = info
        .get("formats")
        .and_then(|f| f.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for fmt in formats {
        let format_id = fmt
            .get("format_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let ext = fmt.get("ext").and_then(|v| v.as_str()).map(str::to_string);
        let vcodec = fmt.get("vcodec").and_then(|v| v.as_str());
        let acodec = fmt.get("acodec").and_then(|v| v.as_str());
        let height = fmt.get("height").and_then(|v| v.as_u64());

        match (vcodec, height) {
            (Some(v), Some(h)) if v != "none" => {
                if seen_heights.insert(h) {
                    video.push((
                        h,
                        VideoFormat {
                            format_id,
                            resolution: format!("{}p", h),
                            fps: fmt.get("fps").and_then(|v| v.as_f64()),
                            ext,
                        },
                    ));
                }
            }
            _ if acodec.is_some_and(|a| a != "none") => {
                let abr = fmt.get("abr").and_then(|v| v.as_f64());
                let key = abr.map(|a| a.to_bits());
                if seen_abr.insert(key) {
                    audio.push(AudioFormat { format_id, abr, ext });
                }
            }
            _ => {}
        }
    }

    video.sort_by(|a, b| b.0.cmp(&a.0));

    MediaInfo {
        title: info
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string(),
        duration: info.get("duration").and_then(|v| v.as_f64()),
        url: url.to_string(),
        formats: FormatSummary {
            video_formats: video
                .into_iter()
                .take(MAX_LISTED_FORMATS)
                .map(|(_, f)| f)
                .collect(),
            audio_formats: audio.into_iter().take(MAX_LISTED_FORMATS).collect(),
        },
    }
}
