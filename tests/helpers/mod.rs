//! Shared test helpers: a scripted extractor and application builders
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use media_fetch::app_state::AppState;
use media_fetch::models::download::DownloadItem;
use media_fetch::models::job::{JobId, JobRecord, MediaMode, QualityPreset};
use media_fetch::services::extractor::{
    ExtractError, ExtractRequest, Extractor, FormatSummary, MediaInfo, ProgressReporter,
};
use media_fetch::services::storage::FileStore;
use media_fetch::services::tracker::StatusTracker;

/// Bytes written for every successful extraction.
pub const MOCK_CONTENT: &[u8] = b"mock media payload";

/// Extractor driven by the URL:
/// - a URL containing `fail` reports an unavailable source
/// - a URL containing `hang` never finishes until cancelled
/// - a URL containing `stall` never finishes and ignores cancellation
/// - a URL containing `panic` panics
/// - a URL containing `missing` reports a staged file it never wrote
/// - anything else writes `<title>.mp3` into the staging directory
pub struct MockExtractor {
    title: String,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::with_title("Test Clip")
    }

    pub fn with_title(title: &str) -> Self {
        Self {
            title: title.to_string(),
            delay: Duration::from_millis(10),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of extractions observed in flight at once.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: CancellationToken,
        progress: ProgressReporter,
    ) -> Result<PathBuf, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        if request.url.contains("hang") {
            cancel.cancelled().await;
            return Err(ExtractError::Cancelled);
        }
        if request.url.contains("stall") {
            std::future::pending::<()>().await;
        }
        if request.url.contains("panic") {
            panic!("extractor crashed");
        }
        if request.url.contains("fail") {
            return Err(ExtractError::Source("video unavailable".to_string()));
        }
        if request.url.contains("missing") {
            return Ok(request.staging_dir.join("ghost.mp3"));
        }

        progress.report(50).await;
        tokio::select! {
            _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        let path = request.staging_dir.join(format!("{}.mp3", self.title));
        tokio::fs::write(&path, MOCK_CONTENT).await?;
        Ok(path)
    }

    async fn probe(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        if url.contains("fail") {
            return Err(ExtractError::Source("video unavailable".to_string()));
        }
        Ok(MediaInfo {
            title: self.title.clone(),
            duration: Some(42.0),
            url: url.to_string(),
            formats: FormatSummary::default(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Knobs for [`TestApp::spawn`].
pub struct TestOptions {
    pub workers: usize,
    pub job_timeout: Duration,
    pub max_queue_len: Option<usize>,
    pub max_batch_size: usize,
    pub start_pool: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            job_timeout: Duration::from_secs(10),
            max_queue_len: None,
            max_batch_size: 100,
            start_pool: true,
        }
    }
}

/// Application state over a temporary download directory.
pub struct TestApp {
    pub state: AppState,
    pub extractor: Arc<MockExtractor>,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn spawn(extractor: MockExtractor, options: TestOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStore::new(dir.path()).await.unwrap();
        let extractor = Arc::new(extractor);
        let state = AppState::new(
            storage,
            extractor.clone(),
            options.workers,
            options.job_timeout,
            options.max_queue_len,
            options.max_batch_size,
        );
        if options.start_pool {
            state.pool.start();
        }
        Self {
            state,
            extractor,
            dir,
        }
    }

    pub async fn default() -> Self {
        Self::spawn(MockExtractor::new(), TestOptions::default()).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.state.pool.shutdown();
    }
}

pub fn item(url: &str) -> DownloadItem {
    DownloadItem {
        url: url.to_string(),
        mode: MediaMode::Audio,
        quality: QualityPreset::Best,
    }
}

pub fn items(urls: &[&str]) -> Vec<DownloadItem> {
    urls.iter().map(|u| item(u)).collect()
}

/// Poll until the job is completed or failed.
pub async fn wait_for_terminal(tracker: &StatusTracker, job_id: JobId) -> JobRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let record = tracker.get(job_id).await.unwrap();
            if record.state().is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

pub async fn wait_for_all(tracker: &StatusTracker, job_ids: &[JobId]) -> Vec<JobRecord> {
    let mut records = Vec::with_capacity(job_ids.len());
    for id in job_ids {
        records.push(wait_for_terminal(tracker, *id).await);
    }
    records
}
