use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::job::{ErrorKind, JobError, JobId, JobOutput, JobState};
use crate::services::extractor::{ExtractError, ExtractRequest, Extractor, ProgressReporter};
use crate::services::queue::{JobQueue, QueuedJob};
use crate::services::storage::{output_name, FileStore, StorageError};
use crate::services::tracker::StatusTracker;

/// Fixed number of execution slots draining the shared job queue.
pub struct WorkerPool {
    tracker: Arc<StatusTracker>,
    queue: Arc<JobQueue>,
    store: Arc<FileStore>,
    extractor: Arc<dyn Extractor>,
    slots: Arc<Semaphore>,
    active: AtomicUsize,
    capacity: usize,
    job_timeout: Duration,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        tracker: Arc<StatusTracker>,
        queue: Arc<JobQueue>,
        store: Arc<FileStore>,
        extractor: Arc<dyn Extractor>,
        capacity: usize,
        job_timeout: Duration,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            tracker,
            queue,
            store,
            extractor,
            slots: Arc::new(Semaphore::new(capacity)),
            active: AtomicUsize::new(0),
            capacity,
            job_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently running a job.
    pub fn idle_slots(&self) -> usize {
        self.capacity.saturating_sub(self.active.load(Ordering::SeqCst))
    }

    /// Spawn the scheduling loop.
    ///
    /// A slot is claimed before the next job is popped, so jobs start in
    /// queue order and at most `capacity` run at once.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                capacity = pool.capacity,
                timeout_secs = pool.job_timeout.as_secs(),
                extractor = pool.extractor.name(),
                "Worker pool started"
            );
            loop {
                let permit = tokio::select! {
                    _ = pool.shutdown.cancelled() => break,
                    permit = Arc::clone(&pool.slots).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let job = tokio::select! {
                    _ = pool.shutdown.cancelled() => break,
                    job = pool.queue.pop() => job,
                };

                pool.active.fetch_add(1, Ordering::SeqCst);
                let worker = Arc::clone(&pool);
                tokio::spawn(async move {
                    let _permit = permit;
                    Arc::clone(&worker).supervise(job).await;
                    worker.active.fetch_sub(1, Ordering::SeqCst);
                });
            }
            tracing::info!("Worker pool stopped");
        })
    }

    /// Stop taking jobs and cancel the ones in flight.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run one job in its own task so a panic is recorded instead of
    /// leaving the job stuck in `running`.
    async fn supervise(self: Arc<Self>, job: QueuedJob) {
        let job_id = job.job_id;
        let worker = Arc::clone(&self);
        let handle = tokio::spawn(async move { worker.run_job(job).await });

        if let Err(e) = handle.await {
            tracing::error!(job_id = %job_id, error = %e, "Job task aborted");
            self.store.cleanup_staging(job_id).await;
            self.finish_failed(
                job_id,
                JobError::new(ErrorKind::InternalError, format!("job task aborted: {}", e)),
                None,
            )
            .await;
        }
    }

    async fn run_job(&self, job: QueuedJob) {
        let job_id = job.job_id;
        if let Err(e) = self
            .tracker
            .update(job_id, |record| record.start(Utc::now()))
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "Could not mark job running");
            return;
        }
        let running = RunningGauge::acquire();

        tracing::info!(
            job_id = %job_id,
            url = %job.url,
            mode = %job.mode,
            quality = %job.quality,
            "Processing download job"
        );

        let started = Instant::now();
        let result = self.execute(&job).await;
        self.store.cleanup_staging(job_id).await;
        drop(running);
        metrics::histogram!("download_job_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(output) => {
                let file_name = output.file_name.clone();
                match self
                    .tracker
                    .update(job_id, |record| record.complete(output, Utc::now()))
                    .await
                {
                    Ok(_) => {
                        metrics::counter!("download_jobs_completed").increment(1);
                        tracing::info!(
                            job_id = %job_id,
                            file = %file_name,
                            duration_ms = started.elapsed().as_millis() as u64,
                            "Job completed"
                        );
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Could not record job completion")
                    }
                }
            }
            Err(error) => self.finish_failed(job_id, error, Some(started)).await,
        }
    }

    async fn finish_failed(&self, job_id: JobId, error: JobError, started: Option<Instant>) {
        let kind = error.kind;
        let message = error.message.clone();
        match self
            .tracker
            .update(job_id, |record| {
                let now = Utc::now();
                // A job whose task died before it started still has to end terminal.
                if record.state() == JobState::Queued {
                    record.start(now)?;
                }
                record.fail(error, now)
            })
            .await
        {
            Ok(_) => {
                metrics::counter!("download_jobs_failed", "kind" => kind.as_ref().to_string())
                    .increment(1);
                tracing::warn!(
                    job_id = %job_id,
                    kind = %kind,
                    error = %message,
                    duration_ms = started.map(|s| s.elapsed().as_millis() as u64),
                    "Job failed"
                );
            }
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Could not record job failure"),
        }
    }

    /// Validate, extract and store one job. Every failure comes back as a
    /// classified [`JobError`].
    ///
    /// The job timeout runs from here through name resolution. The final
    /// move is not cut short, so a reserved name is always released and a
    /// moved file is always recorded.
    async fn execute(&self, job: &QueuedJob) -> Result<JobOutput, JobError> {
        let deadline = tokio::time::Instant::now() + self.job_timeout;
        validate_source_url(&job.url)?;

        let staging_dir = tokio::time::timeout_at(deadline, self.store.staging_dir(job.job_id))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(storage_error)?;

        let request = ExtractRequest {
            job_id: job.job_id,
            url: job.url.clone(),
            mode: job.mode,
            quality: job.quality,
            staging_dir,
        };
        let cancel = self.shutdown.child_token();
        let progress = ProgressReporter::new(Arc::clone(&self.tracker), job.job_id);

        // Shutdown is checked first: it also fires the extractor's token.
        let produced = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(shutting_down()),
            _ = tokio::time::sleep_until(deadline) => {
                cancel.cancel();
                return Err(self.timed_out());
            }
            result = self.extractor.extract(&request, cancel.clone(), progress) => match result {
                Ok(path) => path,
                Err(ExtractError::Cancelled) if self.shutdown.is_cancelled() => {
                    return Err(shutting_down())
                }
                Err(e) => return Err(JobError::new(e.kind(), e.to_string())),
            },
        };

        let title = produced
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let extension = produced.extension().and_then(|e| e.to_str());
        let proposed = output_name(title, job.quality, job.job_id, extension);

        let final_path = tokio::time::timeout_at(deadline, self.store.resolve(job.job_id, &proposed))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(storage_error)?;
        self.store
            .finalize(&produced, &final_path)
            .await
            .map_err(storage_error)?;

        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(proposed);
        Ok(JobOutput {
            path: final_path,
            file_name,
        })
    }

    fn timed_out(&self) -> JobError {
        JobError::new(
            ErrorKind::Timeout,
            format!("exceeded {}s", self.job_timeout.as_secs()),
        )
    }
}

fn shutting_down() -> JobError {
    JobError::new(ErrorKind::InternalError, "worker pool shutting down")
}

fn storage_error(e: StorageError) -> JobError {
    JobError::new(ErrorKind::StorageError, e.to_string())
}

/// One unit of the `download_jobs_running` gauge, released on drop so a
/// panicking job still gives it back.
struct RunningGauge;

impl RunningGauge {
    fn acquire() -> Self {
        metrics::gauge!("download_jobs_running").increment(1.0);
        Self
    }
}

impl Drop for RunningGauge {
    fn drop(&mut self) {
        metrics::gauge!("download_jobs_running").decrement(1.0);
    }
}

/// A source URL must be http(s) with a host.
fn validate_source_url(raw: &str) -> Result<(), JobError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| JobError::new(ErrorKind::InvalidUrl, format!("{}: {}", raw, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(JobError::new(
            ErrorKind::InvalidUrl,
            format!("unsupported scheme {:?}", parsed.scheme()),
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(JobError::new(ErrorKind::InvalidUrl, format!("{}: missing host", raw)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_validate_source_url() {
        assert!(validate_source_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_source_url("http://example.com/v.mp4").is_ok());

        for bad in ["not a url", "ftp://example.com/a", "https://", "file:///etc/passwd", ""] {
            let err = validate_source_url(bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidUrl, "{bad}");
        }
    }

    #[test]
    fn test_running_gauge_released_on_panic() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let result = std::panic::catch_unwind(|| {
                let _running = RunningGauge::acquire();
                panic!("extractor blew up");
            });
            assert!(result.is_err());
        });

        assert!(handle.render().contains("download_jobs_running 0"));
    }
}
