use std::sync::Arc;

use crate::models::download::DownloadItem;
use crate::models::job::{BatchId, JobId, JobRecord};
use crate::services::queue::{JobQueue, QueueError, QueuedJob};
use crate::services::tracker::{StatusTracker, TrackerError};

/// Ids handed back for an accepted batch, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub batch_id: BatchId,
    pub job_ids: Vec<JobId>,
}

/// Turns a batch of requests into queued jobs without waiting on them.
pub struct BatchDispatcher {
    tracker: Arc<StatusTracker>,
    queue: Arc<JobQueue>,
}

impl BatchDispatcher {
    pub fn new(tracker: Arc<StatusTracker>, queue: Arc<JobQueue>) -> Self {
        Self { tracker, queue }
    }

    /// Create one `queued` record per item and enqueue them all.
    ///
    /// Fails without side effects on an empty batch or when the queue
    /// cannot take the whole batch.
    pub async fn submit(&self, items: Vec<DownloadItem>) -> Result<Submission, DispatchError> {
        if items.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "at least one URL is required".to_string(),
            ));
        }

        let batch_id = BatchId::new();
        let records = items
            .into_iter()
            .map(|item| JobRecord::new(batch_id, item.url.trim().to_string(), item.mode, item.quality))
            .collect::<Vec<_>>();
        let job_ids = records.iter().map(|r| r.id).collect::<Vec<_>>();
        let queued = records
            .iter()
            .map(|r| QueuedJob {
                job_id: r.id,
                url: r.url.clone(),
                mode: r.mode,
                quality: r.quality,
            })
            .collect::<Vec<_>>();

        // The queue stays locked until the records exist, so a worker never
        // pops an unknown job and a refused batch never reaches the tracker.
        let reservation = match self.queue.reserve(queued.len()).await {
            Ok(reservation) => reservation,
            Err(e) => {
                tracing::warn!(batch_id = %batch_id, error = %e, "Rejected batch");
                return Err(DispatchError::Backpressure(e));
            }
        };
        self.tracker
            .insert_batch(batch_id, records)
            .await
            .map_err(DispatchError::Tracker)?;
        reservation.commit(queued);

        metrics::counter!("download_jobs_total").increment(job_ids.len() as u64);
        tracing::info!(batch_id = %batch_id, jobs = job_ids.len(), "Batch queued");

        Ok(Submission { batch_id, job_ids })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("backpressure: {0}")]
    Backpressure(#[source] QueueError),

    #[error("job store error: {0}")]
    Tracker(#[source] TrackerError),
}
