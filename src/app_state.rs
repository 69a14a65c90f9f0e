use std::sync::Arc;

use crate::services::{
    dispatcher::BatchDispatcher,
    extractor::Extractor,
    pool::WorkerPool,
    queue::JobQueue,
    storage::FileStore,
    tracker::StatusTracker,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<StatusTracker>,
    pub queue: Arc<JobQueue>,
    pub dispatcher: Arc<BatchDispatcher>,
    pub storage: Arc<FileStore>,
    pub extractor: Arc<dyn Extractor>,
    pub pool: Arc<WorkerPool>,
    pub max_batch_size: usize,
}

impl AppState {
    /// Wire the orchestration components together. The worker pool is
    /// created but not started.
    pub fn new(
        storage: FileStore,
        extractor: Arc<dyn Extractor>,
        worker_count: usize,
        job_timeout: std::time::Duration,
        max_queue_len: Option<usize>,
        max_batch_size: usize,
    ) -> Self {
        let tracker = Arc::new(StatusTracker::new());
        let queue = Arc::new(JobQueue::new(max_queue_len));
        let storage = Arc::new(storage);
        let dispatcher = Arc::new(BatchDispatcher::new(tracker.clone(), queue.clone()));
        let pool = Arc::new(WorkerPool::new(
            tracker.clone(),
            queue.clone(),
            storage.clone(),
            extractor.clone(),
            worker_count,
            job_timeout,
        ));

        Self {
            tracker,
            queue,
            dispatcher,
            storage,
            extractor,
            pool,
            max_batch_size,
        }
    }
}
