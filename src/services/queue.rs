use std::collections::VecDeque;

use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::models::job::{JobId, MediaMode, QualityPreset};

/// Job payload handed to the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub url: String,
    pub mode: MediaMode,
    pub quality: QualityPreset,
}

/// In-process FIFO shared by every batch.
pub struct JobQueue {
    items: Mutex<VecDeque<QueuedJob>>,
    notify: Notify,
    max_len: Option<usize>,
}

impl JobQueue {
    /// `max_len` of `None` leaves the queue unbounded.
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_len,
        }
    }

    /// Claim room for `count` jobs.
    ///
    /// The queue stays locked until the reservation is committed or
    /// dropped, so the caller can finish its own bookkeeping before any
    /// worker sees the jobs. Dropping it enqueues nothing.
    pub async fn reserve(&self, count: usize) -> Result<Reservation<'_>, QueueError> {
        let items = self.items.lock().await;
        if let Some(max) = self.max_len {
            if items.len() + count > max {
                return Err(QueueError::Full {
                    depth: items.len(),
                    requested: count,
                    max,
                });
            }
        }
        Ok(Reservation {
            queue: self,
            items,
            count,
        })
    }

    /// Enqueue a whole batch, in order. Either every job is queued or none.
    pub async fn push_batch(&self, jobs: Vec<QueuedJob>) -> Result<(), QueueError> {
        self.reserve(jobs.len()).await?.commit(jobs);
        Ok(())
    }

    /// Wait for the next job.
    pub async fn pop(&self) -> QueuedJob {
        loop {
            if let Some(job) = self.try_pop().await {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub async fn try_pop(&self) -> Option<QueuedJob> {
        let job = self.items.lock().await.pop_front();
        if job.is_some() {
            metrics::gauge!("download_queue_depth").decrement(1.0);
        }
        job
    }

    /// Current number of jobs waiting for a worker.
    pub async fn depth(&self) -> usize {
        self.items.lock().await.len()
    }
}

/// Room held in the queue for one batch. See [`JobQueue::reserve`].
pub struct Reservation<'a> {
    queue: &'a JobQueue,
    items: MutexGuard<'a, VecDeque<QueuedJob>>,
    count: usize,
}

impl Reservation<'_> {
    /// Append the jobs, in order, and wake the workers.
    pub fn commit(self, jobs: Vec<QueuedJob>) {
        let Reservation {
            queue,
            mut items,
            count: reserved,
        } = self;
        debug_assert!(jobs.len() <= reserved, "more jobs than reserved");

        let count = jobs.len();
        items.extend(jobs);
        drop(items);

        for _ in 0..count {
            queue.notify.notify_one();
        }
        metrics::gauge!("download_queue_depth").increment(count as f64);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue full: {depth} waiting, {requested} requested, limit {max}")]
    Full {
        depth: usize,
        requested: usize,
        max: usize,
    },
}
