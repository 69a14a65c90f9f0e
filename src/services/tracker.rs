use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::models::download::StateCounts;
use crate::models::job::{BatchId, JobId, JobRecord, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    #[error("no completed job owns file {0}")]
    FileNotFound(String),

    #[error("job {0} already exists")]
    Duplicate(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    batches: HashMap<BatchId, Vec<JobId>>,
    files: HashMap<String, JobId>,
}

/// In-memory store of job records.
///
/// Readers always get cloned snapshots. Writers apply a mutation to a copy
/// of the record and only commit it if the mutation succeeds, so a record is
/// never observed half-updated.
#[derive(Default)]
pub struct StatusTracker {
    inner: RwLock<Inner>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, job_id: JobId) -> Result<JobRecord, TrackerError> {
        let inner = self.inner.read().await;
        inner
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(TrackerError::NotFound(job_id))
    }

    /// Records of a batch, in submission order.
    pub async fn get_batch(&self, batch_id: BatchId) -> Result<Vec<JobRecord>, TrackerError> {
        let inner = self.inner.read().await;
        let ids = inner
            .batches
            .get(&batch_id)
            .ok_or(TrackerError::BatchNotFound(batch_id))?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    pub async fn find_completed_by_name(&self, name: &str) -> Result<JobRecord, TrackerError> {
        let inner = self.inner.read().await;
        inner
            .files
            .get(name)
            .and_then(|id| inner.jobs.get(id))
            .cloned()
            .ok_or_else(|| TrackerError::FileNotFound(name.to_string()))
    }

    pub async fn counts(&self) -> StateCounts {
        let inner = self.inner.read().await;
        let mut counts = StateCounts::default();
        for job in inner.jobs.values() {
            counts.record(job.state());
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert all records of a batch at once. Nothing is inserted if any id
    /// is already known.
    pub(crate) async fn insert_batch(
        &self,
        batch_id: BatchId,
        records: Vec<JobRecord>,
    ) -> Result<(), TrackerError> {
        let mut inner = self.inner.write().await;
        if let Some(dup) = records.iter().find(|r| inner.jobs.contains_key(&r.id)) {
            return Err(TrackerError::Duplicate(dup.id));
        }

        let ids = records.iter().map(|r| r.id).collect::<Vec<_>>();
        for record in records {
            inner.jobs.insert(record.id, record);
        }
        inner.batches.entry(batch_id).or_default().extend(ids);
        Ok(())
    }

    /// Apply a state mutation to one record and return the new snapshot.
    pub(crate) async fn update<F>(&self, job_id: JobId, mutation: F) -> Result<JobRecord, TrackerError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), TransitionError>,
    {
        let mut inner = self.inner.write().await;
        let current = inner
            .jobs
            .get(&job_id)
            .ok_or(TrackerError::NotFound(job_id))?;

        let mut next = current.clone();
        mutation(&mut next)?;

        if let Some(output) = next.output() {
            inner.files.insert(output.file_name.clone(), job_id);
        }
        inner.jobs.insert(job_id, next.clone());
        Ok(next)
    }

    pub(crate) async fn set_progress(&self, job_id: JobId, percent: u8) {
        let mut inner = self.inner.write().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.set_progress(percent);
        }
    }
}
