//! Durable job state storage.
//!
//! [`JobStateStore`] is the contract the orchestrator persists through:
//! whole-record reads and atomic whole-record replacement. The relational
//! engine behind a production deployment is an external service; the
//! in-memory implementation here backs tests and embedders that bring
//! their own durability.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{PipelineError, Result};
use crate::job::{Job, JobId};

/// Durable store for [`Job`] records, keyed by job id.
///
/// `update` replaces the whole record in one atomic operation — the
/// orchestrator relies on this so a crash between stage completion and
/// persistence never leaves a half-written record.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Insert a new job. Fails if the id already exists.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Load a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Atomically replace an existing job record.
    async fn update(&self, job: &Job) -> Result<()>;
}

/// In-memory [`JobStateStore`].
///
/// A single mutex guards the map, so every `update` is an atomic replace.
#[derive(Default)]
pub struct MemoryStateStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[async_trait]
impl JobStateStore for MemoryStateStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(PipelineError::Persistence(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if !jobs.contains_key(&job.id) {
            return Err(PipelineError::JobNotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StagePayload;

    fn queued_job() -> Job {
        Job::new_queued(
            "user-1",
            StagePayload::Document {
                source: "s3://bucket/doc.pdf".into(),
                content_type: "application/pdf".into(),
                page_count: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryStateStore::new();
        let job = queued_job();
        let id = job.id;

        store.insert(&job).await.unwrap();
        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.owner, "user-1");
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStateStore::new();
        let job = queued_job();
        store.insert(&job).await.unwrap();
        assert!(store.insert(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_update_replaces_whole_record() {
        let store = MemoryStateStore::new();
        let mut job = queued_job();
        store.insert(&job).await.unwrap();

        job.start().unwrap();
        store.update(&job).await.unwrap();

        let loaded = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, crate::job::JobStatus::Running);
    }

    #[tokio::test]
    async fn test_update_missing_job_fails() {
        let store = MemoryStateStore::new();
        let job = queued_job();
        let err = store.update(&job).await.unwrap_err();
        assert!(matches!(err, PipelineError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryStateStore::new();
        assert!(store.get(JobId::new()).await.unwrap().is_none());
    }
}
