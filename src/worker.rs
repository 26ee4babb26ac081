//! Worker pool, job leases, and job submission.
//!
//! A bounded channel of job ids feeds a fixed set of workers; each worker
//! claims a lease before running so no two workers ever execute the same
//! job, then runs [`PipelineOrchestrator::run`] to completion. Jobs for
//! different owners (and different jobs for one owner) are independent —
//! ordering exists only inside a job.
//!
//! Submission is where usage accounting happens: exactly one increment per
//! accepted job, before it is enqueued, and best-effort — a failed
//! increment is logged, never a reason to reject the conversion.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::job::{Job, JobId};
use crate::orchestrator::PipelineOrchestrator;
use crate::stages::StagePayload;
use crate::store::JobStateStore;
use crate::usage::UsageTracker;

/// Exclusivity marker: one worker per job id.
#[derive(Default)]
pub struct LeaseRegistry {
    held: Mutex<HashSet<JobId>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the lease for a job. Returns `false` if another worker holds it.
    pub fn claim(&self, id: JobId) -> bool {
        self.held.lock().insert(id)
    }

    pub fn release(&self, id: JobId) {
        self.held.lock().remove(&id);
    }

    pub fn is_held(&self, id: JobId) -> bool {
        self.held.lock().contains(&id)
    }
}

/// Fixed-size pool of workers executing queued jobs.
pub struct WorkerPool {
    tx: mpsc::Sender<JobId>,
    handles: Vec<JoinHandle<()>>,
    store: Arc<dyn JobStateStore>,
    tracker: Arc<UsageTracker>,
    leases: Arc<LeaseRegistry>,
    cancels: Arc<Mutex<HashMap<JobId, Arc<AtomicBool>>>>,
}

impl WorkerPool {
    /// Start `workers` workers over a queue of `queue_depth` job ids.
    pub fn start(
        workers: usize,
        queue_depth: usize,
        orchestrator: Arc<PipelineOrchestrator>,
        store: Arc<dyn JobStateStore>,
        tracker: Arc<UsageTracker>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<JobId>(queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let leases = Arc::new(LeaseRegistry::new());
        let cancels: Arc<Mutex<HashMap<JobId, Arc<AtomicBool>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let handles = (0..workers.max(1))
            .map(|n| {
                let rx = rx.clone();
                let orchestrator = orchestrator.clone();
                let leases = leases.clone();
                let cancels = cancels.clone();
                tokio::spawn(async move {
                    loop {
                        let next = { rx.lock().await.recv().await };
                        let Some(job_id) = next else {
                            debug!(worker = n, "queue closed, worker exiting");
                            break;
                        };

                        if !leases.claim(job_id) {
                            warn!(worker = n, job = %job_id, "job already leased, skipping");
                            continue;
                        }

                        let cancel = cancels.lock().get(&job_id).cloned();
                        if let Err(e) = orchestrator.run(job_id, cancel).await {
                            warn!(worker = n, job = %job_id, error = %e, "job run errored");
                        }
                        cancels.lock().remove(&job_id);
                        leases.release(job_id);
                    }
                })
            })
            .collect();

        Self {
            tx,
            handles,
            store,
            tracker,
            leases,
            cancels,
        }
    }

    /// Accept a conversion request: create the job, count it against the
    /// owner's monthly usage, and enqueue it.
    ///
    /// The usage increment is best-effort relative to conversion execution:
    /// if the durable usage store is down the failure is logged and the job
    /// still runs.
    pub async fn submit(&self, owner: impl Into<String>, request: StagePayload) -> Result<JobId> {
        let job = Job::new_queued(owner, request);
        let id = job.id;
        self.store.insert(&job).await?;
        self.cancels.lock().insert(id, Arc::new(AtomicBool::new(false)));

        if let Err(e) = self.tracker.increment(&job.owner).await {
            warn!(owner = %job.owner, job = %id, error = %e,
                "usage increment failed, job proceeds anyway");
        }

        self.tx
            .send(id)
            .await
            .map_err(|_| PipelineError::Other("job queue is closed".to_string()))?;
        info!(job = %id, owner = %job.owner, "job accepted");
        Ok(id)
    }

    /// Request cancellation of a queued or running job.
    ///
    /// Cooperative: the flag is honored at the next stage boundary; an
    /// in-flight stage finishes or hits its own timeout. Returns `false`
    /// when the job is unknown or already finished.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.cancels.lock().get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Lease registry, for observation.
    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    /// Close the queue and wait for every worker to drain and exit.
    pub async fn shutdown(self) {
        drop(self.tx);
        join_all(self.handles).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::Result;
    use crate::job::JobStatus;
    use crate::progress::ProgressCache;
    use crate::stages::{Stage, StageContext, StageOutcome};
    use crate::store::MemoryStateStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct PassStage;

    #[async_trait]
    impl Stage for PassStage {
        fn name(&self) -> &'static str {
            "pass"
        }
        fn description(&self) -> &'static str {
            "passing through"
        }
        fn expects(&self) -> &'static str {
            "document"
        }
        async fn run(&self, _ctx: &StageContext, input: StagePayload) -> Result<StageOutcome> {
            Ok(StageOutcome::new(input))
        }
    }

    struct SlowStage;

    #[async_trait]
    impl Stage for SlowStage {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn description(&self) -> &'static str {
            "working slowly"
        }
        fn expects(&self) -> &'static str {
            "document"
        }
        async fn run(&self, _ctx: &StageContext, input: StagePayload) -> Result<StageOutcome> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(StageOutcome::new(input))
        }
    }

    fn document() -> StagePayload {
        StagePayload::Document {
            source: "s3://bucket/doc.pdf".into(),
            content_type: "application/pdf".into(),
            page_count: 1,
        }
    }

    fn pool_with(
        stage: Arc<dyn Stage>,
        workers: usize,
    ) -> (WorkerPool, Arc<MemoryStateStore>, Arc<UsageTracker>) {
        let store = Arc::new(MemoryStateStore::new());
        let cache = Arc::new(ProgressCache::new(Duration::from_secs(60)));
        let tracker = Arc::new(UsageTracker::in_memory(Duration::from_secs(3600)));
        let orchestrator = Arc::new(
            PipelineOrchestrator::new(
                vec![stage],
                store.clone(),
                cache,
                PipelineConfig::default(),
            )
            .unwrap(),
        );
        let pool = WorkerPool::start(workers, 16, orchestrator, store.clone(), tracker.clone());
        (pool, store, tracker)
    }

    fn pool(workers: usize) -> (WorkerPool, Arc<MemoryStateStore>, Arc<UsageTracker>) {
        pool_with(Arc::new(PassStage), workers)
    }

    async fn wait_terminal(store: &MemoryStateStore, id: JobId) -> JobStatus {
        for _ in 0..400 {
            if let Some(job) = store.get(id).await.unwrap() {
                if job.is_terminal() {
                    return job.status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[test]
    fn test_lease_is_exclusive() {
        let leases = LeaseRegistry::new();
        let id = JobId::new();

        assert!(leases.claim(id));
        assert!(!leases.claim(id));
        assert!(leases.is_held(id));

        leases.release(id);
        assert!(leases.claim(id));
    }

    #[tokio::test]
    async fn test_submitted_jobs_run_to_completion() {
        let (pool, store, _) = pool(2);

        let a = pool.submit("user-1", document()).await.unwrap();
        let b = pool.submit("user-2", document()).await.unwrap();
        let c = pool.submit("user-1", document()).await.unwrap();

        assert_eq!(wait_terminal(&store, a).await, JobStatus::Completed);
        assert_eq!(wait_terminal(&store, b).await, JobStatus::Completed);
        assert_eq!(wait_terminal(&store, c).await, JobStatus::Completed);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_usage_counted_once_per_accepted_job() {
        let (pool, store, tracker) = pool(2);

        let a = pool.submit("user-1", document()).await.unwrap();
        let b = pool.submit("user-1", document()).await.unwrap();
        wait_terminal(&store, a).await;
        wait_terminal(&store, b).await;

        assert_eq!(tracker.get("user-1").await.unwrap().count, 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_job_fails_before_its_first_stage() {
        // One worker, busy with a slow job; the second job is cancelled
        // while still queued and must never run a stage.
        let (pool, store, _) = pool_with(Arc::new(SlowStage), 1);

        let a = pool.submit("user-1", document()).await.unwrap();
        let b = pool.submit("user-1", document()).await.unwrap();
        assert!(pool.cancel(b));

        assert_eq!(wait_terminal(&store, a).await, JobStatus::Completed);
        assert_eq!(wait_terminal(&store, b).await, JobStatus::Failed);

        let job = store.get(b).await.unwrap().unwrap();
        assert_eq!(job.failure.as_ref().unwrap().category(), "cancelled by user");
        assert!(job.stage_outputs.is_empty());

        // Unknown jobs cannot be cancelled.
        assert!(!pool.cancel(JobId::new()));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let (pool, store, _) = pool(1);
        let id = pool.submit("user-1", document()).await.unwrap();
        pool.shutdown().await;

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
}
