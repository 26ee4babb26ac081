//! Ordered stage execution with durable state transitions.
//!
//! [`PipelineOrchestrator::run`] drives one job through the declared stage
//! list: load, resume at the first stage without a persisted output,
//! execute remaining stages in order, and finish `Completed` or `Failed`.
//! Each stage's result is persisted before the stage counts as done, so a
//! crash at any point resumes without re-running completed work. Re-running
//! a terminal job is a no-op.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::executor::StageExecutor;
use crate::job::{FailureReason, Job, JobId, JobStatus};
use crate::progress::{ProgressSink, ProgressSnapshot};
use crate::stages::{Stage, StageContext, StagePayload};
use crate::store::JobStateStore;

/// Composes an ordered stage list into a resumable job execution.
pub struct PipelineOrchestrator {
    stages: Vec<Arc<dyn Stage>>,
    store: Arc<dyn JobStateStore>,
    sink: Arc<dyn ProgressSink>,
    executor: StageExecutor,
}

impl PipelineOrchestrator {
    /// Build an orchestrator over the declared stage order.
    ///
    /// Fails if the stage list is empty or contains duplicate names.
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        store: Arc<dyn JobStateStore>,
        sink: Arc<dyn ProgressSink>,
        config: PipelineConfig,
    ) -> Result<Self> {
        if stages.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "pipeline must declare at least one stage".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.name()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }

        Ok(Self {
            executor: StageExecutor::new(sink.clone(), config.hard_stage_timeout),
            stages,
            store,
            sink,
        })
    }

    /// Declared stage names, in order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Load a job record (the `GetJob` read boundary).
    pub async fn job(&self, id: JobId) -> Result<Option<Job>> {
        self.store.get(id).await
    }

    fn total_weight(&self) -> u64 {
        self.stages.iter().map(|s| s.weight() as u64).sum::<u64>().max(1)
    }

    /// Percent complete after the first `completed` stages.
    fn percent_after(&self, completed: usize) -> u8 {
        let done: u64 = self
            .stages
            .iter()
            .take(completed)
            .map(|s| s.weight() as u64)
            .sum();
        ((done * 100) / self.total_weight()) as u8
    }

    /// Validate that persisted outputs form a prefix of the declared order
    /// and return the index of the next stage to run.
    fn resume_index(&self, job: &Job) -> Result<usize> {
        if job.stage_outputs.len() > self.stages.len() {
            return Err(PipelineError::Other(format!(
                "job {} has {} stage outputs but the pipeline declares {} stages",
                job.id,
                job.stage_outputs.len(),
                self.stages.len()
            )));
        }
        for (record, stage) in job.stage_outputs.iter().zip(&self.stages) {
            if record.stage != stage.name() {
                return Err(PipelineError::Other(format!(
                    "job {} has output for '{}' where the pipeline declares '{}'",
                    job.id,
                    record.stage,
                    stage.name()
                )));
            }
        }
        Ok(job.stage_outputs.len())
    }

    async fn fail_job(
        &self,
        mut job: Job,
        stage_name: &str,
        err: &PipelineError,
        percent: u8,
    ) -> Result<JobStatus> {
        let reason = FailureReason::from_error(stage_name, err);
        error!(
            job = %job.id,
            stage = stage_name,
            kind = ?reason.kind,
            error = %err,
            "job failed"
        );
        job.fail(reason)?;
        self.store.update(&job).await?;
        self.sink.publish(ProgressSnapshot::new(
            job.id,
            JobStatus::Failed,
            percent,
            job.failure
                .as_ref()
                .map(|f| f.category())
                .unwrap_or("failed"),
        ));
        Ok(JobStatus::Failed)
    }

    /// Execute (or resume) the job until it completes or fails.
    ///
    /// Idempotent on terminal jobs: re-invoking on a `Completed` or
    /// `Failed` job changes nothing and returns the stored status. The
    /// returned `Ok` carries the job's final status; `Err` is reserved for
    /// orchestrator-level trouble (unknown job, store unavailable).
    pub async fn run(&self, job_id: JobId, cancel: Option<Arc<AtomicBool>>) -> Result<JobStatus> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))?;

        if job.is_terminal() {
            info!(job = %job_id, status = %job.status, "job already terminal, nothing to do");
            return Ok(job.status);
        }

        let start_at = self.resume_index(&job)?;
        job.start()?;
        self.store.update(&job).await?;

        if start_at > 0 {
            info!(
                job = %job_id,
                resumed_at = self.stages[start_at.min(self.stages.len() - 1)].name(),
                completed = start_at,
                "resuming job"
            );
        } else {
            info!(job = %job_id, owner = %job.owner, "starting job");
        }

        let ctx = StageContext { cancel };
        let mut input: StagePayload = match job.stage_outputs.last() {
            Some(record) => record.output.clone(),
            None => job.request.clone(),
        };

        for idx in start_at..self.stages.len() {
            let stage = self.stages[idx].clone();
            let entering_percent = self.percent_after(idx);

            // Cancellation is checked at stage boundaries only; an in-flight
            // stage finishes or hits its timeout.
            if ctx
                .cancel_flag()
                .is_some_and(|c| c.load(std::sync::atomic::Ordering::Relaxed))
            {
                return self
                    .fail_job(job, stage.name(), &PipelineError::Cancelled, entering_percent)
                    .await;
            }

            job.set_current_stage(stage.name());
            self.store.update(&job).await?;

            match self
                .executor
                .execute(&job, stage.as_ref(), input, entering_percent, &ctx)
                .await
            {
                Ok(outcome) => {
                    job.record_stage(stage.name(), outcome.payload.clone())?;
                    // Persist before the stage counts as done. If this write
                    // fails the stage will re-run on resume; it never
                    // half-counts.
                    if let Err(e) = self.store.update(&job).await {
                        warn!(job = %job.id, stage = stage.name(), error = %e,
                            "failed to persist stage result");
                        return Err(e);
                    }
                    self.sink.publish(
                        ProgressSnapshot::new(
                            job.id,
                            job.status,
                            self.percent_after(idx + 1),
                            stage.description(),
                        )
                        .with_elements(outcome.detected),
                    );
                    input = outcome.payload;
                }
                Err(e) => return self.fail_job(job, stage.name(), &e, entering_percent).await,
            }
        }

        job.complete()?;
        self.store.update(&job).await?;
        self.sink.publish(ProgressSnapshot::new(
            job.id,
            JobStatus::Completed,
            100,
            "conversion complete",
        ));
        info!(job = %job_id, "job completed");
        Ok(JobStatus::Completed)
    }
}
