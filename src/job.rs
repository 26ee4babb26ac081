//! The durable job record and its status transitions.
//!
//! A [`Job`] is the source of truth for one conversion: its status, the
//! stage currently executing, and the ordered outputs of every completed
//! stage. Stage outputs form a strict prefix of the declared stage order —
//! an entry exists for stage *N* exactly when stage *N* completed. Once a
//! job reaches `Completed` or `Failed` it never changes again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureKind, PipelineError, Result};
use crate::stages::StagePayload;

/// Opaque job identifier, assigned at creation, immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status. Monotonic, except that `Running` is re-entered when a
/// crashed job resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states admit no further stage execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persisted output of one completed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name, unique within a job.
    pub stage: String,
    /// The stage's typed result, consumed as the next stage's input.
    pub output: StagePayload,
    pub completed_at: DateTime<Utc>,
}

/// Why a job failed. Stored only on `Failed` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReason {
    /// The stage that failed.
    pub stage: String,
    /// Internal failure kind (provider class, contract, persistence, ...).
    pub kind: FailureKind,
    /// Sanitized description: truncated, no provider payloads, no
    /// credentials.
    pub message: String,
}

impl FailureReason {
    const MAX_MESSAGE_LEN: usize = 200;

    pub fn from_error(stage: impl Into<String>, err: &PipelineError) -> Self {
        let mut message = err.to_string();
        if message.len() > Self::MAX_MESSAGE_LEN {
            let cut = (0..=Self::MAX_MESSAGE_LEN)
                .rev()
                .find(|i| message.is_char_boundary(*i))
                .unwrap_or(0);
            message.truncate(cut);
            message.push('…');
        }
        Self {
            stage: stage.into(),
            kind: err.failure_kind(),
            message,
        }
    }

    /// Human-readable category for the read boundary.
    pub fn category(&self) -> &'static str {
        self.kind.category()
    }
}

/// Durable record of one conversion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// The requesting user, for usage accounting.
    pub owner: String,
    /// The accepted source document — the first stage's input.
    pub request: StagePayload,
    pub status: JobStatus,
    /// Name of the stage currently executing or last attempted.
    pub current_stage: Option<String>,
    /// Outputs of completed stages, in declared stage order.
    pub stage_outputs: Vec<StageRecord>,
    /// Populated only when `status` is `Failed`.
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job for the given owner and source document.
    pub fn new_queued(owner: impl Into<String>, request: StagePayload) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner: owner.into(),
            request,
            status: JobStatus::Queued,
            current_stage: None,
            stage_outputs: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Names of completed stages, in order.
    pub fn completed_stages(&self) -> impl Iterator<Item = &str> {
        self.stage_outputs.iter().map(|r| r.stage.as_str())
    }

    /// The persisted output of a completed stage, if any.
    pub fn output_of(&self, stage: &str) -> Option<&StagePayload> {
        self.stage_outputs
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.output)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid(&self, to: &str) -> PipelineError {
        PipelineError::InvalidTransition {
            from: self.status.as_str().to_string(),
            to: to.to_string(),
        }
    }

    /// Transition to `Running`. Re-entrant: a job already `Running` (after
    /// a crash) may start again; terminal jobs may not.
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Queued | JobStatus::Running => {
                self.status = JobStatus::Running;
                self.touch();
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Record a completed stage's output. Only legal while `Running`.
    pub fn record_stage(&mut self, stage: impl Into<String>, output: StagePayload) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.invalid("record_stage"));
        }
        let stage = stage.into();
        self.current_stage = Some(stage.clone());
        self.stage_outputs.push(StageRecord {
            stage,
            output,
            completed_at: Utc::now(),
        });
        self.touch();
        Ok(())
    }

    /// Mark the stage currently being attempted, without recording output.
    pub fn set_current_stage(&mut self, stage: impl Into<String>) {
        self.current_stage = Some(stage.into());
        self.touch();
    }

    /// Transition `Running` → `Completed`.
    pub fn complete(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Running => {
                self.status = JobStatus::Completed;
                self.touch();
                Ok(())
            }
            _ => Err(self.invalid("completed")),
        }
    }

    /// Transition `Running` (or `Queued`, for pre-start cancellation) →
    /// `Failed` with the given reason.
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        match self.status {
            JobStatus::Queued | JobStatus::Running => {
                self.status = JobStatus::Failed;
                self.failure = Some(reason);
                self.touch();
                Ok(())
            }
            _ => Err(self.invalid("failed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    fn payload() -> StagePayload {
        StagePayload::Document {
            source: "s3://bucket/doc.pdf".into(),
            content_type: "application/pdf".into(),
            page_count: 12,
        }
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new_queued("user-1", payload());
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.current_stage.is_none());
        assert!(job.stage_outputs.is_empty());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_start_is_reentrant() {
        let mut job = Job::new_queued("user-1", payload());
        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        // Crash-recovery resume re-enters Running.
        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_cannot_start_terminal_job() {
        let mut job = Job::new_queued("user-1", payload());
        job.start().unwrap();
        job.complete().unwrap();
        assert!(job.start().is_err());
    }

    #[test]
    fn test_record_stage_keeps_order() {
        let mut job = Job::new_queued("user-1", payload());
        job.start().unwrap();
        job.record_stage("convert", payload()).unwrap();
        job.record_stage("analyze", payload()).unwrap();

        let names: Vec<_> = job.completed_stages().collect();
        assert_eq!(names, vec!["convert", "analyze"]);
        assert_eq!(job.current_stage.as_deref(), Some("analyze"));
        assert!(job.output_of("convert").is_some());
        assert!(job.output_of("package").is_none());
    }

    #[test]
    fn test_record_stage_requires_running() {
        let mut job = Job::new_queued("user-1", payload());
        assert!(job.record_stage("convert", payload()).is_err());
    }

    #[test]
    fn test_fail_records_reason() {
        let mut job = Job::new_queued("user-1", payload());
        job.start().unwrap();
        let err = PipelineError::Provider {
            provider: "vision-primary",
            class: ErrorClass::Permanent,
            status: Some(422),
            message: "unsupported document".into(),
            retry_after: None,
        };
        job.fail(FailureReason::from_error("analyze", &err)).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        let failure = job.failure.as_ref().unwrap();
        assert_eq!(failure.stage, "analyze");
        assert_eq!(failure.category(), "document could not be processed");
    }

    #[test]
    fn test_terminal_jobs_reject_further_transitions() {
        let mut job = Job::new_queued("user-1", payload());
        job.start().unwrap();
        let reason = FailureReason::from_error("convert", &PipelineError::Cancelled);
        job.fail(reason.clone()).unwrap();

        assert!(job.complete().is_err());
        assert!(job.fail(reason).is_err());
        assert!(job.record_stage("convert", payload()).is_err());
    }

    #[test]
    fn test_failure_message_is_truncated() {
        let long = "x".repeat(500);
        let err = PipelineError::Other(long);
        let reason = FailureReason::from_error("convert", &err);
        assert!(reason.message.len() <= FailureReason::MAX_MESSAGE_LEN + '…'.len_utf8());
    }

    #[test]
    fn test_updated_at_bumped_on_transition() {
        let mut job = Job::new_queued("user-1", payload());
        let created = job.updated_at;
        job.start().unwrap();
        assert!(job.updated_at >= created);
    }
}
