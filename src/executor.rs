//! Single-stage execution with contract checks and progress emission.
//!
//! [`StageExecutor`] runs one stage: validates the input shape, publishes
//! progress, and enforces the hard timeout. It makes no retry or fallback
//! decisions — transient provider trouble is resolved below it (in the
//! router) and anything it returns as an error is final for the job.

use std::time::Duration;

use std::sync::Arc;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::job::Job;
use crate::progress::{ProgressSink, ProgressSnapshot};
use crate::stages::{contract_violation, Stage, StageContext, StageOutcome, StagePayload};

/// Executes one named pipeline stage on behalf of the orchestrator.
pub struct StageExecutor {
    sink: Arc<dyn ProgressSink>,
    hard_timeout: Duration,
}

impl StageExecutor {
    pub fn new(sink: Arc<dyn ProgressSink>, hard_timeout: Duration) -> Self {
        Self { sink, hard_timeout }
    }

    /// Run `stage` with `input`.
    ///
    /// `entering_percent` is the job's progress counting only stages whose
    /// results are already persisted — snapshots published here never get
    /// ahead of the durable record's percentage. On success the detected
    /// element counters are published before returning; the post-stage
    /// percentage is the orchestrator's to publish once the result is
    /// persisted.
    pub async fn execute(
        &self,
        job: &Job,
        stage: &dyn Stage,
        input: StagePayload,
        entering_percent: u8,
        ctx: &StageContext,
    ) -> Result<StageOutcome> {
        if input.kind() != stage.expects() {
            return Err(contract_violation(stage, &input));
        }

        self.sink.publish(ProgressSnapshot::new(
            job.id,
            job.status,
            entering_percent,
            stage.description(),
        ));
        debug!(job = %job.id, stage = stage.name(), "stage starting");

        let outcome = match tokio::time::timeout(self.hard_timeout, stage.run(ctx, input)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PipelineError::Timeout {
                    stage: stage.name().to_string(),
                })
            }
        };

        self.sink.publish(
            ProgressSnapshot::new(job.id, job.status, entering_percent, stage.description())
                .with_elements(outcome.detected.clone()),
        );
        debug!(job = %job.id, stage = stage.name(), "stage finished");

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Sink double recording every published snapshot.
    #[derive(Default)]
    struct RecordingSink {
        snapshots: Mutex<Vec<ProgressSnapshot>>,
    }

    impl ProgressSink for RecordingSink {
        fn publish(&self, snapshot: ProgressSnapshot) {
            self.snapshots.lock().push(snapshot);
        }
    }

    struct SlowStage;

    #[async_trait]
    impl Stage for SlowStage {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn description(&self) -> &'static str {
            "taking forever"
        }
        fn expects(&self) -> &'static str {
            "document"
        }
        async fn run(&self, _ctx: &StageContext, input: StagePayload) -> Result<StageOutcome> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StageOutcome::new(input))
        }
    }

    struct CountingStage;

    #[async_trait]
    impl Stage for CountingStage {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn description(&self) -> &'static str {
            "counting things"
        }
        fn expects(&self) -> &'static str {
            "document"
        }
        async fn run(&self, _ctx: &StageContext, input: StagePayload) -> Result<StageOutcome> {
            let mut detected = HashMap::new();
            detected.insert("things".to_string(), 9);
            Ok(StageOutcome::new(input).with_detected(detected))
        }
    }

    fn document() -> StagePayload {
        StagePayload::Document {
            source: "s3://bucket/doc.pdf".into(),
            content_type: "application/pdf".into(),
            page_count: 2,
        }
    }

    fn job() -> Job {
        let mut job = Job::new_queued("user-1", document());
        job.start().unwrap();
        job
    }

    #[tokio::test]
    async fn test_contract_checked_before_running() {
        let sink = Arc::new(RecordingSink::default());
        let executor = StageExecutor::new(sink.clone(), Duration::from_secs(5));

        let wrong = StagePayload::Epub { artifact: "x".into(), size_bytes: 1 };
        let err = executor
            .execute(&job(), &CountingStage, wrong, 0, &StageContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ContractViolation { .. }));
        // Nothing published for a stage that never started.
        assert!(sink.snapshots.lock().is_empty());
    }

    #[tokio::test]
    async fn test_progress_published_on_entry_and_success() {
        let sink = Arc::new(RecordingSink::default());
        let executor = StageExecutor::new(sink.clone(), Duration::from_secs(5));

        executor
            .execute(&job(), &CountingStage, document(), 40, &StageContext::default())
            .await
            .unwrap();

        let snapshots = sink.snapshots.lock();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].percent, 40);
        assert!(snapshots[0].elements_detected.is_empty());
        // Success snapshot carries the counters but not a higher percent.
        assert_eq!(snapshots[1].percent, 40);
        assert_eq!(snapshots[1].elements_detected["things"], 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_aborts_stage() {
        let sink = Arc::new(RecordingSink::default());
        let executor = StageExecutor::new(sink, Duration::from_millis(50));

        let err = executor
            .execute(&job(), &SlowStage, document(), 0, &StageContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Timeout { .. }));
    }
}
