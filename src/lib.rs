//! # EPUB Pipeline
//!
//! Conversion pipeline core for PDF→EPUB jobs: ordered stages with durable
//! resume, AI-provider fallback, progress tracking, and monthly usage
//! quotas.
//!
//! This crate provides the orchestration around document conversion — the
//! conversion engine, the analysis models, and the EPUB packager are
//! external services reached through narrow trait boundaries. What lives
//! here is the part that has to be *correct*: stage ordering, idempotent
//! resume after a crash, retry/backoff with primary→fallback provider
//! switching, and counters that stay consistent under concurrent writers.
//!
//! ## Core Concepts
//!
//! - **[`Stage`]** — one discrete, ordered pipeline step with a typed
//!   input/output contract ([`StagePayload`]).
//! - **[`PipelineOrchestrator`]** — runs a job's stages in order,
//!   persisting each result before the stage counts as done. Re-running a
//!   terminal job is a no-op; a crashed job resumes at the first
//!   unexecuted stage.
//! - **[`AnalysisRouter`]** — one logical `analyze` operation over a
//!   primary and a fallback [`Provider`], with retry driven by a pure
//!   [`RetryPolicy`].
//! - **[`UsageTracker`]** — atomic per-user monthly counters with a
//!   best-effort cache in front of the durable store.
//! - **[`ProgressCache`]** — TTL snapshots for progress polling; derived
//!   state that may lag the job record but never leads it.
//! - **[`WorkerPool`]** — bounded queue plus leased workers, one job per
//!   worker at a time.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use epub_pipeline::{
//!     standard_pipeline, AnalysisRouter, HttpConverter, HttpEpubBuilder, HttpProvider,
//!     MemoryStateStore, PipelineConfig, PipelineOrchestrator, ProgressCache, RouterConfig,
//!     StagePayload, UsageTracker, WorkerPool,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Arc::new(
//!         AnalysisRouter::new(
//!             Arc::new(HttpProvider::new(
//!                 "vision-primary",
//!                 "https://vision.example.com",
//!                 "doc-vision-1",
//!             )),
//!             RouterConfig::default(),
//!         )
//!         .with_fallback(Arc::new(HttpProvider::new(
//!             "vision-fallback",
//!             "https://vision-fallback.example.com",
//!             "doc-vision-lite",
//!         ))),
//!     );
//!
//!     let stages = standard_pipeline(
//!         Arc::new(HttpConverter::new("https://convert.example.com")),
//!         router,
//!         Arc::new(HttpEpubBuilder::new("https://epub.example.com")),
//!     );
//!
//!     let store = Arc::new(MemoryStateStore::new());
//!     let progress = Arc::new(ProgressCache::new(Duration::from_secs(600)));
//!     let orchestrator = Arc::new(PipelineOrchestrator::new(
//!         stages,
//!         store.clone(),
//!         progress.clone(),
//!         PipelineConfig::default(),
//!     )?);
//!
//!     let tracker = Arc::new(UsageTracker::in_memory(Duration::from_secs(3600)));
//!     let pool = WorkerPool::start(4, 64, orchestrator, store, tracker);
//!
//!     let job = pool
//!         .submit(
//!             "user-42",
//!             StagePayload::Document {
//!                 source: "s3://uploads/doc.pdf".into(),
//!                 content_type: "application/pdf".into(),
//!                 page_count: 128,
//!             },
//!         )
//!         .await?;
//!     println!("accepted job {job}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod provider;
pub mod retry;
pub mod router;
pub mod stages;
pub mod store;
pub mod usage;
pub mod worker;

pub use config::{PipelineConfig, RouterConfig};
pub use error::{ErrorClass, FailureKind, PipelineError, Result};
pub use executor::StageExecutor;
pub use job::{FailureReason, Job, JobId, JobStatus, StageRecord};
pub use orchestrator::PipelineOrchestrator;
pub use progress::{ProgressCache, ProgressSink, ProgressSnapshot};
pub use provider::{
    AnalysisRequest, AnalysisResponse, DocumentStructure, Heading, HttpProvider, MockOutcome,
    MockProvider, Provider, ProviderUsage,
};
pub use retry::{RetryAction, RetryPolicy};
pub use router::{AnalysisRouter, ProviderUsed};
pub use stages::{
    standard_pipeline, AnalyzeStage, ConvertStage, ConvertedHtml, EpubArtifact, EpubBuilder,
    HtmlConverter, HttpConverter, HttpEpubBuilder, PackageStage, Stage, StageContext,
    StageOutcome, StagePayload,
};
pub use store::{JobStateStore, MemoryStateStore};
pub use usage::{
    BillingPeriod, MemoryUsageCache, MemoryUsageStore, UsageCache, UsageSnapshot, UsageStore,
    UsageTracker,
};
pub use worker::{LeaseRegistry, WorkerPool};
