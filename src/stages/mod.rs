//! Stage contracts and the typed payloads flowing between them.
//!
//! Each stage declares the payload variant it accepts and produces the
//! variant the next stage consumes. The payload is a tagged union rather
//! than an untyped map, so a shape mismatch is caught at the stage
//! boundary as a [`ContractViolation`](crate::error::PipelineError) —
//! always a programming defect, never retried.

pub mod analyze;
pub mod convert;
pub mod package;

pub use analyze::AnalyzeStage;
pub use convert::{ConvertStage, ConvertedHtml, HtmlConverter, HttpConverter};
pub use package::{EpubArtifact, EpubBuilder, HttpEpubBuilder, PackageStage};

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::provider::DocumentStructure;
use crate::router::{AnalysisRouter, ProviderUsed};

/// Typed data passed along the pipeline. Stage *N+1* receives exactly the
/// payload stage *N* produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StagePayload {
    /// The accepted source document (the job's initial input).
    Document {
        /// Storage reference to the uploaded PDF.
        source: String,
        /// MIME type of the source.
        content_type: String,
        /// Page count reported at upload time.
        page_count: u32,
    },
    /// HTML produced by the conversion service.
    Markup {
        /// Storage reference to the converted HTML.
        html_ref: String,
        page_count: u32,
        /// Non-fatal conversion warnings, for diagnostics.
        warnings: Vec<String>,
    },
    /// Structure extracted by an analysis provider.
    Analysis {
        /// Carried through from the markup so packaging can reach it.
        html_ref: String,
        structure: DocumentStructure,
        /// Element counters detected during analysis.
        elements: HashMap<String, u64>,
        /// Which provider served the analysis.
        provider: ProviderUsed,
        /// Total tokens attributed to this analysis.
        tokens_used: u64,
    },
    /// The packaged EPUB artifact.
    Epub {
        /// Storage reference to the finished EPUB.
        artifact: String,
        size_bytes: u64,
    },
}

impl StagePayload {
    /// Discriminant name, used for contract checks and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            StagePayload::Document { .. } => "document",
            StagePayload::Markup { .. } => "markup",
            StagePayload::Analysis { .. } => "analysis",
            StagePayload::Epub { .. } => "epub",
        }
    }
}

/// Runtime context shared by stages within one job execution.
#[derive(Default, Clone)]
pub struct StageContext {
    /// Cooperative cancellation flag for the owning job. In-flight external
    /// calls are allowed to finish or hit their own timeout.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl StageContext {
    pub fn cancel_flag(&self) -> Option<&AtomicBool> {
        self.cancel.as_deref()
    }
}

/// Result of a successful stage run.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Output payload, fed to the next stage and persisted on the job.
    pub payload: StagePayload,
    /// Element counters detected while running, merged into the job's
    /// progress snapshot.
    pub detected: HashMap<String, u64>,
}

impl StageOutcome {
    pub fn new(payload: StagePayload) -> Self {
        Self {
            payload,
            detected: HashMap::new(),
        }
    }

    pub fn with_detected(mut self, detected: HashMap<String, u64>) -> Self {
        self.detected = detected;
        self
    }
}

/// One named, ordered step of the conversion pipeline.
///
/// Object-safe so pipelines are `Vec<Arc<dyn Stage>>`. Stages never decide
/// retry or fallback — providers and the router already resolved those by
/// the time a stage returns an error.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name, unique within a pipeline.
    fn name(&self) -> &'static str;

    /// Human-readable description for progress display.
    fn description(&self) -> &'static str;

    /// Relative share of overall progress this stage represents.
    fn weight(&self) -> u32 {
        1
    }

    /// Discriminant of the payload variant this stage accepts.
    fn expects(&self) -> &'static str;

    /// Execute the stage.
    async fn run(&self, ctx: &StageContext, input: StagePayload) -> Result<StageOutcome>;
}

/// Contract-violation error for a stage that received the wrong payload.
pub(crate) fn contract_violation(
    stage: &dyn Stage,
    got: &StagePayload,
) -> PipelineError {
    PipelineError::ContractViolation {
        stage: stage.name().to_string(),
        expected: stage.expects(),
        got: got.kind(),
    }
}

/// The standard PDF→EPUB pipeline: convert, analyze, package.
pub fn standard_pipeline(
    converter: Arc<dyn HtmlConverter>,
    router: Arc<AnalysisRouter>,
    builder: Arc<dyn EpubBuilder>,
) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(ConvertStage::new(converter)),
        Arc::new(AnalyzeStage::new(router)),
        Arc::new(PackageStage::new(builder)),
    ]
}
