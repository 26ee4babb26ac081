use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobId;

/// Errors produced by the pipeline and its components.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An external analysis/conversion provider failed.
    ///
    /// Returned by provider adapters with the error already classified into
    /// [`ErrorClass::Transient`] or [`ErrorClass::Permanent`], so the retry
    /// layer never has to inspect provider-specific payloads. The
    /// `retry_after` field is populated from a `Retry-After` response header
    /// when present.
    #[error("provider '{provider}' failed ({class}): {message}")]
    Provider {
        /// Name of the provider that produced the error.
        provider: &'static str,
        /// Transient or permanent, decided by the adapter.
        class: ErrorClass,
        /// HTTP status code, when the failure came from a response.
        status: Option<u16>,
        /// Short description. Never contains response bodies or credentials.
        message: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// A stage received input of the wrong shape.
    ///
    /// This signals a pipeline programming defect, never provider weather,
    /// and is therefore always permanent.
    #[error("stage '{stage}' expected {expected} input, got {got}")]
    ContractViolation {
        stage: String,
        expected: &'static str,
        got: &'static str,
    },

    /// The durable job store is unavailable or rejected a write.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The cache backend is unavailable. Always recoverable by degrading to
    /// the durable store; callers must not surface this to users.
    #[error("cache unavailable: {0}")]
    Cache(String),

    /// No job exists with the given id.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// An illegal job status transition was attempted.
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The job was cancelled at a stage boundary.
    #[error("job was cancelled")]
    Cancelled,

    /// A stage exceeded its hard timeout and was aborted.
    #[error("stage '{stage}' exceeded its hard timeout")]
    Timeout { stage: String },

    /// Invalid configuration detected at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

impl PipelineError {
    /// Classify this error for the retry layer.
    ///
    /// Provider errors carry their adapter-assigned class. Contract
    /// violations, cancellation, and illegal transitions are permanent.
    /// Anything else (transport failures, persistence hiccups, unclassified
    /// errors) is treated as transient so the normal retry ceiling applies.
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Provider { class, .. } => *class,
            PipelineError::ContractViolation { .. }
            | PipelineError::Cancelled
            | PipelineError::InvalidTransition { .. }
            | PipelineError::InvalidConfig(_)
            | PipelineError::JobNotFound(_)
            | PipelineError::Json(_) => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        }
    }

    /// The job-level failure kind for this error, used when recording a
    /// terminal [`FailureReason`](crate::job::FailureReason).
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PipelineError::Provider { class, .. } => FailureKind::Provider(*class),
            PipelineError::ContractViolation { .. } => FailureKind::Contract,
            PipelineError::Persistence(_) => FailureKind::Persistence,
            PipelineError::Timeout { .. } => FailureKind::Timeout,
            PipelineError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Provider(self.class()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Two-way error classification driving retry and fallback decisions.
///
/// Every provider error is exactly one of these. Errors that cannot be
/// classified by an adapter default to `Transient` (failing open toward
/// resilience — the retry ceiling still bounds the damage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network failures, timeouts, rate limits, 5xx-equivalents. Worth
    /// retrying, and worth switching provider once retries are exhausted.
    Transient,
    /// Auth, validation, unsupported input. Retrying cannot help.
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What ultimately failed a job. Persisted inside the job's failure reason
/// and mapped to a human-readable category at the read boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An analysis/conversion provider failed with the given class.
    Provider(ErrorClass),
    /// Stage input/output contract mismatch.
    Contract,
    /// The durable store rejected a stage-result write.
    Persistence,
    /// Hard timeout aborted the stage.
    Timeout,
    /// Cancelled at a stage boundary.
    Cancelled,
}

impl FailureKind {
    /// User-visible category string. Deliberately free of internal error
    /// class names, payloads, and stack traces.
    pub fn category(&self) -> &'static str {
        match self {
            FailureKind::Provider(ErrorClass::Transient) => "analysis provider unavailable",
            FailureKind::Provider(ErrorClass::Permanent) => "document could not be processed",
            FailureKind::Contract => "internal pipeline error",
            FailureKind::Persistence => "storage unavailable",
            FailureKind::Timeout => "conversion timed out",
            FailureKind::Cancelled => "cancelled by user",
        }
    }
}
