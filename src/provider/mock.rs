//! Scripted provider for testing without a live analysis service.
//!
//! [`MockProvider`] plays back a queue of outcomes (success, transient
//! failure, permanent failure) and counts how often it was invoked, so
//! retry and fallback behavior can be asserted deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;

use super::{AnalysisRequest, AnalysisResponse, DocumentStructure, Heading, Provider, ProviderUsage};
use crate::error::{ErrorClass, PipelineError, Result};

/// One scripted outcome for a [`MockProvider`] call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with the canned structure.
    Ok,
    /// Fail with a transient provider error.
    Transient,
    /// Fail with a permanent provider error.
    Permanent,
}

/// A test provider that returns scripted outcomes in order.
///
/// When the script is exhausted, the `repeat` outcome (default: success)
/// is returned forever. The canned structure is fixed so tests can assert
/// that a fallback-served result is schema-identical to a primary-served
/// one.
pub struct MockProvider {
    name: &'static str,
    script: Mutex<VecDeque<MockOutcome>>,
    repeat: MockOutcome,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Play the given outcomes in order, then succeed forever.
    pub fn scripted(name: &'static str, outcomes: Vec<MockOutcome>) -> Self {
        Self {
            name,
            script: Mutex::new(outcomes.into()),
            repeat: MockOutcome::Ok,
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider that always succeeds.
    pub fn succeeding(name: &'static str) -> Self {
        Self::scripted(name, Vec::new())
    }

    /// A provider that fails transiently on every call.
    pub fn always_transient(name: &'static str) -> Self {
        Self {
            repeat: MockOutcome::Transient,
            ..Self::succeeding(name)
        }
    }

    /// A provider that fails permanently on every call.
    pub fn always_permanent(name: &'static str) -> Self {
        Self {
            repeat: MockOutcome::Permanent,
            ..Self::succeeding(name)
        }
    }

    /// Number of times `analyze` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// The canned success payload every mock returns.
    pub fn canned_structure() -> DocumentStructure {
        DocumentStructure {
            title: Some("Sample Document".to_string()),
            language: Some("en".to_string()),
            headings: vec![
                Heading { level: 1, text: "Introduction".to_string() },
                Heading { level: 2, text: "Background".to_string() },
            ],
            images: 3,
            tables: 1,
            footnotes: 2,
            extras: None,
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn analyze(
        &self,
        _client: &Client,
        _request: &AnalysisRequest,
    ) -> Result<AnalysisResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.repeat.clone());

        match outcome {
            MockOutcome::Ok => Ok(AnalysisResponse {
                structure: Self::canned_structure(),
                usage: Some(ProviderUsage { input_tokens: 100, output_tokens: 40 }),
                status: 200,
            }),
            MockOutcome::Transient => Err(PipelineError::Provider {
                provider: self.name,
                class: ErrorClass::Transient,
                status: Some(503),
                message: "analysis endpoint returned HTTP 503".to_string(),
                retry_after: None,
            }),
            MockOutcome::Permanent => Err(PipelineError::Provider {
                provider: self.name,
                class: ErrorClass::Permanent,
                status: Some(422),
                message: "unsupported document".to_string(),
                retry_after: None,
            }),
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
