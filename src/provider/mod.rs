//! Provider trait and normalized request/response types.
//!
//! The [`Provider`] trait abstracts over external document-analysis
//! services, translating between the normalized [`AnalysisRequest`]/
//! [`AnalysisResponse`] types and provider-specific HTTP APIs. The result
//! schema is identical regardless of which provider served the request —
//! callers can only tell them apart through the
//! [`ProviderUsed`](crate::router::ProviderUsed) out-value.
//!
//! ## Architecture
//!
//! ```text
//! AnalyzeStage ──► AnalysisRequest ──► AnalysisRouter ──► AnalysisResponse
//!                                           │
//!                                ┌──────────┴──────────┐
//!                           primary Provider      fallback Provider
//!                           (HttpProvider)        (HttpProvider)
//! ```

pub mod http;
pub mod mock;

pub use http::HttpProvider;
pub use mock::{MockOutcome, MockProvider};

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A normalized analysis request — provider-agnostic.
///
/// Carries a reference to the content (a storage URL, never inline bytes)
/// and a content-type hint so the provider can pick its ingestion path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Reference to the content to analyze (e.g. a signed storage URL).
    pub content_ref: String,

    /// MIME-type hint for the referenced content.
    pub content_type: String,

    /// Optional analysis instructions (reading order, element extraction).
    pub instructions: Option<String>,
}

impl AnalysisRequest {
    pub fn new(content_ref: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content_ref: content_ref.into(),
            content_type: content_type.into(),
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// A normalized analysis response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    /// The typed structure extracted from the document. Schema-identical
    /// across providers.
    pub structure: DocumentStructure,

    /// Provider-reported resource usage, when available, for cost
    /// attribution.
    pub usage: Option<ProviderUsage>,

    /// HTTP status code (for diagnostics/logging).
    pub status: u16,
}

/// Document structure extracted by an analysis provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStructure {
    /// Detected document title, if any.
    pub title: Option<String>,

    /// BCP-47 language tag, if detected.
    pub language: Option<String>,

    /// Headings in reading order.
    pub headings: Vec<Heading>,

    /// Number of images detected.
    pub images: u64,

    /// Number of tables detected.
    pub tables: u64,

    /// Number of footnotes detected.
    pub footnotes: u64,

    /// Provider-specific extras. Stored as raw JSON — each provider returns
    /// different fields here; nothing downstream depends on them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<serde_json::Value>,
}

impl DocumentStructure {
    /// Element counters for progress reporting, keyed by element name.
    pub fn element_counts(&self) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        counts.insert("headings".to_string(), self.headings.len() as u64);
        counts.insert("images".to_string(), self.images);
        counts.insert("tables".to_string(), self.tables);
        counts.insert("footnotes".to_string(), self.footnotes);
        counts
    }
}

/// A single heading in reading order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heading {
    /// Heading level, 1-based.
    pub level: u8,
    /// Heading text.
    pub text: String,
}

/// Provider-reported token/resource usage for a single request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ProviderUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Abstraction over document-analysis providers.
///
/// Implementors translate between the normalized request/response pair and
/// the provider's HTTP API, and classify every failure into
/// [`ErrorClass::Transient`](crate::error::ErrorClass) or
/// [`ErrorClass::Permanent`](crate::error::ErrorClass) before it reaches
/// the retry layer.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Execute one analysis request.
    async fn analyze(&self, client: &Client, request: &AnalysisRequest)
        -> Result<AnalysisResponse>;

    /// Human-readable name for logging and cost attribution.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_counts() {
        let structure = DocumentStructure {
            headings: vec![
                Heading { level: 1, text: "Intro".into() },
                Heading { level: 2, text: "Scope".into() },
            ],
            images: 4,
            tables: 1,
            ..Default::default()
        };
        let counts = structure.element_counts();
        assert_eq!(counts["headings"], 2);
        assert_eq!(counts["images"], 4);
        assert_eq!(counts["tables"], 1);
        assert_eq!(counts["footnotes"], 0);
    }

    #[test]
    fn test_usage_total() {
        let usage = ProviderUsage { input_tokens: 1200, output_tokens: 300 };
        assert_eq!(usage.total(), 1500);
    }

    #[test]
    fn test_request_builder() {
        let req = AnalysisRequest::new("s3://bucket/doc.pdf", "application/pdf")
            .with_instructions("extract reading order");
        assert_eq!(req.content_type, "application/pdf");
        assert!(req.instructions.is_some());
    }
}
