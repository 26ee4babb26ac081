//! PDF→HTML conversion stage.
//!
//! The conversion engine is an external HTTP service; this stage only
//! calls it and interprets success or failure. Conversion is deterministic
//! — no provider fallback applies, so a failure here reaches the
//! orchestrator directly and fails the job.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{contract_violation, Stage, StageContext, StageOutcome, StagePayload};
use crate::error::{ErrorClass, PipelineError, Result};

/// Result of a successful conversion call.
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertedHtml {
    /// Storage reference to the produced HTML.
    pub html_ref: String,
    pub page_count: u32,
    /// Non-fatal warnings from the engine.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Boundary to the external PDF→HTML conversion service.
#[async_trait]
pub trait HtmlConverter: Send + Sync {
    async fn convert(&self, source: &str, content_type: &str) -> Result<ConvertedHtml>;
}

/// HTTP adapter for a hosted conversion service.
pub struct HttpConverter {
    endpoint: String,
    client: Client,
}

impl HttpConverter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl HtmlConverter for HttpConverter {
    async fn convert(&self, source: &str, content_type: &str) -> Result<ConvertedHtml> {
        let url = format!("{}/convert", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "source": source, "content_type": content_type }))
            .send()
            .await
            .map_err(|e| PipelineError::Provider {
                provider: "html-converter",
                class: ErrorClass::Transient,
                status: None,
                message: format!("connection to {} failed: {}", url, e.without_url()),
                retry_after: None,
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let class = match status {
                408 | 429 => ErrorClass::Transient,
                s if s >= 500 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            };
            return Err(PipelineError::Provider {
                provider: "html-converter",
                class,
                status: Some(status),
                message: format!("conversion endpoint returned HTTP {}", status),
                retry_after: None,
            });
        }

        Ok(resp.json().await?)
    }
}

/// Pipeline stage invoking the conversion service.
pub struct ConvertStage {
    converter: Arc<dyn HtmlConverter>,
}

impl ConvertStage {
    pub fn new(converter: Arc<dyn HtmlConverter>) -> Self {
        Self { converter }
    }
}

#[async_trait]
impl Stage for ConvertStage {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn description(&self) -> &'static str {
        "converting document to HTML"
    }

    fn weight(&self) -> u32 {
        40
    }

    fn expects(&self) -> &'static str {
        "document"
    }

    async fn run(&self, _ctx: &StageContext, input: StagePayload) -> Result<StageOutcome> {
        let StagePayload::Document { source, content_type, .. } = &input else {
            return Err(contract_violation(self, &input));
        };

        let converted = self.converter.convert(source, content_type).await?;

        let mut detected = HashMap::new();
        detected.insert("pages".to_string(), converted.page_count as u64);

        Ok(StageOutcome::new(StagePayload::Markup {
            html_ref: converted.html_ref,
            page_count: converted.page_count,
            warnings: converted.warnings,
        })
        .with_detected(detected))
    }
}
