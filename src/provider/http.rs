//! HTTP adapter for hosted analysis providers.
//!
//! [`HttpProvider`] posts a normalized request to a provider's analysis
//! endpoint and classifies every non-success status before the error
//! reaches the retry layer: 408/429/5xx are transient (with `Retry-After`
//! parsing), the remaining 4xx are permanent.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{AnalysisRequest, AnalysisResponse, DocumentStructure, Provider, ProviderUsage};
use crate::error::{ErrorClass, PipelineError, Result};

/// A hosted analysis provider reached over HTTP.
///
/// Both the primary and the fallback provider are instances of this type
/// with different endpoints and credentials; the router treats them
/// uniformly through the [`Provider`] trait.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    name: &'static str,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(name: &'static str, endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
        }
    }

    /// Attach an API key, sent as `Authorization: Bearer {key}`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn build_body(&self, request: &AnalysisRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "content_ref": request.content_ref,
            "content_type": request.content_type,
        });
        if let Some(ref instructions) = request.instructions {
            body["instructions"] = json!(instructions);
        }
        body
    }

    fn classify_status(status: u16) -> ErrorClass {
        match status {
            408 | 425 | 429 => ErrorClass::Transient,
            s if s >= 500 => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Parse a Retry-After header value as seconds.
    fn parse_retry_after(value: &str) -> Option<std::time::Duration> {
        value
            .trim()
            .parse::<u64>()
            .ok()
            .map(std::time::Duration::from_secs)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn analyze(
        &self,
        client: &Client,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse> {
        let url = format!("{}/v1/analyze", self.endpoint);
        let mut req = client.post(&url).json(&self.build_body(request));
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| PipelineError::Provider {
            provider: self.name,
            class: ErrorClass::Transient,
            status: None,
            message: format!("connection to {} failed: {}", url, e.without_url()),
            retry_after: None,
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            // Status line only — response bodies stay out of stored errors.
            return Err(PipelineError::Provider {
                provider: self.name,
                class: Self::classify_status(status),
                status: Some(status),
                message: format!("analysis endpoint returned HTTP {}", status),
                retry_after,
            });
        }

        let payload: Value = resp.json().await?;
        let structure: DocumentStructure = payload
            .get("structure")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| PipelineError::Provider {
                provider: self.name,
                class: ErrorClass::Permanent,
                status: Some(status),
                message: "response missing 'structure' field".to_string(),
                retry_after: None,
            })?;
        let usage: Option<ProviderUsage> = payload
            .get("usage")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());

        Ok(AnalysisResponse { structure, usage, status })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
