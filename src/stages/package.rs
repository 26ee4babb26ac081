//! EPUB packaging stage.
//!
//! Packaging (layout, font embedding, image compression, validation) is a
//! single opaque build step behind the [`EpubBuilder`] boundary; this
//! stage hands it the analyzed structure and records the artifact it
//! returns.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{contract_violation, Stage, StageContext, StageOutcome, StagePayload};
use crate::error::{ErrorClass, PipelineError, Result};
use crate::provider::DocumentStructure;

/// The finished EPUB, by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct EpubArtifact {
    /// Storage reference to the packaged EPUB.
    pub artifact: String,
    pub size_bytes: u64,
}

/// Boundary to the EPUB build service.
#[async_trait]
pub trait EpubBuilder: Send + Sync {
    async fn build(&self, html_ref: &str, structure: &DocumentStructure) -> Result<EpubArtifact>;
}

/// HTTP adapter for a hosted EPUB build service.
pub struct HttpEpubBuilder {
    endpoint: String,
    client: Client,
}

impl HttpEpubBuilder {
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
impl EpubBuilder for HttpEpubBuilder {
    async fn build(&self, html_ref: &str, structure: &DocumentStructure) -> Result<EpubArtifact> {
        let url = format!("{}/build", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "html_ref": html_ref, "structure": structure }))
            .send()
            .await
            .map_err(|e| PipelineError::Provider {
                provider: "epub-builder",
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
                provider: "epub-builder",
                class,
                status: Some(status),
                message: format!("build endpoint returned HTTP {}", status),
                retry_after: None,
            });
        }

        Ok(resp.json().await?)
    }
}

/// Pipeline stage producing the final EPUB artifact.
pub struct PackageStage {
    builder: Arc<dyn EpubBuilder>,
}

impl PackageStage {
    pub fn new(builder: Arc<dyn EpubBuilder>) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl Stage for PackageStage {
    fn name(&self) -> &'static str {
        "package"
    }

    fn description(&self) -> &'static str {
        "packaging EPUB"
    }

    fn weight(&self) -> u32 {
        20
    }

    fn expects(&self) -> &'static str {
        "analysis"
    }

    async fn run(&self, _ctx: &StageContext, input: StagePayload) -> Result<StageOutcome> {
        let StagePayload::Analysis { html_ref, structure, .. } = &input else {
            return Err(contract_violation(self, &input));
        };

        let artifact = self.builder.build(html_ref, structure).await?;

        let mut detected = HashMap::new();
        detected.insert("artifacts".to_string(), 1);

        Ok(StageOutcome::new(StagePayload::Epub {
            artifact: artifact.artifact,
            size_bytes: artifact.size_bytes,
        })
        .with_detected(detected))
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// Builder double returning a fixed artifact.
    #[derive(Default)]
    pub struct FixedBuilder {
        pub fail_with: Option<ErrorClass>,
    }

    #[async_trait]
    impl EpubBuilder for FixedBuilder {
        async fn build(
            &self,
            html_ref: &str,
            _structure: &DocumentStructure,
        ) -> Result<EpubArtifact> {
            if let Some(class) = self.fail_with {
                return Err(PipelineError::Provider {
                    provider: "epub-builder",
                    class,
                    status: Some(500),
                    message: "scripted failure".into(),
                    retry_after: None,
                });
            }
            Ok(EpubArtifact {
                artifact: html_ref.replace(".html", ".epub"),
                size_bytes: 4096,
            })
        }
    }
}
