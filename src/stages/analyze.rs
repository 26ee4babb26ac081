//! AI structure-analysis stage.
//!
//! Delegates to the [`AnalysisRouter`], which owns retry and
//! primary→fallback switching. By the time this stage sees an error, both
//! providers are exhausted or the failure was permanent — either way the
//! error goes upward unmodified.

use std::sync::Arc;

use async_trait::async_trait;

use super::{contract_violation, Stage, StageContext, StageOutcome, StagePayload};
use crate::error::Result;
use crate::provider::AnalysisRequest;
use crate::router::AnalysisRouter;

/// Pipeline stage extracting document structure via an analysis provider.
pub struct AnalyzeStage {
    router: Arc<AnalysisRouter>,
}

impl AnalyzeStage {
    pub fn new(router: Arc<AnalysisRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Stage for AnalyzeStage {
    fn name(&self) -> &'static str {
        "analyze"
    }

    fn description(&self) -> &'static str {
        "analyzing document structure"
    }

    fn weight(&self) -> u32 {
        40
    }

    fn expects(&self) -> &'static str {
        "markup"
    }

    async fn run(&self, ctx: &StageContext, input: StagePayload) -> Result<StageOutcome> {
        let StagePayload::Markup { html_ref, .. } = &input else {
            return Err(contract_violation(self, &input));
        };

        let request = AnalysisRequest::new(html_ref.clone(), "text/html")
            .with_instructions("extract headings, images, tables, footnotes, and reading order");

        let (response, provider) = self.router.analyze(&request, ctx.cancel_flag()).await?;

        let elements = response.structure.element_counts();
        let tokens_used = response.usage.map(|u| u.total()).unwrap_or(0);

        Ok(StageOutcome::new(StagePayload::Analysis {
            html_ref: html_ref.clone(),
            structure: response.structure,
            elements: elements.clone(),
            provider,
            tokens_used,
        })
        .with_detected(elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::error::{ErrorClass, PipelineError};
    use crate::provider::MockProvider;
    use crate::router::ProviderUsed;

    fn markup() -> StagePayload {
        StagePayload::Markup {
            html_ref: "s3://bucket/doc.html".into(),
            page_count: 12,
            warnings: Vec::new(),
        }
    }

    fn stage_with(primary: Arc<MockProvider>, fallback: Arc<MockProvider>) -> AnalyzeStage {
        let router = AnalysisRouter::new(primary, RouterConfig::immediate()).with_fallback(fallback);
        AnalyzeStage::new(Arc::new(router))
    }

    #[tokio::test]
    async fn test_analysis_populates_elements_and_provider() {
        let stage = stage_with(
            Arc::new(MockProvider::succeeding("primary")),
            Arc::new(MockProvider::succeeding("fallback")),
        );

        let outcome = stage.run(&StageContext::default(), markup()).await.unwrap();

        let StagePayload::Analysis { elements, provider, tokens_used, html_ref, .. } =
            &outcome.payload
        else {
            panic!("expected analysis payload");
        };
        assert_eq!(*provider, ProviderUsed::Primary);
        assert_eq!(elements["headings"], 2);
        assert_eq!(elements["images"], 3);
        assert_eq!(*tokens_used, 140);
        assert_eq!(html_ref, "s3://bucket/doc.html");
        // Detected counters mirror the payload's elements.
        assert_eq!(outcome.detected["images"], 3);
    }

    #[tokio::test]
    async fn test_fallback_served_result_reports_fallback() {
        let stage = stage_with(
            Arc::new(MockProvider::always_transient("primary")),
            Arc::new(MockProvider::succeeding("fallback")),
        );

        let outcome = stage.run(&StageContext::default(), markup()).await.unwrap();
        let StagePayload::Analysis { provider, .. } = &outcome.payload else {
            panic!("expected analysis payload");
        };
        assert_eq!(*provider, ProviderUsed::Fallback);
    }

    #[tokio::test]
    async fn test_wrong_input_is_contract_violation() {
        let stage = stage_with(
            Arc::new(MockProvider::succeeding("primary")),
            Arc::new(MockProvider::succeeding("fallback")),
        );
        let wrong = StagePayload::Document {
            source: "s3://bucket/doc.pdf".into(),
            content_type: "application/pdf".into(),
            page_count: 1,
        };

        let err = stage.run(&StageContext::default(), wrong).await.unwrap_err();
        assert!(matches!(err, PipelineError::ContractViolation { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_providers_error_passes_upward() {
        let stage = stage_with(
            Arc::new(MockProvider::always_transient("primary")),
            Arc::new(MockProvider::always_transient("fallback")),
        );

        let err = stage
            .run(&StageContext::default(), markup())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
