//! Primary/fallback routing around analysis providers.
//!
//! [`AnalysisRouter`] wraps a primary provider and an optional fallback
//! behind a single logical `analyze` operation. Transient failures are
//! retried on the same provider per the [`RetryPolicy`]; once the primary's
//! attempts are exhausted (or the primary is currently degraded), the
//! identical request is replayed against the fallback. Permanent failures
//! short-circuit: no retry, no fallback. Callers see one result schema
//! either way and learn which provider served them only through
//! [`ProviderUsed`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RouterConfig;
use crate::error::{ErrorClass, PipelineError, Result};
use crate::provider::{AnalysisRequest, AnalysisResponse, Provider};
use crate::retry::{RetryAction, RetryPolicy};

/// Which provider actually served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderUsed {
    Primary,
    Fallback,
}

impl ProviderUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderUsed::Primary => "primary",
            ProviderUsed::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for ProviderUsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Retry- and fallback-aware front door to the analysis providers.
pub struct AnalysisRouter {
    primary: Arc<dyn Provider>,
    fallback: Option<Arc<dyn Provider>>,
    policy: RetryPolicy,
    config: RouterConfig,
    client: Client,
    /// Consecutive primary failures since its last success. At
    /// `degraded_threshold` new requests start directly at the fallback.
    primary_failures: AtomicU32,
}

impl AnalysisRouter {
    pub fn new(primary: Arc<dyn Provider>, config: RouterConfig) -> Self {
        Self {
            policy: RetryPolicy::new(&config),
            primary,
            fallback: None,
            config,
            client: Client::new(),
            primary_failures: AtomicU32::new(0),
        }
    }

    /// Set the fallback provider.
    pub fn with_fallback(mut self, fallback: Arc<dyn Provider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Use a specific HTTP client (e.g. one with custom timeouts).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Whether the primary is currently considered degraded.
    pub fn primary_degraded(&self) -> bool {
        self.fallback.is_some()
            && self.primary_failures.load(Ordering::Relaxed) >= self.config.degraded_threshold
    }

    /// Run one logical analysis request with retry and fallback.
    ///
    /// `cancel` is checked before each attempt and again after each backoff
    /// sleep; an in-flight provider call is never interrupted (it finishes
    /// or hits the soft timeout).
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        cancel: Option<&AtomicBool>,
    ) -> Result<(AnalysisResponse, ProviderUsed)> {
        let mut current = if self.primary_degraded() {
            debug!(provider = self.primary.name(), "primary degraded, starting at fallback");
            ProviderUsed::Fallback
        } else {
            ProviderUsed::Primary
        };
        // Cumulative failure count feeding the policy. When the primary is
        // skipped as degraded, numbering starts past its allotment so the
        // fallback gets its usual attempts and nothing more.
        let mut attempt = match current {
            ProviderUsed::Primary => 0,
            ProviderUsed::Fallback => self.config.attempts_per_provider,
        };

        loop {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(PipelineError::Cancelled);
                }
            }

            let provider = match current {
                ProviderUsed::Primary => &self.primary,
                // `current` only becomes Fallback when one is configured.
                ProviderUsed::Fallback => self.fallback.as_ref().expect("fallback configured"),
            };

            let outcome =
                tokio::time::timeout(self.config.soft_timeout, provider.analyze(&self.client, request))
                    .await;

            let err = match outcome {
                Ok(Ok(response)) => {
                    if current == ProviderUsed::Primary {
                        self.primary_failures.store(0, Ordering::Relaxed);
                    }
                    debug!(provider = provider.name(), served_by = %current, "analysis succeeded");
                    return Ok((response, current));
                }
                Ok(Err(e)) => e,
                Err(_) => PipelineError::Provider {
                    provider: provider.name(),
                    class: ErrorClass::Transient,
                    status: None,
                    message: format!(
                        "attempt exceeded soft timeout of {:?}",
                        self.config.soft_timeout
                    ),
                    retry_after: None,
                },
            };

            if current == ProviderUsed::Primary {
                self.primary_failures.fetch_add(1, Ordering::Relaxed);
            }
            attempt += 1;

            match self.policy.decide(attempt, err.class()) {
                RetryAction::Fail => return Err(err),
                RetryAction::SwitchProvider => {
                    if current == ProviderUsed::Primary && self.fallback.is_some() {
                        warn!(
                            primary = self.primary.name(),
                            error = %err,
                            "primary exhausted, switching to fallback"
                        );
                        current = ProviderUsed::Fallback;
                    } else {
                        // No fallback to switch to: the request is done.
                        return Err(err);
                    }
                }
                RetryAction::RetryAfter(delay) => {
                    // A provider-supplied Retry-After hint overrides the ladder.
                    let delay = match &err {
                        PipelineError::Provider { retry_after: Some(ra), .. } => *ra,
                        _ => delay,
                    };
                    debug!(
                        provider = provider.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(self.jittered(delay)).await;
                    if let Some(flag) = cancel {
                        if flag.load(Ordering::Relaxed) {
                            return Err(PipelineError::Cancelled);
                        }
                    }
                }
            }
        }
    }

    /// Apply `± jitter` to a delay. Decision class is already fixed by the
    /// policy; this only smears the sleep.
    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = 1.0 - self.config.jitter + fastrand::f64() * self.config.jitter * 2.0;
        delay.mul_f64(spread)
    }
}
