//! Configuration values for the router and the pipeline.
//!
//! Policy is data here: everything the retry/fallback machinery needs is an
//! explicit value passed into constructors, so the decision logic stays
//! unit-testable without annotations or globals. The backoff base unit is
//! deliberately configuration rather than a constant.

use std::time::Duration;

/// Configuration for [`AnalysisRouter`](crate::router::AnalysisRouter)
/// retry and fallback behavior.
///
/// # Example
///
/// ```
/// use epub_pipeline::config::RouterConfig;
/// use std::time::Duration;
///
/// let config = RouterConfig::default()
///     .with_base_delay(Duration::from_millis(250))
///     .with_attempts_per_provider(2);
/// assert_eq!(config.attempts_per_provider, 2);
/// ```
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Attempts allowed on each provider before moving on. Default: 3.
    pub attempts_per_provider: u32,

    /// Base unit for the backoff ladder. Default: 500 ms.
    pub base_delay: Duration,

    /// Backoff ladder multipliers applied per attempt. Default: `[1, 5, 15]`.
    /// Attempts beyond the ladder reuse the last multiplier.
    pub multipliers: Vec<u32>,

    /// Upper bound on any single retry delay. Default: 60 seconds.
    pub max_delay: Duration,

    /// Consecutive primary failures after which new requests start at the
    /// fallback. Default: 5. Reset whenever the primary succeeds.
    pub degraded_threshold: u32,

    /// Fraction of the delay used as random jitter when sleeping
    /// (`delay ± delay * jitter`). Jitter never changes which action the
    /// policy decided. Default: 0.1.
    pub jitter: f64,

    /// Soft timeout applied to each individual provider attempt. An attempt
    /// exceeding it is abandoned and classified transient. Default: 30 s.
    pub soft_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            attempts_per_provider: 3,
            base_delay: Duration::from_millis(500),
            multipliers: vec![1, 5, 15],
            max_delay: Duration::from_secs(60),
            degraded_threshold: 5,
            jitter: 0.1,
            soft_timeout: Duration::from_secs(30),
        }
    }
}

impl RouterConfig {
    pub fn with_attempts_per_provider(mut self, attempts: u32) -> Self {
        self.attempts_per_provider = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_degraded_threshold(mut self, threshold: u32) -> Self {
        self.degraded_threshold = threshold.max(1);
        self
    }

    pub fn with_soft_timeout(mut self, timeout: Duration) -> Self {
        self.soft_timeout = timeout;
        self
    }

    /// Zero delays for tests: no backoff sleeps, no jitter.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            jitter: 0.0,
            ..Self::default()
        }
    }
}

/// Configuration for the orchestrator and its support subsystems.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard timeout per stage. A stage still running past this is aborted
    /// and the job fails with a timeout reason. Default: 10 minutes.
    pub hard_stage_timeout: Duration,

    /// TTL for progress snapshots in the cache. Default: 10 minutes.
    pub progress_ttl: Duration,

    /// TTL for cached usage counts. Default: 1 hour.
    pub usage_ttl: Duration,

    /// Bound on the worker pool's job queue. Default: 64.
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hard_stage_timeout: Duration::from_secs(600),
            progress_ttl: Duration::from_secs(600),
            usage_ttl: Duration::from_secs(3600),
            queue_depth: 64,
        }
    }
}

impl PipelineConfig {
    pub fn with_hard_stage_timeout(mut self, timeout: Duration) -> Self {
        self.hard_stage_timeout = timeout;
        self
    }

    pub fn with_progress_ttl(mut self, ttl: Duration) -> Self {
        self.progress_ttl = ttl;
        self
    }

    pub fn with_usage_ttl(mut self, ttl: Duration) -> Self {
        self.usage_ttl = ttl;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }
}
