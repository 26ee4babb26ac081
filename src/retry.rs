//! Retry and fallback decisions as a pure function.
//!
//! [`RetryPolicy::decide`] maps `(attempt, error class)` to an action:
//! retry the same provider after a delay, switch to the fallback, or give
//! up. The router owns the loop and the sleeping; this module owns only the
//! decision, so the whole policy is testable as a table.

use std::time::Duration;

use crate::config::RouterConfig;
use crate::error::ErrorClass;

/// What the router should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Retry the provider that just failed, after the given delay.
    RetryAfter(Duration),
    /// Give up on the current provider and switch to the fallback.
    SwitchProvider,
    /// Hard failure: no retry, no fallback.
    Fail,
}

/// Deterministic retry/fallback policy.
///
/// `attempt` is the 1-based cumulative count of failures for the request,
/// across both providers. With the default three attempts per provider:
/// failures 1–2 retry the primary, failure 3 switches to the fallback,
/// failures 4–5 retry the fallback, and failure 6 fails the request.
/// A permanent error fails immediately at any attempt.
///
/// Given identical `(attempt, class)` the decision is identical — any
/// jitter is applied by the router around the returned delay and never
/// changes the action.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts_per_provider: u32,
    base_delay: Duration,
    multipliers: Vec<u32>,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            attempts_per_provider: config.attempts_per_provider.max(1),
            base_delay: config.base_delay,
            multipliers: if config.multipliers.is_empty() {
                vec![1]
            } else {
                config.multipliers.clone()
            },
            max_delay: config.max_delay,
        }
    }

    /// Decide the next action after failure number `attempt` (1-based).
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryAction {
        if class == ErrorClass::Permanent {
            return RetryAction::Fail;
        }

        let per_provider = self.attempts_per_provider;
        if attempt < per_provider {
            RetryAction::RetryAfter(self.delay_for(attempt))
        } else if attempt == per_provider {
            RetryAction::SwitchProvider
        } else if attempt < per_provider * 2 {
            RetryAction::RetryAfter(self.delay_for(attempt - per_provider))
        } else {
            RetryAction::Fail
        }
    }

    /// Delay before retry number `n` on the current provider (1-based):
    /// `multipliers[n-1] * base_delay`, capped at `max_delay`. Attempts past
    /// the ladder reuse its last rung.
    fn delay_for(&self, n: u32) -> Duration {
        let idx = ((n as usize).saturating_sub(1)).min(self.multipliers.len() - 1);
        let raw = self.base_delay * self.multipliers[idx];
        raw.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RouterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with_base(base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            &RouterConfig::default().with_base_delay(Duration::from_millis(base_ms)),
        )
    }

    #[test]
    fn test_backoff_ladder_1x_5x_15x() {
        let policy = policy_with_base(100);
        assert_eq!(
            policy.decide(1, ErrorClass::Transient),
            RetryAction::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(2, ErrorClass::Transient),
            RetryAction::RetryAfter(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_switch_exactly_at_primary_exhaustion() {
        let policy = policy_with_base(100);
        assert_eq!(
            policy.decide(3, ErrorClass::Transient),
            RetryAction::SwitchProvider
        );
    }

    #[test]
    fn test_fallback_attempts_restart_the_ladder() {
        let policy = policy_with_base(100);
        // Failure 4 is the fallback's first failure: back to the 1x rung.
        assert_eq!(
            policy.decide(4, ErrorClass::Transient),
            RetryAction::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(5, ErrorClass::Transient),
            RetryAction::RetryAfter(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_fail_after_both_providers_exhausted() {
        let policy = policy_with_base(100);
        assert_eq!(policy.decide(6, ErrorClass::Transient), RetryAction::Fail);
        assert_eq!(policy.decide(7, ErrorClass::Transient), RetryAction::Fail);
    }

    #[test]
    fn test_permanent_fails_at_any_attempt() {
        let policy = policy_with_base(100);
        for attempt in 1..=6 {
            assert_eq!(policy.decide(attempt, ErrorClass::Permanent), RetryAction::Fail);
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new(
            &RouterConfig::default()
                .with_base_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(20)),
        );
        // 10s * 5 = 50s uncapped, max_delay is 20s.
        assert_eq!(
            policy.decide(2, ErrorClass::Transient),
            RetryAction::RetryAfter(Duration::from_secs(20))
        );
    }

    #[test]
    fn test_decision_is_deterministic() {
        let policy = policy_with_base(250);
        for attempt in 1..=8 {
            for class in [ErrorClass::Transient, ErrorClass::Permanent] {
                let first = policy.decide(attempt, class);
                for _ in 0..100 {
                    assert_eq!(policy.decide(attempt, class), first);
                }
            }
        }
    }

    #[test]
    fn test_single_attempt_per_provider() {
        let policy = RetryPolicy::new(&RouterConfig::default().with_attempts_per_provider(1));
        assert_eq!(
            policy.decide(1, ErrorClass::Transient),
            RetryAction::SwitchProvider
        );
        assert_eq!(policy.decide(2, ErrorClass::Transient), RetryAction::Fail);
    }
}
