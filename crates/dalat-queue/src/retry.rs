//! Automatic retry schedule.

use dalat_core::config::QueueConfig;
use dalat_core::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAYS};
use std::time::Duration;

/// What a manual retry does to the automatic retry counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManualRetryBudget {
    /// The counter carries on; an item that exhausted its retries fails for good on the
    /// next error.
    #[default]
    Keep,
    /// The counter restarts at zero, granting the full schedule again.
    Reset,
}

/// Which failures follow the retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureClassification {
    /// Every failure is retried the same way.
    #[default]
    Uniform,
    /// Failures reported as non-recoverable settle into the error state at once.
    SkipPermanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delays: Vec<Duration>,
    pub manual_retry: ManualRetryBudget,
    pub classification: FailureClassification,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
            manual_retry: ManualRetryBudget::default(),
            classification: FailureClassification::default(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delays: config.retry_delays.clone(),
            manual_retry: if config.reset_retry_budget_on_manual_retry {
                ManualRetryBudget::Reset
            } else {
                ManualRetryBudget::Keep
            },
            classification: if config.skip_permanent_failures {
                FailureClassification::SkipPermanent
            } else {
                FailureClassification::Uniform
            },
        }
    }

    /// Delay before the retry that follows `retry_count` earlier retries. Counts past
    /// the end of the schedule reuse its last entry.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let index = (retry_count as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or_default()
    }

    /// Decide what happens to an item that just failed after `retry_count` retries.
    pub fn decide(&self, retry_count: u32, recoverable: bool) -> RetryDecision {
        if self.classification == FailureClassification::SkipPermanent && !recoverable {
            return RetryDecision::GiveUp;
        }
        if retry_count < self.max_retries {
            RetryDecision::RetryAfter(self.delay_for(retry_count))
        } else {
            RetryDecision::GiveUp
        }
    }

    pub fn resets_on_manual_retry(&self) -> bool {
        self.manual_retry == ManualRetryBudget::Reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_schedule_clamps_to_last_entry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(7), Duration::from_millis(4000));
    }

    #[test]
    fn test_empty_schedule_has_zero_delay() {
        let policy = RetryPolicy {
            delays: Vec::new(),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(5), Duration::ZERO);
    }

    #[test]
    fn test_decide_respects_max_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, true),
            RetryDecision::RetryAfter(Duration::from_millis(1000))
        );
        assert_eq!(
            policy.decide(2, true),
            RetryDecision::RetryAfter(Duration::from_millis(4000))
        );
        assert_eq!(policy.decide(3, true), RetryDecision::GiveUp);
        assert_eq!(policy.decide(9, true), RetryDecision::GiveUp);
    }

    #[test]
    fn test_uniform_classification_retries_permanent_failures() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.decide(0, false), RetryDecision::RetryAfter(_)));
    }

    #[test]
    fn test_skip_permanent_classification() {
        let policy = RetryPolicy {
            classification: FailureClassification::SkipPermanent,
            ..Default::default()
        };
        assert_eq!(policy.decide(0, false), RetryDecision::GiveUp);
        assert!(matches!(policy.decide(0, true), RetryDecision::RetryAfter(_)));
    }

    #[test]
    fn test_from_config() {
        let config = QueueConfig {
            max_retries: 1,
            retry_delays: vec![Duration::from_millis(5)],
            reset_retry_budget_on_manual_retry: true,
            skip_permanent_failures: true,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);

        assert_eq!(policy.max_retries, 1);
        assert!(policy.resets_on_manual_retry());
        assert_eq!(policy.classification, FailureClassification::SkipPermanent);
        assert!(!RetryPolicy::default().resets_on_manual_retry());
    }
}
