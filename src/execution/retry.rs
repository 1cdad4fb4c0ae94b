//! Retry policy as a small state machine
//!
//! `RetryState` counts attempts and carries the next backoff; each failure is
//! classified into retry, give up or reject.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ExchangeError, QuorumError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
            multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(QuorumError::InvalidConfig(
                "execution.retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(QuorumError::InvalidConfig(format!(
                "execution.retry.multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(QuorumError::InvalidConfig(format!(
                "execution.retry.base_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.base_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn start(&self) -> RetryState {
        RetryState {
            policy: self.clone(),
            attempts: 0,
            next_backoff: Duration::from_millis(self.base_backoff_ms.min(self.max_backoff_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient failure with attempts left: wait `backoff` and try again
    Retry { backoff: Duration },
    /// Transient failure, attempt ceiling reached
    GiveUp { attempts: u32 },
    /// Permanent failure, never retried
    Reject { reason: String },
}

#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
    next_backoff: Duration,
}

impl RetryState {
    /// Count a new attempt
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn next_backoff(&self) -> Duration {
        self.next_backoff
    }

    pub fn on_failure(&mut self, error: &ExchangeError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::Reject {
                reason: error.to_string(),
            };
        }
        if self.attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        let backoff = self.next_backoff;
        let grown = backoff.as_millis() as f64 * self.policy.multiplier;
        let capped = grown.min(self.policy.max_backoff_ms as f64).max(0.0);
        self.next_backoff = Duration::from_millis(capped as u64);
        RetryDecision::Retry { backoff }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_until_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff_ms: 100,
            multiplier: 3.0,
            max_backoff_ms: 500,
        };
        let mut state = policy.start();
        let mut backoffs = Vec::new();
        loop {
            state.begin_attempt();
            match state.on_failure(&ExchangeError::Timeout) {
                RetryDecision::Retry { backoff } => backoffs.push(backoff.as_millis()),
                RetryDecision::GiveUp { attempts } => {
                    assert_eq!(attempts, 5);
                    break;
                }
                RetryDecision::Reject { .. } => panic!("timeout is transient"),
            }
        }
        assert_eq!(backoffs, vec![100, 300, 500, 500]);
        assert_eq!(state.retries(), 4);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut state = RetryPolicy::default().start();
        state.begin_attempt();
        assert!(matches!(
            state.on_failure(&ExchangeError::InsufficientMargin),
            RetryDecision::Reject { .. }
        ));
        assert_eq!(state.retries(), 0);
    }

    #[test]
    fn test_ceiling_of_three_allows_two_retries() {
        let mut state = RetryPolicy::default().start();
        state.begin_attempt();
        assert!(matches!(state.on_failure(&ExchangeError::RateLimited), RetryDecision::Retry { .. }));
        state.begin_attempt();
        assert!(matches!(
            state.on_failure(&ExchangeError::Server {
                status: 502,
                message: "bad gateway".into()
            }),
            RetryDecision::Retry { .. }
        ));
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&ExchangeError::Timeout),
            RetryDecision::GiveUp { attempts: 3 }
        );
    }

    #[test]
    fn test_first_backoff_respects_ceiling() {
        let policy = RetryPolicy {
            base_backoff_ms: 8_000,
            max_backoff_ms: 1_000,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let mut state = policy.start();
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&ExchangeError::RateLimited),
            RetryDecision::Retry {
                backoff: Duration::from_millis(1_000)
            }
        );
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
