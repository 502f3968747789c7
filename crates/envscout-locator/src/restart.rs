//! Process-level restart budget.

use std::time::Duration;

use envscout_config::Config;

/// Bounds on restarting a failed locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Consecutive restart attempts allowed.
    pub max_attempts: u32,
    /// Delay before the first attempt; doubled for each later one.
    pub backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RestartPolicy {
    /// Builds the policy from configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_restart_attempts(),
            backoff: config.restart_backoff(),
        }
    }

    /// Delay before the attempt with zero-based index `attempt`.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

/// Consecutive restart attempts since the last successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartState {
    policy: RestartPolicy,
    attempts: u32,
}

impl RestartState {
    /// Creates an empty counter.
    #[must_use]
    pub const fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Attempts consumed so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether no attempts remain.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Consumes one attempt, returning the delay to wait before spawning,
    /// or `None` when the budget is spent.
    pub fn begin_attempt(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.backoff_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Clears the counter after a successful exchange.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn policy() -> RestartPolicy {
        RestartPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }

    #[rstest]
    fn backoff_doubles_per_attempt(policy: RestartPolicy) {
        let mut state = RestartState::new(policy);

        let delays: Vec<_> = std::iter::from_fn(|| state.begin_attempt()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(state.is_exhausted());
        assert_eq!(state.attempts(), 3);
    }

    #[rstest]
    fn reset_restores_full_budget(policy: RestartPolicy) {
        let mut state = RestartState::new(policy);
        state.begin_attempt();
        state.begin_attempt();

        state.reset();

        assert_eq!(state.attempts(), 0);
        assert_eq!(state.begin_attempt(), Some(Duration::from_secs(1)));
    }

    #[rstest]
    fn zero_budget_never_allows_a_restart() {
        let mut state = RestartState::new(RestartPolicy {
            max_attempts: 0,
            backoff: Duration::from_secs(1),
        });

        assert_eq!(state.begin_attempt(), None);
    }

    #[rstest]
    fn large_attempt_indices_saturate(policy: RestartPolicy) {
        assert_eq!(policy.backoff_for(40), Duration::from_secs(1).saturating_mul(u32::MAX));
    }
}
