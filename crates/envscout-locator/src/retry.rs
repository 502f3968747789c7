//! Escalating deadlines for consecutive `configure` timeouts.
//!
//! A single slow `configure` is tolerated: the next attempt gets a longer
//! deadline. A second consecutive timeout means the locator is hung and
//! must be killed.

use std::time::Duration;

/// Deadline for a `configure` call after `consecutive_timeouts` prior
/// timeouts: `base` doubled per timeout, capped at `cap`.
#[must_use]
pub fn configure_timeout(base: Duration, cap: Duration, consecutive_timeouts: u32) -> Duration {
    let factor = 1_u32.checked_shl(consecutive_timeouts).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap.max(base))
}

/// What to do after a `configure` timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutVerdict {
    /// Keep the process; the next attempt uses a longer deadline.
    Extend,
    /// The process is hung; kill it.
    Kill,
}

/// Consecutive `configure` timeouts for one synchronizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigureRetryState {
    consecutive_timeouts: u32,
}

impl ConfigureRetryState {
    /// Timeouts observed since the last reset.
    #[must_use]
    pub const fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Deadline for the next attempt.
    #[must_use]
    pub fn next_timeout(&self, base: Duration, cap: Duration) -> Duration {
        configure_timeout(base, cap, self.consecutive_timeouts)
    }

    /// Records a timeout. The second consecutive one yields
    /// [`TimeoutVerdict::Kill`] and resets the counter.
    pub const fn record_timeout(&mut self) -> TimeoutVerdict {
        self.consecutive_timeouts += 1;
        if self.consecutive_timeouts >= 2 {
            self.consecutive_timeouts = 0;
            TimeoutVerdict::Kill
        } else {
            TimeoutVerdict::Extend
        }
    }

    /// Clears the counter after a success or a non-timeout error.
    pub const fn reset(&mut self) {
        self.consecutive_timeouts = 0;
    }
}
