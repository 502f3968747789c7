//! Deadlines and budgets used by [`crate::Locator`].

use std::time::Duration;

use envscout_config::Config;

use crate::configure::ConfigureTimeouts;
use crate::restart::RestartPolicy;
use crate::supervisor::SupervisorSettings;

/// Runtime settings of the locator client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorSettings {
    /// Restart budget and backoff.
    pub restart: RestartPolicy,
    /// Grace period between closing stdin and force-killing.
    pub kill_grace: Duration,
    /// Base `configure` deadline.
    pub configure_timeout: Duration,
    /// `refresh` deadline; also caps `configure` escalation.
    pub refresh_timeout: Duration,
    /// `resolve` deadline.
    pub resolve_timeout: Duration,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LocatorSettings {
    /// Extracts the settings from configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            restart: RestartPolicy::from_config(config),
            kill_grace: config.kill_grace(),
            configure_timeout: config.configure_timeout(),
            refresh_timeout: config.refresh_timeout(),
            resolve_timeout: config.resolve_timeout(),
        }
    }

    pub(crate) const fn supervisor(&self) -> SupervisorSettings {
        SupervisorSettings {
            restart: self.restart,
            kill_grace: self.kill_grace,
        }
    }

    pub(crate) const fn configure_timeouts(&self) -> ConfigureTimeouts {
        ConfigureTimeouts {
            base: self.configure_timeout,
            cap: self.refresh_timeout,
        }
    }
}
