//! Lifecycle events and locator log forwarding.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LocatorError;

const EVENTS_TARGET: &str = "envscout_locator::events";

/// Target under which the locator's own log messages are re-emitted.
const LOCATOR_LOG_TARGET: &str = "envscout_locator::locator_log";

/// Observer for supervisor lifecycle events.
pub trait LocatorEvents: Send + Sync {
    /// A locator process started.
    fn process_started(&self, generation: u64, pid: Option<u32>);

    /// The process was found dead or its output ended.
    fn process_exited(&self, generation: u64);

    /// The supervisor killed the process.
    fn process_killed(&self, generation: u64);

    /// Launching the process failed.
    fn spawn_failed(&self, error: &LocatorError);

    /// A restart will be attempted after `delay`.
    fn restart_scheduled(&self, attempt: u32, delay: Duration);

    /// No more restarts will be attempted.
    fn restart_budget_exhausted(&self, attempts: u32);

    /// The locator emitted a `telemetry` notification.
    fn telemetry(&self, payload: &Value);
}

impl<T> LocatorEvents for Arc<T>
where
    T: LocatorEvents + ?Sized,
{
    fn process_started(&self, generation: u64, pid: Option<u32>) {
        (**self).process_started(generation, pid);
    }

    fn process_exited(&self, generation: u64) {
        (**self).process_exited(generation);
    }

    fn process_killed(&self, generation: u64) {
        (**self).process_killed(generation);
    }

    fn spawn_failed(&self, error: &LocatorError) {
        (**self).spawn_failed(error);
    }

    fn restart_scheduled(&self, attempt: u32, delay: Duration) {
        (**self).restart_scheduled(attempt, delay);
    }

    fn restart_budget_exhausted(&self, attempts: u32) {
        (**self).restart_budget_exhausted(attempts);
    }

    fn telemetry(&self, payload: &Value) {
        (**self).telemetry(payload);
    }
}

/// Default observer that records events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLocatorEvents;

impl LocatorEvents for TracingLocatorEvents {
    fn process_started(&self, generation: u64, pid: Option<u32>) {
        tracing::info!(
            target: EVENTS_TARGET,
            event = "process_started",
            generation,
            pid,
            "locator started"
        );
    }

    fn process_exited(&self, generation: u64) {
        tracing::warn!(
            target: EVENTS_TARGET,
            event = "process_exited",
            generation,
            "locator exited unexpectedly"
        );
    }

    fn process_killed(&self, generation: u64) {
        tracing::info!(
            target: EVENTS_TARGET,
            event = "process_killed",
            generation,
            "locator killed"
        );
    }

    fn spawn_failed(&self, error: &LocatorError) {
        tracing::error!(
            target: EVENTS_TARGET,
            event = "spawn_failed",
            error = %error,
            "locator failed to start"
        );
    }

    fn restart_scheduled(&self, attempt: u32, delay: Duration) {
        tracing::info!(
            target: EVENTS_TARGET,
            event = "restart_scheduled",
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "restarting locator"
        );
    }

    fn restart_budget_exhausted(&self, attempts: u32) {
        tracing::error!(
            target: EVENTS_TARGET,
            event = "restart_budget_exhausted",
            attempts,
            "locator restart budget exhausted"
        );
    }

    fn telemetry(&self, payload: &Value) {
        tracing::debug!(
            target: EVENTS_TARGET,
            event = "telemetry",
            payload = %payload,
            "locator telemetry"
        );
    }
}

/// Severity of a locator `log` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LocatorLogLevel {
    Debug,
    Info,
    Warning,
    Error,
    #[serde(other)]
    Other,
}

/// Payload of a locator `log` notification.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LocatorLog {
    pub(crate) level: LocatorLogLevel,
    pub(crate) message: String,
}

/// Re-emits a locator `log` notification through tracing.
pub(crate) fn forward_locator_log(params: Value) {
    let log: LocatorLog = match serde_json::from_value(params) {
        Ok(log) => log,
        Err(error) => {
            tracing::debug!(
                target: LOCATOR_LOG_TARGET,
                error = %error,
                "malformed log notification"
            );
            return;
        }
    };
    let message = log.message.as_str();
    match log.level {
        LocatorLogLevel::Error => tracing::error!(target: LOCATOR_LOG_TARGET, "{message}"),
        LocatorLogLevel::Warning => tracing::warn!(target: LOCATOR_LOG_TARGET, "{message}"),
        LocatorLogLevel::Info => tracing::info!(target: LOCATOR_LOG_TARGET, "{message}"),
        LocatorLogLevel::Debug => tracing::debug!(target: LOCATOR_LOG_TARGET, "{message}"),
        LocatorLogLevel::Other => tracing::trace!(target: LOCATOR_LOG_TARGET, "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("info", LocatorLogLevel::Info)]
    #[case("warning", LocatorLogLevel::Warning)]
    #[case("error", LocatorLogLevel::Error)]
    #[case("debug", LocatorLogLevel::Debug)]
    #[case("trace", LocatorLogLevel::Other)]
    fn parses_log_levels(#[case] level: &str, #[case] expected: LocatorLogLevel) {
        let log: LocatorLog =
            serde_json::from_value(json!({"level": level, "message": "m"})).expect("log parses");

        assert_eq!(log.level, expected);
    }

    #[rstest]
    fn malformed_log_is_ignored() {
        forward_locator_log(json!({"text": "no level"}));
    }
}
