//! Scripted in-memory locator for tests.
//!
//! [`FakeLocator`] implements [`crate::LocatorLauncher`]. Each launch starts
//! a task that speaks the locator protocol over in-memory pipes, answers
//! according to its script, and records every message it receives.

mod fake_locator;

pub use fake_locator::{FakeEvent, FakeLocator, Reaction};

use std::path::PathBuf;
use std::sync::Arc;

use envscout_config::Config;

use crate::configure::StaticConfigurationSource;
use crate::events::TracingLocatorEvents;
use crate::locator::Locator;
use crate::restart::RestartPolicy;
use crate::settings::LocatorSettings;

/// Settings with short deadlines suitable for tests.
#[must_use]
pub fn fast_settings() -> LocatorSettings {
    LocatorSettings {
        restart: RestartPolicy {
            max_attempts: 3,
            backoff: std::time::Duration::from_millis(1),
        },
        kill_grace: std::time::Duration::from_millis(20),
        configure_timeout: std::time::Duration::from_millis(200),
        refresh_timeout: std::time::Duration::from_millis(400),
        resolve_timeout: std::time::Duration::from_millis(200),
    }
}

/// Builds a [`Locator`] over `fake` with `/proj` as the only workspace root.
#[must_use]
pub fn locator_over(fake: &FakeLocator, settings: LocatorSettings) -> Locator {
    let source = StaticConfigurationSource::new(
        &Config {
            cache_directory: Some(PathBuf::from("/tmp/envscout-test-cache")),
            ..Config::default()
        },
        vec![PathBuf::from("/proj")],
    );
    Locator::new(
        settings,
        Arc::new(fake.clone()),
        Arc::new(source),
        Arc::new(TracingLocatorEvents),
    )
}
