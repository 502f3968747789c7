//! Pushes discovery configuration to the locator only when it changed.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use envscout_config::Config;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::LocatorError;
use crate::retry::{ConfigureRetryState, TimeoutVerdict};
use crate::supervisor::{ProcessSupervisor, RunningLocator};

const CONFIGURE_TARGET: &str = "envscout_locator::configure";

/// Explicit manager executables overriding the locator's own lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOverrides {
    /// Conda executable.
    pub conda: Option<PathBuf>,
    /// Poetry executable.
    pub poetry: Option<PathBuf>,
    /// Pipenv executable.
    pub pipenv: Option<PathBuf>,
}

/// Supplies the inputs of a [`DiscoveryConfiguration`].
#[cfg_attr(test, mockall::automock)]
pub trait ConfigurationSource: Send + Sync {
    /// Project roots to search.
    fn workspace_directories(&self) -> Vec<PathBuf>;

    /// Extra directories that always take part in discovery.
    fn environment_directories(&self) -> Vec<PathBuf>;

    /// Manager executable overrides.
    fn tool_overrides(&self) -> ToolOverrides;

    /// Directory for the locator's own on-disk cache.
    fn cache_directory(&self) -> Option<PathBuf>;
}

/// Fixed workspace roots plus settings taken from [`Config`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticConfigurationSource {
    workspace_directories: Vec<PathBuf>,
    environment_directories: Vec<PathBuf>,
    tools: ToolOverrides,
    cache_directory: Option<PathBuf>,
}

impl StaticConfigurationSource {
    /// Builds a source from configuration and the given workspace roots.
    #[must_use]
    pub fn new(config: &Config, workspace_directories: Vec<PathBuf>) -> Self {
        Self {
            workspace_directories,
            environment_directories: config.environment_directories().to_vec(),
            tools: ToolOverrides {
                conda: config.conda_executable.clone(),
                poetry: config.poetry_executable.clone(),
                pipenv: config.pipenv_executable.clone(),
            },
            cache_directory: Some(config.cache_directory()),
        }
    }
}

impl ConfigurationSource for StaticConfigurationSource {
    fn workspace_directories(&self) -> Vec<PathBuf> {
        self.workspace_directories.clone()
    }

    fn environment_directories(&self) -> Vec<PathBuf> {
        self.environment_directories.clone()
    }

    fn tool_overrides(&self) -> ToolOverrides {
        self.tools.clone()
    }

    fn cache_directory(&self) -> Option<PathBuf> {
        self.cache_directory.clone()
    }
}

/// Parameters of the `configure` request.
///
/// Equality ignores the order and repetition of path lists so that a
/// reshuffled setting does not trigger a reconfiguration.
#[derive(Debug, Clone, Default, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfiguration {
    /// Project roots.
    pub workspace_directories: Vec<PathBuf>,
    /// Extra search directories.
    pub environment_directories: Vec<PathBuf>,
    /// Conda executable override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conda_executable: Option<PathBuf>,
    /// Poetry executable override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poetry_executable: Option<PathBuf>,
    /// Pipenv executable override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipenv_executable: Option<PathBuf>,
    /// Locator cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<PathBuf>,
}

fn as_set(paths: &[PathBuf]) -> BTreeSet<&Path> {
    paths.iter().map(PathBuf::as_path).collect()
}

impl PartialEq for DiscoveryConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.conda_executable == other.conda_executable
            && self.poetry_executable == other.poetry_executable
            && self.pipenv_executable == other.pipenv_executable
            && self.cache_directory == other.cache_directory
            && as_set(&self.workspace_directories) == as_set(&other.workspace_directories)
            && as_set(&self.environment_directories) == as_set(&other.environment_directories)
    }
}

impl DiscoveryConfiguration {
    /// Reads the current configuration from `source`.
    #[must_use]
    pub fn collect(source: &dyn ConfigurationSource) -> Self {
        let tools = source.tool_overrides();
        Self {
            workspace_directories: source.workspace_directories(),
            environment_directories: source.environment_directories(),
            conda_executable: tools.conda,
            poetry_executable: tools.poetry,
            pipenv_executable: tools.pipenv,
            cache_directory: source.cache_directory(),
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    last_sent: Option<(u64, DiscoveryConfiguration)>,
    retry: ConfigureRetryState,
}

/// Deadlines for `configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureTimeouts {
    /// Deadline with no prior timeouts.
    pub base: Duration,
    /// Upper bound after escalation.
    pub cap: Duration,
}

/// Sends `configure` when the configuration or the process changed.
pub struct ConfigurationSynchronizer {
    source: Arc<dyn ConfigurationSource>,
    supervisor: Arc<ProcessSupervisor>,
    timeouts: ConfigureTimeouts,
    state: Mutex<SyncState>,
}

impl std::fmt::Debug for ConfigurationSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationSynchronizer")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl ConfigurationSynchronizer {
    /// Creates a synchronizer that has not sent anything yet.
    #[must_use]
    pub fn new(
        source: Arc<dyn ConfigurationSource>,
        supervisor: Arc<ProcessSupervisor>,
        timeouts: ConfigureTimeouts,
    ) -> Self {
        Self {
            source,
            supervisor,
            timeouts,
            state: Mutex::new(SyncState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Consecutive `configure` timeouts so far.
    #[must_use]
    pub fn consecutive_timeouts(&self) -> u32 {
        self.lock_state().retry.consecutive_timeouts()
    }

    /// Ensures `running` has the current configuration and returns it.
    ///
    /// A first timeout lengthens the next deadline and leaves the process
    /// alone; a second consecutive timeout kills it.
    ///
    /// # Errors
    ///
    /// Returns the request failure. Timeouts surface as
    /// [`LocatorError::Timeout`].
    pub async fn configure(
        &self,
        running: &RunningLocator,
    ) -> Result<DiscoveryConfiguration, LocatorError> {
        let config = DiscoveryConfiguration::collect(self.source.as_ref());

        let timeout = {
            let state = self.lock_state();
            if let Some((generation, sent)) = &state.last_sent
                && *generation == running.generation
                && *sent == config
            {
                debug!(
                    target: CONFIGURE_TARGET,
                    generation = running.generation,
                    "configuration unchanged; skipping configure"
                );
                return Ok(config);
            }
            state.retry.next_timeout(self.timeouts.base, self.timeouts.cap)
        };

        let params = serde_json::to_value(&config)
            .map_err(|error| LocatorError::Channel(error.into()))?;
        debug!(
            target: CONFIGURE_TARGET,
            generation = running.generation,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "sending configure"
        );

        match running.channel.request("configure", Some(params), timeout).await {
            Ok(_) => {
                let mut state = self.lock_state();
                state.retry.reset();
                state.last_sent = Some((running.generation, config.clone()));
                drop(state);
                self.supervisor.record_success();
                Ok(config)
            }
            Err(error) if error.is_timeout() => {
                let verdict = self.lock_state().retry.record_timeout();
                match verdict {
                    TimeoutVerdict::Extend => {
                        warn!(
                            target: CONFIGURE_TARGET,
                            generation = running.generation,
                            "configure timed out; extending next deadline"
                        );
                    }
                    TimeoutVerdict::Kill => {
                        warn!(
                            target: CONFIGURE_TARGET,
                            generation = running.generation,
                            "configure timed out twice; killing locator"
                        );
                        self.supervisor.kill_generation(running.generation).await;
                    }
                }
                Err(error.into())
            }
            Err(error) => {
                self.lock_state().retry.reset();
                Err(error.into())
            }
        }
    }
}
