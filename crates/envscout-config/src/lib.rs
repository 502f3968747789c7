//! Shared configuration for the envscout locator client.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then an
//! optional `envscout.toml` (selected with `--config-path`), then `ENVSCOUT_*`
//! environment variables, and finally command-line flags. The resulting
//! [`Config`] describes how to launch the locator subprocess, which
//! directories it should search, and how patient the supervisor should be
//! with it.

mod defaults;
mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CONFIGURE_TIMEOUT_MS, DEFAULT_KILL_GRACE_MS, DEFAULT_LOCATOR_COMMAND,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_REFRESH_TIMEOUT_MS,
    DEFAULT_RESOLVE_TIMEOUT_MS, DEFAULT_RESTART_BACKOFF_MS, default_cache_directory,
    default_configure_timeout_ms, default_kill_grace_ms, default_locator_command,
    default_log_filter, default_log_filter_string, default_log_format,
    default_max_restart_attempts, default_refresh_timeout_ms, default_resolve_timeout_ms,
    default_restart_backoff_ms,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved configuration shared by the CLI and the locator client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "ENVSCOUT")]
pub struct Config {
    /// Locator executable, launched with the `server` argument.
    #[serde(default = "defaults::default_locator_command")]
    pub locator_command: PathBuf,
    /// Directory the locator uses for its own on-disk cache.
    #[serde(default)]
    pub cache_directory: Option<PathBuf>,
    /// Extra directories searched for environments on every refresh.
    #[serde(default)]
    pub environment_directories: Vec<PathBuf>,
    /// Explicit Conda executable overriding the locator's own lookup.
    #[serde(default)]
    pub conda_executable: Option<PathBuf>,
    /// Explicit Poetry executable overriding the locator's own lookup.
    #[serde(default)]
    pub poetry_executable: Option<PathBuf>,
    /// Explicit Pipenv executable overriding the locator's own lookup.
    #[serde(default)]
    pub pipenv_executable: Option<PathBuf>,
    /// Tracing filter expression.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Tracing output format.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
    /// Base deadline for `configure` requests, in milliseconds.
    #[serde(default = "defaults::default_configure_timeout_ms")]
    pub configure_timeout_ms: u64,
    /// Deadline for `refresh` requests, in milliseconds.
    #[serde(default = "defaults::default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Deadline for `resolve` requests, in milliseconds.
    #[serde(default = "defaults::default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Consecutive restart attempts allowed before failing permanently.
    #[serde(default = "defaults::default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    /// Backoff before the first restart attempt, in milliseconds.
    #[serde(default = "defaults::default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    /// Grace period between closing stdin and force-killing, in milliseconds.
    #[serde(default = "defaults::default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            locator_command: default_locator_command(),
            cache_directory: None,
            environment_directories: Vec::new(),
            conda_executable: None,
            poetry_executable: None,
            pipenv_executable: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            configure_timeout_ms: DEFAULT_CONFIGURE_TIMEOUT_MS,
            refresh_timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS,
            resolve_timeout_ms: DEFAULT_RESOLVE_TIMEOUT_MS,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            restart_backoff_ms: DEFAULT_RESTART_BACKOFF_MS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }
}

impl Config {
    /// Locator executable path.
    #[must_use]
    pub fn locator_command(&self) -> &Path {
        self.locator_command.as_path()
    }

    /// Cache directory handed to the locator, falling back to the platform
    /// cache directory.
    #[must_use]
    pub fn cache_directory(&self) -> PathBuf {
        self.cache_directory
            .clone()
            .unwrap_or_else(default_cache_directory)
    }

    /// Extra environment search directories.
    #[must_use]
    pub fn environment_directories(&self) -> &[PathBuf] {
        &self.environment_directories
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Tracing output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Base `configure` deadline.
    #[must_use]
    pub const fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.configure_timeout_ms)
    }

    /// `refresh` deadline.
    #[must_use]
    pub const fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// `resolve` deadline.
    #[must_use]
    pub const fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Restart budget.
    #[must_use]
    pub const fn max_restart_attempts(&self) -> u32 {
        self.max_restart_attempts
    }

    /// Backoff before the first restart attempt.
    #[must_use]
    pub const fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    /// Grace period granted to the locator before it is force-killed.
    #[must_use]
    pub const fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
