use std::env;
use std::path::PathBuf;

#[cfg(unix)]
use dirs::cache_dir;

/// Locator executable used when none is configured.
pub const DEFAULT_LOCATOR_COMMAND: &str = "pet";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Base deadline for `configure`, doubled on each consecutive timeout.
pub const DEFAULT_CONFIGURE_TIMEOUT_MS: u64 = 30_000;

/// Deadline for a full `refresh` pass; also caps the `configure` escalation.
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 120_000;

/// Deadline for a single `resolve` call.
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 30_000;

/// Consecutive restart attempts allowed before the supervisor gives up.
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;

/// Backoff before the first restart; doubled per consecutive attempt.
pub const DEFAULT_RESTART_BACKOFF_MS: u64 = 1_000;

/// Grace period between closing the locator's stdin and killing it.
pub const DEFAULT_KILL_GRACE_MS: u64 = 1_000;

/// Default locator executable.
pub fn default_locator_command() -> PathBuf {
    PathBuf::from(DEFAULT_LOCATOR_COMMAND)
}

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Serde default for [`crate::Config::configure_timeout_ms`].
pub fn default_configure_timeout_ms() -> u64 {
    DEFAULT_CONFIGURE_TIMEOUT_MS
}

/// Serde default for [`crate::Config::refresh_timeout_ms`].
pub fn default_refresh_timeout_ms() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_MS
}

/// Serde default for [`crate::Config::resolve_timeout_ms`].
pub fn default_resolve_timeout_ms() -> u64 {
    DEFAULT_RESOLVE_TIMEOUT_MS
}

/// Serde default for [`crate::Config::max_restart_attempts`].
pub fn default_max_restart_attempts() -> u32 {
    DEFAULT_MAX_RESTART_ATTEMPTS
}

/// Serde default for [`crate::Config::restart_backoff_ms`].
pub fn default_restart_backoff_ms() -> u64 {
    DEFAULT_RESTART_BACKOFF_MS
}

/// Serde default for [`crate::Config::kill_grace_ms`].
pub fn default_kill_grace_ms() -> u64 {
    DEFAULT_KILL_GRACE_MS
}

/// Computes the cache directory handed to the locator.
pub fn default_cache_directory() -> PathBuf {
    let mut base = platform_cache_base().unwrap_or_else(env::temp_dir);
    base.push("envscout");
    base
}

#[cfg(unix)]
fn platform_cache_base() -> Option<PathBuf> {
    cache_dir()
}

#[cfg(not(unix))]
fn platform_cache_base() -> Option<PathBuf> {
    env::var_os("LOCALAPPDATA").map(PathBuf::from)
}
