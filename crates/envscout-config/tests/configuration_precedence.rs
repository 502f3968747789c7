//! Layering behaviour of the `ortho_config` loader.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use envscout_config::{Config, DEFAULT_LOCATOR_COMMAND, LogFormat};
use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::rstest;
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` in edition 2024; the override is
        // restored in `Drop` while the mutex is still held.
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
    }
}

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("envscout.toml");
    fs::write(&path, contents).expect("write configuration file");
    path
}

fn load(args: &[&OsStr]) -> Config {
    let mut argv = vec![OsString::from("envscout")];
    argv.extend(args.iter().map(|arg| arg.to_os_string()));
    Config::load_from_iter(argv).expect("configuration loads")
}

#[rstest]
fn built_in_defaults_apply_without_overrides() {
    let _guard = ENV_MUTEX
        .lock()
        .unwrap_or_else(|poison| poison.into_inner());

    let config = load(&[]);

    assert_eq!(config.locator_command, PathBuf::from(DEFAULT_LOCATOR_COMMAND));
    assert!(config.environment_directories.is_empty());
    assert_eq!(config.log_format(), LogFormat::Json);
}

#[rstest]
fn file_values_override_defaults() {
    let _guard = ENV_MUTEX
        .lock()
        .unwrap_or_else(|poison| poison.into_inner());
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(
        &dir,
        "locator_command = \"/opt/pet/bin/pet\"\nrefresh_timeout_ms = 5000\n",
    );

    let config = load(&[OsStr::new("--config-path"), path.as_os_str()]);

    assert_eq!(config.locator_command, PathBuf::from("/opt/pet/bin/pet"));
    assert_eq!(config.refresh_timeout_ms, 5000);
}

#[rstest]
fn environment_overrides_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "locator_command = \"/from/file\"\n");
    let _env = EnvOverride::set_var("ENVSCOUT_LOCATOR_COMMAND", OsStr::new("/from/env"));

    let config = load(&[OsStr::new("--config-path"), path.as_os_str()]);

    assert_eq!(config.locator_command, PathBuf::from("/from/env"));
}

#[rstest]
fn cli_overrides_environment() {
    let _env = EnvOverride::set_var("ENVSCOUT_LOCATOR_COMMAND", OsStr::new("/from/env"));

    let config = load(&[OsStr::new("--locator-command"), OsStr::new("/from/cli")]);

    assert_eq!(config.locator_command, PathBuf::from("/from/cli"));
}
