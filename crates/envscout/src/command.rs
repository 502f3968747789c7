//! Execution of parsed commands against a locator client.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use envscout_config::Config;
use envscout_locator::{
    CACHE_FILE_NAME, Locator, LocatorSettings, ResultCache, StaticConfigurationSource,
    TokioLauncher, TracingLocatorEvents,
};
use serde::Serialize;
use tracing::debug;

use crate::cli::{CliCommand, refresh_scope};
use crate::errors::AppError;

const CLI_TARGET: &str = "envscout::cli";

/// Builds the locator client a command runs against.
pub(crate) trait LocatorFactory {
    fn build(&self, config: &Config, workspace: PathBuf) -> Locator;
}

/// Launches the configured locator executable and persists results in the
/// configured cache directory.
pub(crate) struct SystemLocatorFactory;

impl LocatorFactory for SystemLocatorFactory {
    fn build(&self, config: &Config, workspace: PathBuf) -> Locator {
        let cache_path = config.cache_directory().join(CACHE_FILE_NAME);
        debug!(target: CLI_TARGET, cache = %cache_path.display(), "opening result cache");
        Locator::new(
            LocatorSettings::from_config(config),
            Arc::new(TokioLauncher::new(config.locator_command())),
            Arc::new(StaticConfigurationSource::new(config, vec![workspace])),
            Arc::new(TracingLocatorEvents),
        )
        .with_cache(ResultCache::open(cache_path))
    }
}

/// Runs `command` and writes its JSON result to `stdout`.
pub(crate) async fn execute<W: Write>(
    locator: &Locator,
    command: CliCommand,
    stdout: &mut W,
) -> Result<(), AppError> {
    match command {
        CliCommand::Refresh { hard, kind, path } => {
            let scope = refresh_scope(kind, &path);
            let records = locator.refresh(hard, scope).await?;
            write_json(stdout, &records)
        }
        CliCommand::Resolve { executable } => {
            let environment = locator.resolve(&executable).await?;
            write_json(stdout, &environment)
        }
    }
}

fn write_json<W: Write, T: Serialize + ?Sized>(stdout: &mut W, value: &T) -> Result<(), AppError> {
    serde_json::to_writer_pretty(&mut *stdout, value).map_err(AppError::SerialiseOutput)?;
    writeln!(stdout).map_err(AppError::WriteOutput)
}
