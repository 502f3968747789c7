//! Command-line front end for the envscout locator client.
//!
//! The runtime parses arguments, loads layered configuration, installs
//! telemetry, and then runs one `refresh` or `resolve` against a supervised
//! locator on a tokio runtime. Results are printed to stdout as JSON; the
//! locator is always disposed before the process exits so the result cache
//! is persisted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::warn;

mod cli;
mod command;
mod config;
mod errors;
pub mod telemetry;

#[cfg(test)]
mod tests;

use cli::Cli;
use command::{LocatorFactory, SystemLocatorFactory, execute};
use config::{ConfigLoader, OrthoConfigLoader, split_arguments};
use errors::AppError;

struct CliRunner<'a, L: ConfigLoader, F: LocatorFactory> {
    loader: &'a L,
    factory: &'a F,
}

impl<L: ConfigLoader, F: LocatorFactory> CliRunner<'_, L, F> {
    fn run<I, W, E>(&self, args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
        W: Write,
        E: Write,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_arguments(&args);

        let cli = match Cli::try_parse_from(&split.command_arguments) {
            Ok(cli) => cli,
            Err(error) => return report_usage(error, stdout, stderr),
        };

        match self.execute(cli, &split.config_arguments, stdout) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                drop(writeln!(stderr, "envscout: {error}"));
                ExitCode::FAILURE
            }
        }
    }

    fn execute<W: Write>(
        &self,
        cli: Cli,
        config_arguments: &[OsString],
        stdout: &mut W,
    ) -> Result<(), AppError> {
        let config = self.loader.load(config_arguments)?;
        telemetry::initialise(&config)?;
        let workspace = std::env::current_dir().map_err(AppError::WorkingDirectory)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(AppError::Runtime)?;

        runtime.block_on(async {
            let locator = self.factory.build(&config, workspace);
            let outcome = execute(&locator, cli.command, stdout).await;
            if let Err(error) = &outcome {
                warn!(target: "envscout::cli", %error, "command failed");
            }
            locator.dispose().await;
            outcome
        })
    }
}

fn report_usage<W: Write, E: Write>(
    error: clap::Error,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode {
    if matches!(
        error.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    ) {
        drop(write!(stdout, "{}", error.render()));
        return ExitCode::SUCCESS;
    }
    drop(write!(stderr, "{}", AppError::CliUsage(error)));
    ExitCode::from(2)
}

/// Runs the CLI with the given arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    CliRunner {
        loader: &OrthoConfigLoader,
        factory: &SystemLocatorFactory,
    }
    .run(args, stdout, stderr)
}
