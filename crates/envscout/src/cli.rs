//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use envscout_locator::{EnvironmentKind, RefreshScope};

/// Discover Python environments through a supervised locator process.
#[derive(Parser, Debug)]
#[command(name = "envscout", disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Operations offered by the binary.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Lists environments and managers, from cache unless `--hard` is given.
    Refresh {
        /// Ignore cached results and query the locator.
        #[arg(long)]
        hard: bool,
        /// Restrict discovery to one environment kind (for example `conda`).
        #[arg(long, value_name = "KIND", conflicts_with = "path")]
        kind: Option<EnvironmentKind>,
        /// Restrict discovery to these directories.
        #[arg(long, value_name = "DIR")]
        path: Vec<PathBuf>,
    },
    /// Fully describes a single interpreter.
    Resolve {
        /// Interpreter executable.
        #[arg(value_name = "EXECUTABLE")]
        executable: PathBuf,
    },
}

/// Scope requested by a `refresh` invocation.
pub(crate) fn refresh_scope(kind: Option<EnvironmentKind>, paths: &[PathBuf]) -> RefreshScope {
    match kind {
        Some(selected) => RefreshScope::Kind(selected),
        None if paths.is_empty() => RefreshScope::All,
        None => RefreshScope::Locations(paths.to_vec()),
    }
}
