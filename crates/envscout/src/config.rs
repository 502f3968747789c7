//! Configuration loading for the CLI.
//!
//! Leading flags understood by `ortho_config` are split off the argument list
//! before clap sees the subcommand, so `envscout --log-filter debug refresh`
//! configures logging instead of failing to parse.

use std::ffi::{OsStr, OsString};

use envscout_config::Config;
use ortho_config::OrthoConfig;

use crate::errors::AppError;

/// Flags consumed by the configuration loader. Keep in sync with the
/// fields of [`Config`] that are meant to be set per invocation.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--locator-command",
    "--cache-directory",
    "--log-filter",
    "--log-format",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading configuration flags.
    ///
    /// Configuration flags must precede the subcommand; later occurrences
    /// are left for clap and rejected there.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Stop;
    }
    let (flag, inline_value) = match text.split_once('=') {
        Some((name, _)) => (name, true),
        None => (&*text, false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments split into the loader's share and clap's share. Both keep the
/// program name in front.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_arguments(args: &[OsString]) -> ArgumentSplit {
    let mut remaining = args.iter();
    let program: Vec<OsString> = remaining.next().cloned().into_iter().collect();
    let mut config_arguments = program.clone();
    let mut pending_value = false;
    let mut rest = remaining.as_slice();

    while let Some((argument, tail)) = rest.split_first() {
        if pending_value {
            pending_value = false;
        } else {
            match classify(argument) {
                FlagAction::Include { needs_value } => pending_value = needs_value,
                FlagAction::Stop => break,
            }
        }
        config_arguments.push(argument.clone());
        rest = tail;
    }

    let mut command_arguments = program;
    command_arguments.extend(rest.iter().cloned());
    ArgumentSplit {
        config_arguments,
        command_arguments,
    }
}
