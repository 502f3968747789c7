//! End-to-end runs of the CLI against the scripted locator.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use envscout_config::{Config, LogFormat};
use envscout_locator::test_support::{FakeLocator, Reaction, fast_settings, locator_over};
use envscout_locator::{DiscoveredEnvironment, EnvironmentKind, Locator, RefreshScope};
use rstest::{fixture, rstest};
use serde_json::Value;

use crate::CliRunner;
use crate::cli::{Cli, CliCommand, refresh_scope};
use crate::command::LocatorFactory;
use crate::config::ConfigLoader;
use crate::errors::AppError;

struct StubLoader;

impl ConfigLoader for StubLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(Config {
            log_filter: String::from("off"),
            log_format: LogFormat::Compact,
            ..Config::default()
        })
    }
}

struct FakeFactory {
    fake: FakeLocator,
}

impl LocatorFactory for FakeFactory {
    fn build(&self, _config: &Config, _workspace: PathBuf) -> Locator {
        locator_over(&self.fake, fast_settings())
    }
}

struct Outcome {
    exit: ExitCode,
    stdout: String,
    stderr: String,
}

fn run_cli(fake: &FakeLocator, args: &[&str]) -> Outcome {
    let factory = FakeFactory { fake: fake.clone() };
    let runner = CliRunner {
        loader: &StubLoader,
        factory: &factory,
    };
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let argv = std::iter::once("envscout")
        .chain(args.iter().copied())
        .map(OsString::from);
    let exit = runner.run(argv, &mut stdout, &mut stderr);
    Outcome {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

#[fixture]
fn fake() -> FakeLocator {
    FakeLocator::new().with_environment(DiscoveredEnvironment {
        kind: Some(EnvironmentKind::Venv),
        version: Some(String::from("3.12.1")),
        prefix: Some(PathBuf::from("/proj/.venv")),
        ..DiscoveredEnvironment::for_executable("/proj/.venv/bin/python")
    })
}

#[rstest]
fn refresh_prints_records_as_json(fake: FakeLocator) {
    let outcome = run_cli(&fake, &["refresh", "--hard"]);

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "{}", outcome.stderr);
    let printed: Value = serde_json::from_str(&outcome.stdout).expect("json output");
    let records = printed.as_array().expect("array of records");
    assert_eq!(records.len(), 1);
    assert_eq!(
        records.first().and_then(|record| record.get("executable")),
        Some(&Value::from("/proj/.venv/bin/python"))
    );
    assert_eq!(fake.launches(), 1);
}

#[rstest]
fn resolve_failure_is_reported_on_stderr(fake: FakeLocator) {
    fake.react(
        "resolve",
        Reaction::Fail {
            code: -4,
            message: String::from("not an interpreter"),
        },
    );

    let outcome = run_cli(&fake, &["resolve", "/bin/sh"]);

    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stdout.is_empty());
    assert!(
        outcome.stderr.contains("not an interpreter"),
        "{}",
        outcome.stderr
    );
}

#[rstest]
fn help_goes_to_stdout(fake: FakeLocator) {
    let outcome = run_cli(&fake, &["--help"]);

    assert_eq!(outcome.exit, ExitCode::SUCCESS);
    assert!(outcome.stdout.contains("refresh"));
    assert_eq!(fake.launches(), 0);
}

#[rstest]
fn usage_errors_exit_with_two(fake: FakeLocator) {
    let outcome = run_cli(&fake, &["refresh", "--kind", "snake-oil"]);

    assert_eq!(outcome.exit, ExitCode::from(2));
    assert!(outcome.stderr.contains("snake-oil"), "{}", outcome.stderr);
    assert_eq!(fake.launches(), 0);
}

#[rstest]
#[case(None, &[], RefreshScope::All)]
#[case(Some(EnvironmentKind::Conda), &[], RefreshScope::Kind(EnvironmentKind::Conda))]
#[case(None, &["/srv"], RefreshScope::Locations(vec![PathBuf::from("/srv")]))]
fn refresh_flags_select_scope(
    #[case] kind: Option<EnvironmentKind>,
    #[case] paths: &[&str],
    #[case] expected: RefreshScope,
) {
    let owned: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();

    assert_eq!(refresh_scope(kind, &owned), expected);
}

#[rstest]
fn kind_and_path_are_exclusive() {
    let parsed = Cli::try_parse_from([
        "envscout", "refresh", "--kind", "conda", "--path", "/x",
    ]);

    assert!(parsed.is_err());
}

#[rstest]
fn resolve_takes_one_executable() {
    let parsed = Cli::try_parse_from(["envscout", "resolve", "/usr/bin/python3"]).expect("parses");

    assert_eq!(
        parsed.command,
        CliCommand::Resolve {
            executable: PathBuf::from("/usr/bin/python3")
        }
    );
}
