//! Entry point for the `envscout` binary.
//!
//! All work is delegated to [`envscout::run`] so the runtime can be driven
//! from tests with substituted streams.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    envscout::run(std::env::args_os(), &mut stdout, &mut stderr)
}
