//! Launching and terminating the locator subprocess.
//!
//! The supervisor only sees the [`LocatorLauncher`] and [`LocatorProcess`]
//! traits, so tests can substitute an in-memory locator for a real child.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::LocatorError;
use crate::transport::{BoxedReader, BoxedWriter};

/// Log target for process lifecycle events.
pub(crate) const PROCESS_TARGET: &str = "envscout_locator::process";

/// Log target for lines the locator writes to stderr.
const STDERR_TARGET: &str = "envscout_locator::stderr";

/// Argument selecting the locator's JSON-RPC server mode.
const SERVER_ARGUMENT: &str = "server";

/// A started locator: its stdio streams and a handle on the process.
pub struct LaunchedLocator {
    /// The locator's stdout.
    pub stdout: BoxedReader,
    /// The locator's stdin.
    pub stdin: BoxedWriter,
    /// The locator's stderr, when captured.
    pub stderr: Option<BoxedReader>,
    /// Process handle used for exit checks and termination.
    pub process: Box<dyn LocatorProcess>,
}

impl std::fmt::Debug for LaunchedLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedLocator")
            .field("pid", &self.process.id())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Starts locator processes.
pub trait LocatorLauncher: Send + Sync {
    /// Command used for launching, reported in diagnostics.
    fn command(&self) -> &Path;

    /// Starts a fresh locator.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::BinaryNotFound`] when the executable is
    /// missing and [`LocatorError::SpawnFailed`] for any other failure.
    fn launch(&self) -> Result<LaunchedLocator, LocatorError>;
}

/// A running locator process.
#[async_trait]
pub trait LocatorProcess: Send {
    /// Operating system process id, if known.
    fn id(&self) -> Option<u32>;

    /// Whether the process has exited. Never blocks.
    fn has_exited(&mut self) -> bool;

    /// Waits up to `grace` for the process to exit on its own, then kills it.
    async fn terminate(&mut self, grace: Duration);
}

/// Launches the locator as a tokio child process running `<command> server`.
#[derive(Debug, Clone)]
pub struct TokioLauncher {
    command: PathBuf,
    args: Vec<String>,
}

impl TokioLauncher {
    /// Creates a launcher for `command` in server mode.
    #[must_use]
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: vec![String::from(SERVER_ARGUMENT)],
        }
    }

    /// Replaces the arguments passed to the locator.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn spawn_error(&self, error: io::Error) -> LocatorError {
        if error.kind() == io::ErrorKind::NotFound {
            LocatorError::BinaryNotFound {
                command: self.command.clone(),
                source: Arc::new(error),
            }
        } else {
            LocatorError::SpawnFailed {
                message: format!("failed to start {}", self.command.display()),
                source: Some(Arc::new(error)),
            }
        }
    }
}

fn missing_stream(stream: &str) -> LocatorError {
    LocatorError::SpawnFailed {
        message: format!("failed to capture locator {stream}"),
        source: None,
    }
}

impl LocatorLauncher for TokioLauncher {
    fn command(&self) -> &Path {
        &self.command
    }

    fn launch(&self) -> Result<LaunchedLocator, LocatorError> {
        debug!(
            target: PROCESS_TARGET,
            command = %self.command.display(),
            args = ?self.args,
            "spawning locator process"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| self.spawn_error(error))?;

        let stdin = child.stdin.take().ok_or_else(|| missing_stream("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_stream("stdout"))?;
        let stderr = child.stderr.take();

        debug!(
            target: PROCESS_TARGET,
            pid = child.id(),
            "locator process spawned"
        );

        Ok(LaunchedLocator {
            stdout: Box::pin(stdout),
            stdin: Box::pin(stdin),
            stderr: stderr.map(|stream| Box::pin(stream) as BoxedReader),
            process: Box::new(ChildProcess { child }),
        })
    }
}

/// [`LocatorProcess`] backed by a tokio child.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

#[async_trait]
impl LocatorProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    error = %error,
                    "failed to check locator status; assuming it exited"
                );
                true
            }
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        terminate_child(&mut self.child, grace).await;
    }
}

async fn terminate_child(child: &mut Child, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(target: PROCESS_TARGET, ?status, "locator already exited");
        return;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(target: PROCESS_TARGET, ?status, "locator exited during grace period");
        }
        Ok(Err(error)) => {
            warn!(target: PROCESS_TARGET, error = %error, "failed to wait for locator; killing");
            force_kill(child).await;
        }
        Err(_elapsed) => {
            warn!(
                target: PROCESS_TARGET,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "locator did not exit gracefully; killing"
            );
            force_kill(child).await;
        }
    }
}

async fn force_kill(child: &mut Child) {
    if let Err(error) = child.start_kill() {
        debug!(target: PROCESS_TARGET, error = %error, "kill signal failed");
    }
    match child.wait().await {
        Ok(status) => debug!(target: PROCESS_TARGET, ?status, "locator killed"),
        Err(error) => warn!(target: PROCESS_TARGET, error = %error, "failed to reap locator"),
    }
}

/// Copies the locator's stderr into the diagnostic log, line by line.
pub(crate) async fn forward_stderr(stderr: BoxedReader, generation: u64) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: STDERR_TARGET, generation, "{line}"),
            Ok(None) => break,
            Err(error) => {
                debug!(target: STDERR_TARGET, generation, error = %error, "stderr closed");
                break;
            }
        }
    }
}
