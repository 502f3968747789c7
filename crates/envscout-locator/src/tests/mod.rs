//! Behavioural tests driving the client against the scripted locator.

mod locator_behaviour;

use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::error::LocatorError;
use crate::events::LocatorEvents;
use crate::records::{DiscoveredEnvironment, EnvironmentKind};

/// Lifecycle events captured as short labels.
#[derive(Debug, Default)]
pub(crate) struct RecordingEvents {
    seen: Mutex<Vec<String>>,
}

impl RecordingEvents {
    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("events lock").clone()
    }

    fn push(&self, label: String) {
        self.seen.lock().expect("events lock").push(label);
    }
}

impl LocatorEvents for RecordingEvents {
    fn process_started(&self, generation: u64, _pid: Option<u32>) {
        self.push(format!("started {generation}"));
    }

    fn process_exited(&self, generation: u64) {
        self.push(format!("exited {generation}"));
    }

    fn process_killed(&self, generation: u64) {
        self.push(format!("killed {generation}"));
    }

    fn spawn_failed(&self, _error: &LocatorError) {
        self.push(String::from("spawn failed"));
    }

    fn restart_scheduled(&self, attempt: u32, _delay: Duration) {
        self.push(format!("restart {attempt}"));
    }

    fn restart_budget_exhausted(&self, attempts: u32) {
        self.push(format!("exhausted {attempts}"));
    }

    fn telemetry(&self, _payload: &Value) {
        self.push(String::from("telemetry"));
    }
}

/// A fully described environment that needs no follow-up `resolve`.
pub(crate) fn resolved_environment(kind: EnvironmentKind, path: &str) -> DiscoveredEnvironment {
    let executable = PathBuf::from(path);
    let prefix = executable
        .parent()
        .and_then(std::path::Path::parent)
        .map(PathBuf::from);
    DiscoveredEnvironment {
        kind: Some(kind),
        version: Some(String::from("3.12.1")),
        prefix,
        ..DiscoveredEnvironment::for_executable(executable)
    }
}

#[derive(Clone, Debug, Default)]
struct LogBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `future` on a current-thread runtime and returns what it logged.
pub(crate) fn with_captured_logs<F: Future>(future: F) -> (F::Output, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();
    let output = tracing::subscriber::with_default(subscriber, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime")
            .block_on(future)
    });
    let logs = String::from_utf8_lossy(&buffer.bytes.lock().expect("log buffer")).into_owned();
    (output, logs)
}
