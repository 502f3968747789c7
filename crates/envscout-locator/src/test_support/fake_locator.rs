//! The scripted locator itself.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream, duplex};
use tokio::task::JoinHandle;

use crate::error::LocatorError;
use crate::process::{LaunchedLocator, LocatorLauncher, LocatorProcess};
use crate::records::{DiscoveredEnvironment, DiscoveredManagerTool};
use crate::transport::{FrameReader, FrameWriter};

const PIPE_CAPACITY: usize = 64 * 1024;

/// How the fake answers one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Answer normally.
    Reply,
    /// Never answer.
    Hang,
    /// Close the pipes and exit without answering.
    Crash,
    /// Answer with a JSON-RPC error.
    Fail {
        /// Error code.
        code: i64,
        /// Error message.
        message: String,
    },
}

/// Something the fake observed or did, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeEvent {
    /// A process was launched.
    Launched {
        /// Launch number, starting at 1.
        launch: u32,
    },
    /// A request or notification arrived.
    Received {
        /// Launch that received it.
        launch: u32,
        /// JSON-RPC method.
        method: String,
        /// Parameters, or `null`.
        params: Value,
    },
    /// A notification was sent to the client.
    Notified {
        /// Launch that sent it.
        launch: u32,
        /// Notification method.
        method: String,
    },
    /// A request was answered.
    Answered {
        /// Launch that answered.
        launch: u32,
        /// JSON-RPC method.
        method: String,
    },
}

#[derive(Debug, Default)]
struct Script {
    environments: Vec<DiscoveredEnvironment>,
    managers: Vec<DiscoveredManagerTool>,
    resolutions: HashMap<PathBuf, DiscoveredEnvironment>,
    reactions: HashMap<String, VecDeque<Reaction>>,
    failing_spawns: u32,
    notification_delay: Option<Duration>,
    chatter: Vec<(String, Value)>,
}

#[derive(Debug, Default)]
struct FakeState {
    script: Script,
    events: Vec<FakeEvent>,
    launches: u32,
    spawn_attempts: u32,
}

/// Scripted locator; clones share the same script and recording.
#[derive(Debug, Clone, Default)]
pub struct FakeLocator {
    state: Arc<Mutex<FakeState>>,
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl FakeLocator {
    /// Creates a locator that answers every request and discovers nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment reported on every matching `refresh`.
    #[must_use]
    pub fn with_environment(self, environment: DiscoveredEnvironment) -> Self {
        lock(&self.state).script.environments.push(environment);
        self
    }

    /// Adds a manager reported on every unrestricted `refresh`.
    #[must_use]
    pub fn with_manager(self, manager: DiscoveredManagerTool) -> Self {
        lock(&self.state).script.managers.push(manager);
        self
    }

    /// Answers `resolve` for `executable` with `environment`.
    #[must_use]
    pub fn with_resolution(
        self,
        executable: impl Into<PathBuf>,
        environment: DiscoveredEnvironment,
    ) -> Self {
        lock(&self.state)
            .script
            .resolutions
            .insert(executable.into(), environment);
        self
    }

    /// Makes the first `count` launches fail.
    #[must_use]
    pub fn with_failing_spawns(self, count: u32) -> Self {
        lock(&self.state).script.failing_spawns = count;
        self
    }

    /// Pauses between streamed notifications.
    #[must_use]
    pub fn with_notification_delay(self, delay: Duration) -> Self {
        lock(&self.state).script.notification_delay = Some(delay);
        self
    }

    /// Sends a notification before answering every `configure`.
    #[must_use]
    pub fn with_chatter(self, method: &str, params: Value) -> Self {
        lock(&self.state)
            .script
            .chatter
            .push((method.to_owned(), params));
        self
    }

    /// Queues a reaction for the next unscripted request named `method`.
    pub fn react(&self, method: &str, reaction: Reaction) {
        lock(&self.state)
            .script
            .reactions
            .entry(method.to_owned())
            .or_default()
            .push_back(reaction);
    }

    /// Makes every later launch fail.
    pub fn fail_all_spawns(&self) {
        lock(&self.state).script.failing_spawns = u32::MAX;
    }

    /// Successful launches so far.
    #[must_use]
    pub fn launches(&self) -> u32 {
        lock(&self.state).launches
    }

    /// Launch attempts so far, including failed ones.
    #[must_use]
    pub fn spawn_attempts(&self) -> u32 {
        lock(&self.state).spawn_attempts
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<FakeEvent> {
        lock(&self.state).events.clone()
    }

    /// Parameters of every received message named `method`.
    #[must_use]
    pub fn received(&self, method: &str) -> Vec<Value> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|event| match event {
                FakeEvent::Received {
                    method: name,
                    params,
                    ..
                } if name == method => Some(params.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: FakeEvent) {
        lock(&self.state).events.push(event);
    }

    fn next_reaction(&self, method: &str) -> Reaction {
        lock(&self.state)
            .script
            .reactions
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reaction::Reply)
    }

    fn refresh_notifications(&self, params: &Value) -> Vec<(&'static str, Value)> {
        let search_kind = params.get("searchKind").and_then(Value::as_str);
        let search_paths: Option<Vec<PathBuf>> = params
            .get("searchPaths")
            .and_then(|paths| serde_json::from_value(paths.clone()).ok());
        let state = lock(&self.state);

        let environments = state.script.environments.iter().filter(|environment| {
            let kind_matches = search_kind.is_none_or(|kind| {
                environment
                    .kind
                    .is_some_and(|candidate| candidate.as_str() == kind)
            });
            let path_matches = search_paths.as_ref().is_none_or(|paths| {
                environment
                    .executable()
                    .is_some_and(|executable| paths.iter().any(|root| executable.starts_with(root)))
            });
            kind_matches && path_matches
        });
        let mut notifications: Vec<(&'static str, Value)> = environments
            .filter_map(|environment| serde_json::to_value(environment).ok())
            .map(|value| ("environment", value))
            .collect();
        if search_kind.is_none() && search_paths.is_none() {
            notifications.extend(
                state
                    .script
                    .managers
                    .iter()
                    .filter_map(|manager| serde_json::to_value(manager).ok())
                    .map(|value| ("manager", value)),
            );
        }
        notifications
    }

    fn resolution(&self, executable: &Path) -> Option<DiscoveredEnvironment> {
        lock(&self.state).script.resolutions.get(executable).cloned()
    }

    fn notification_delay(&self) -> Option<Duration> {
        lock(&self.state).script.notification_delay
    }

    fn chatter(&self) -> Vec<(String, Value)> {
        lock(&self.state).script.chatter.clone()
    }
}

impl LocatorLauncher for FakeLocator {
    fn command(&self) -> &Path {
        Path::new("fake-locator")
    }

    fn launch(&self) -> Result<LaunchedLocator, LocatorError> {
        let launch = {
            let mut state = lock(&self.state);
            state.spawn_attempts += 1;
            if state.script.failing_spawns > 0 {
                state.script.failing_spawns = state.script.failing_spawns.saturating_sub(1);
                return Err(LocatorError::SpawnFailed {
                    message: String::from("scripted spawn failure"),
                    source: None,
                });
            }
            state.launches += 1;
            state.launches
        };
        self.record(FakeEvent::Launched { launch });

        let (client_stdin, server_stdin) = duplex(PIPE_CAPACITY);
        let (server_stdout, client_stdout) = duplex(PIPE_CAPACITY);
        let (server_stderr, client_stderr) = duplex(PIPE_CAPACITY);
        let exited = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(serve(
            self.clone(),
            launch,
            Pipes {
                stdin: server_stdin,
                stdout: server_stdout,
                stderr: server_stderr,
            },
            Arc::clone(&exited),
        ));

        Ok(LaunchedLocator {
            stdout: Box::pin(client_stdout),
            stdin: Box::pin(client_stdin),
            stderr: Some(Box::pin(client_stderr)),
            process: Box::new(FakeProcess {
                launch,
                task,
                exited,
            }),
        })
    }
}

struct Pipes {
    stdin: DuplexStream,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

struct FakeProcess {
    launch: u32,
    task: JoinHandle<()>,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl LocatorProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.launch)
    }

    fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::SeqCst) || self.task.is_finished()
    }

    async fn terminate(&mut self, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            self.task.abort();
        }
        self.exited.store(true, Ordering::SeqCst);
    }
}

async fn serve(fake: FakeLocator, launch: u32, pipes: Pipes, exited: Arc<AtomicBool>) {
    let Pipes {
        stdin,
        stdout,
        mut stderr,
    } = pipes;
    if stderr.write_all(b"fake locator ready\n").await.is_ok() {
        drop(stderr.shutdown().await);
    }

    let mut reader = FrameReader::new(stdin);
    let mut writer = FrameWriter::new(stdout);

    while let Ok(Some(frame)) = reader.receive().await {
        let Ok(message) = serde_json::from_slice::<Value>(&frame) else {
            continue;
        };
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        fake.record(FakeEvent::Received {
            launch,
            method: method.clone(),
            params: params.clone(),
        });

        let Some(id) = message.get("id").filter(|id| !id.is_null()).cloned() else {
            continue;
        };

        let reply = match fake.next_reaction(&method) {
            Reaction::Hang => continue,
            Reaction::Crash => break,
            Reaction::Fail { code, message } => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message}
            }),
            Reaction::Reply => {
                match answer(&fake, launch, &method, &params, &mut writer).await {
                    Some(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    None => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32602, "message": format!("cannot {method} {params}")}
                    }),
                }
            }
        };

        if send(&mut writer, &reply).await.is_err() {
            break;
        }
        fake.record(FakeEvent::Answered { launch, method });
    }

    exited.store(true, Ordering::SeqCst);
}

async fn answer(
    fake: &FakeLocator,
    launch: u32,
    method: &str,
    params: &Value,
    writer: &mut FrameWriter<DuplexStream>,
) -> Option<Value> {
    match method {
        "refresh" => {
            let delay = fake.notification_delay();
            for (notification, payload) in fake.refresh_notifications(params) {
                if let Some(pause) = delay {
                    tokio::time::sleep(pause).await;
                }
                let message = json!({"jsonrpc": "2.0", "method": notification, "params": payload});
                if send(writer, &message).await.is_err() {
                    return None;
                }
                fake.record(FakeEvent::Notified {
                    launch,
                    method: notification.to_owned(),
                });
            }
            Some(json!({"duration": 1}))
        }
        "configure" => {
            for (notification, payload) in fake.chatter() {
                let message = json!({"jsonrpc": "2.0", "method": notification, "params": payload});
                if send(writer, &message).await.is_err() {
                    return None;
                }
            }
            Some(Value::Null)
        }
        "resolve" => {
            let executable = params.get("executable").and_then(Value::as_str)?;
            fake.resolution(Path::new(executable))
                .and_then(|environment| serde_json::to_value(environment).ok())
        }
        _ => Some(Value::Null),
    }
}

async fn send(writer: &mut FrameWriter<DuplexStream>, message: &Value) -> Result<(), ()> {
    let bytes = serde_json::to_vec(message).map_err(|_| ())?;
    writer.send(&bytes).await.map_err(|_| ())
}
