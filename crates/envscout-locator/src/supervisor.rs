//! Owns the single locator process and its RPC channel.
//!
//! Callers never hold the process itself: [`ProcessSupervisor::ensure_running`]
//! hands out the shared channel and its generation number. Exit and spawn
//! failure are recorded as state and acted upon by the next caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::channel::{RpcChannel, Subscription};
use crate::dispose::{CleanupError, CleanupStack};
use crate::error::LocatorError;
use crate::events::{LocatorEvents, forward_locator_log};
use crate::process::{
    LaunchedLocator, LocatorLauncher, LocatorProcess, PROCESS_TARGET, forward_stderr,
};
use crate::restart::{RestartPolicy, RestartState};

const SUPERVISOR_TARGET: &str = "envscout_locator::supervisor";

/// A live locator as seen by callers.
#[derive(Debug, Clone)]
pub struct RunningLocator {
    /// Channel to the process.
    pub channel: Arc<RpcChannel>,
    /// Spawn counter; a new value means a new process.
    pub generation: u64,
}

struct ProcessHandle {
    generation: u64,
    channel: Arc<RpcChannel>,
    process: tokio::sync::Mutex<Box<dyn LocatorProcess>>,
    listeners: Mutex<Vec<Subscription>>,
    stderr: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessHandle {
    fn running(&self) -> RunningLocator {
        RunningLocator {
            channel: Arc::clone(&self.channel),
            generation: self.generation,
        }
    }

    async fn is_alive(&self) -> bool {
        !self.channel.is_closed() && !self.process.lock().await.has_exited()
    }

    /// Releases listeners, the channel, the streams and finally the process.
    async fn shutdown(&self, grace: Duration) {
        let mut stack = CleanupStack::new();
        stack.push("process", async move {
            self.process.lock().await.terminate(grace).await;
            if let Some(task) = lock(&self.stderr).take() {
                task.abort();
            }
            Ok(())
        });
        stack.push("streams", async move {
            self.channel.close_streams().await.map_err(CleanupError::from)
        });
        stack.push("channel", async move {
            self.channel.close();
            Ok(())
        });
        stack.push("listeners", async move {
            lock(&self.listeners).clear();
            self.channel.release_listeners();
            Ok(())
        });
        let failures = stack.run().await;
        debug!(
            target: SUPERVISOR_TARGET,
            generation = self.generation,
            failures,
            "locator handle disposed"
        );
    }
}

enum SupervisorState {
    NotStarted,
    Running(Arc<ProcessHandle>),
    Restarting,
    Exited { spawn_failed: bool },
    PermanentlyFailed { attempts: u32 },
    Disposed,
}

enum Next {
    Check(Arc<ProcessHandle>),
    Spawn { delay: Option<Duration> },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Runtime knobs of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Restart budget and backoff.
    pub restart: RestartPolicy,
    /// Time granted to exit after stdin closes.
    pub kill_grace: Duration,
}

/// Starts, monitors, restarts and stops the locator process.
pub struct ProcessSupervisor {
    launcher: Arc<dyn LocatorLauncher>,
    events: Arc<dyn LocatorEvents>,
    settings: SupervisorSettings,
    state: Mutex<SupervisorState>,
    restart: Mutex<RestartState>,
    generations: AtomicU64,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("command", &self.launcher.command())
            .field("settings", &self.settings)
            .field("restart_attempts", &self.restart_attempts())
            .finish_non_exhaustive()
    }
}

/// Puts the supervisor back into a restartable state if a spawn is
/// abandoned part-way, for example when the caller's future is dropped
/// during backoff.
struct SpawnGuard<'a> {
    supervisor: &'a ProcessSupervisor,
    armed: bool,
}

impl Drop for SpawnGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.supervisor.lock_state();
            if matches!(*state, SupervisorState::Restarting) {
                *state = SupervisorState::Exited { spawn_failed: true };
            }
        }
    }
}

impl ProcessSupervisor {
    /// Creates a supervisor; nothing is spawned until first use.
    #[must_use]
    pub fn new(
        launcher: Arc<dyn LocatorLauncher>,
        events: Arc<dyn LocatorEvents>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            launcher,
            events,
            settings,
            state: Mutex::new(SupervisorState::NotStarted),
            restart: Mutex::new(RestartState::new(settings.restart)),
            generations: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        lock(&self.state)
    }

    /// Restart attempts consumed since the last successful exchange.
    #[must_use]
    pub fn restart_attempts(&self) -> u32 {
        lock(&self.restart).attempts()
    }

    /// Returns the live locator, starting or restarting it when needed.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::RestartInProgress`] while another caller is
    /// restarting, [`LocatorError::RestartBudgetExhausted`] once restarts
    /// are spent, [`LocatorError::Disposed`] after disposal, and the launch
    /// error when spawning fails.
    pub async fn ensure_running(&self) -> Result<RunningLocator, LocatorError> {
        loop {
            match self.next_step()? {
                Next::Check(handle) => {
                    if handle.is_alive().await {
                        return Ok(handle.running());
                    }
                    if self.retire(&handle, false) {
                        self.events.process_exited(handle.generation);
                        handle.shutdown(self.settings.kill_grace).await;
                    }
                }
                Next::Spawn { delay } => return self.spawn(delay).await,
            }
        }
    }

    fn next_step(&self) -> Result<Next, LocatorError> {
        let mut state = self.lock_state();
        match &*state {
            SupervisorState::Disposed => Err(LocatorError::Disposed),
            SupervisorState::Restarting => Err(LocatorError::RestartInProgress),
            SupervisorState::PermanentlyFailed { attempts } => Err(self.exhausted(*attempts)),
            SupervisorState::Running(handle) => Ok(Next::Check(Arc::clone(handle))),
            SupervisorState::NotStarted => {
                *state = SupervisorState::Restarting;
                Ok(Next::Spawn { delay: None })
            }
            SupervisorState::Exited { spawn_failed } => {
                let after_spawn_failure = *spawn_failed;
                let mut restart = lock(&self.restart);
                let Some(delay) = restart.begin_attempt() else {
                    let attempts = restart.attempts();
                    *state = SupervisorState::PermanentlyFailed { attempts };
                    self.events.restart_budget_exhausted(attempts);
                    return Err(self.exhausted(attempts));
                };
                debug!(
                    target: SUPERVISOR_TARGET,
                    attempt = restart.attempts(),
                    spawn_failed = after_spawn_failure,
                    "scheduling locator restart"
                );
                self.events.restart_scheduled(restart.attempts(), delay);
                *state = SupervisorState::Restarting;
                Ok(Next::Spawn { delay: Some(delay) })
            }
        }
    }

    fn exhausted(&self, attempts: u32) -> LocatorError {
        LocatorError::RestartBudgetExhausted {
            attempts,
            command: self.launcher.command().to_path_buf(),
        }
    }

    /// Moves `Running(handle)` to `Exited`. Returns false when another caller
    /// already replaced the handle.
    fn retire(&self, handle: &Arc<ProcessHandle>, killed: bool) -> bool {
        let mut state = self.lock_state();
        match &*state {
            SupervisorState::Running(current) if Arc::ptr_eq(current, handle) => {
                *state = SupervisorState::Exited {
                    spawn_failed: false,
                };
                debug!(
                    target: SUPERVISOR_TARGET,
                    generation = handle.generation,
                    killed,
                    "locator retired"
                );
                true
            }
            _ => false,
        }
    }

    async fn spawn(&self, delay: Option<Duration>) -> Result<RunningLocator, LocatorError> {
        let mut guard = SpawnGuard {
            supervisor: self,
            armed: true,
        };

        if let Some(backoff) = delay.filter(|pause| !pause.is_zero()) {
            tokio::time::sleep(backoff).await;
        }

        let launched = match self.launcher.launch() {
            Ok(launched) => launched,
            Err(error) => {
                guard.armed = false;
                let mut state = self.lock_state();
                if matches!(*state, SupervisorState::Restarting) {
                    *state = SupervisorState::Exited { spawn_failed: true };
                }
                drop(state);
                self.events.spawn_failed(&error);
                return Err(error);
            }
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(self.attach(launched, generation));

        guard.armed = false;
        let mut state = self.lock_state();
        if !matches!(*state, SupervisorState::Restarting) {
            // Disposed while spawning.
            drop(state);
            handle.shutdown(self.settings.kill_grace).await;
            return Err(LocatorError::Disposed);
        }
        *state = SupervisorState::Running(Arc::clone(&handle));
        drop(state);

        let pid = handle.process.lock().await.id();
        self.events.process_started(generation, pid);
        Ok(handle.running())
    }

    fn attach(&self, launched: LaunchedLocator, generation: u64) -> ProcessHandle {
        let LaunchedLocator {
            stdout,
            stdin,
            stderr,
            process,
        } = launched;

        let channel = Arc::new(RpcChannel::new(stdout, stdin));
        let events = Arc::clone(&self.events);
        let listeners = vec![
            channel.on_notification("log", forward_locator_log),
            channel.on_notification("telemetry", move |payload| events.telemetry(&payload)),
        ];
        let stderr = stderr.map(|stream| tokio::spawn(forward_stderr(stream, generation)));

        debug!(target: PROCESS_TARGET, generation, "locator channel attached");

        ProcessHandle {
            generation,
            channel,
            process: tokio::sync::Mutex::new(process),
            listeners: Mutex::new(listeners),
            stderr: Mutex::new(stderr),
        }
    }

    /// Stops the current process gracefully, then forcibly. The next
    /// [`Self::ensure_running`] takes the restart path and consumes budget.
    pub async fn kill(&self) {
        let handle = match &*self.lock_state() {
            SupervisorState::Running(handle) => Arc::clone(handle),
            _ => return,
        };
        if self.retire(&handle, true) {
            self.events.process_killed(handle.generation);
            handle.shutdown(self.settings.kill_grace).await;
        }
    }

    /// Kills the process only if it is still the given generation.
    pub async fn kill_generation(&self, generation: u64) {
        let current = match &*self.lock_state() {
            SupervisorState::Running(handle) => handle.generation,
            _ => return,
        };
        if current == generation {
            self.kill().await;
        }
    }

    /// Clears the restart counter after a successful exchange.
    pub fn record_success(&self) {
        lock(&self.restart).reset();
    }

    /// Shuts down for good; later calls fail with [`LocatorError::Disposed`].
    pub async fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), SupervisorState::Disposed);
        if let SupervisorState::Running(handle) = previous {
            self.events.process_killed(handle.generation);
            handle.shutdown(self.settings.kill_grace).await;
        }
    }

    /// Whether [`Self::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(*self.lock_state(), SupervisorState::Disposed)
    }
}
