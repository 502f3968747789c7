//! The `refresh` / `resolve` facade.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::channel::{RpcChannel, Subscription};
use crate::configure::{ConfigurationSource, ConfigurationSynchronizer};
use crate::error::LocatorError;
use crate::events::LocatorEvents;
use crate::process::LocatorLauncher;
use crate::queue::RefreshQueue;
use crate::records::{DiscoveredEnvironment, DiscoveredManagerTool, DiscoveredRecord};
use crate::scope::RefreshScope;
use crate::settings::LocatorSettings;
use crate::supervisor::{ProcessSupervisor, RunningLocator};

const LOCATOR_TARGET: &str = "envscout_locator::locator";

/// Reply to `refresh`.
#[derive(Debug, Default, Deserialize)]
struct RefreshSummary {
    #[serde(default)]
    duration: Option<u64>,
}

/// Gathers the records streamed during one `refresh`.
struct RecordCollector {
    records: Arc<Mutex<Vec<DiscoveredRecord>>>,
    _subscriptions: [Subscription; 2],
}

fn push_record<T>(
    records: &Mutex<Vec<DiscoveredRecord>>,
    method: &str,
    params: Value,
    wrap: impl FnOnce(T) -> DiscoveredRecord,
) where
    T: DeserializeOwned,
{
    match serde_json::from_value::<T>(params) {
        Ok(record) => records
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(wrap(record)),
        Err(error) => warn!(
            target: LOCATOR_TARGET,
            method,
            error = %error,
            "discarding malformed notification"
        ),
    }
}

impl RecordCollector {
    fn subscribe(channel: &RpcChannel) -> Self {
        let records = Arc::new(Mutex::new(Vec::new()));
        let environments = Arc::clone(&records);
        let managers = Arc::clone(&records);
        Self {
            _subscriptions: [
                channel.on_notification("environment", move |params| {
                    push_record::<DiscoveredEnvironment>(
                        &environments,
                        "environment",
                        params,
                        DiscoveredRecord::Environment,
                    );
                }),
                channel.on_notification("manager", move |params| {
                    push_record::<DiscoveredManagerTool>(
                        &managers,
                        "manager",
                        params,
                        DiscoveredRecord::Manager,
                    );
                }),
            ],
            records,
        }
    }

    fn finish(self) -> Vec<DiscoveredRecord> {
        let records = Arc::clone(&self.records);
        drop(self);
        std::mem::take(&mut *records.lock().unwrap_or_else(|poison| poison.into_inner()))
    }
}

/// Discovers Python environments through a supervised locator process.
///
/// Refreshes are serialised through a FIFO queue and cached per scope;
/// crashes during a refresh are retried while the restart budget allows.
/// `resolve` calls go straight to the locator and are never retried.
pub struct Locator {
    supervisor: Arc<ProcessSupervisor>,
    synchronizer: ConfigurationSynchronizer,
    queue: RefreshQueue,
    cache: ResultCache,
    settings: LocatorSettings,
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("supervisor", &self.supervisor)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Locator {
    /// Creates a client. The locator is launched lazily on first use.
    #[must_use]
    pub fn new(
        settings: LocatorSettings,
        launcher: Arc<dyn LocatorLauncher>,
        source: Arc<dyn ConfigurationSource>,
        events: Arc<dyn LocatorEvents>,
    ) -> Self {
        let supervisor = Arc::new(ProcessSupervisor::new(
            launcher,
            events,
            settings.supervisor(),
        ));
        let synchronizer = ConfigurationSynchronizer::new(
            source,
            Arc::clone(&supervisor),
            settings.configure_timeouts(),
        );
        Self {
            supervisor,
            synchronizer,
            queue: RefreshQueue::new(),
            cache: ResultCache::new(),
            settings,
        }
    }

    /// Replaces the in-memory cache, for example with a persisted one.
    #[must_use]
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    /// Result cache.
    #[must_use]
    pub const fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Process supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Returns the environments and managers for `scope`.
    ///
    /// A soft refresh (`hard == false`) returns a well-formed cached result
    /// without contacting the locator. Otherwise the entry is invalidated and
    /// a discovery pass is queued; its result replaces the cache entry. An
    /// empty result is a success, distinct from every error.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Timeout`] when the locator hangs (it is then
    /// killed), [`LocatorError::RestartBudgetExhausted`] once restarts are
    /// spent, and any other failure of the pass.
    pub async fn refresh(
        &self,
        hard: bool,
        scope: RefreshScope,
    ) -> Result<Vec<DiscoveredRecord>, LocatorError> {
        if !hard && let Some(cached) = self.cache.get(&scope) {
            debug!(
                target: LOCATOR_TARGET,
                %scope,
                records = cached.len(),
                "serving refresh from cache"
            );
            return Ok(cached);
        }

        self.cache.invalidate(&scope);
        let label = scope.cache_key();
        let records = self
            .queue
            .run(&label, || self.refresh_with_restarts(&scope))
            .await?;
        self.cache.put(&scope, &records);
        Ok(records)
    }

    async fn refresh_with_restarts(
        &self,
        scope: &RefreshScope,
    ) -> Result<Vec<DiscoveredRecord>, LocatorError> {
        let mut retries = 0;
        loop {
            match self.refresh_once(scope).await {
                Err(error)
                    if error.is_process_failure()
                        && retries < self.settings.restart.max_attempts =>
                {
                    retries += 1;
                    warn!(
                        target: LOCATOR_TARGET,
                        %scope,
                        retries,
                        error = %error,
                        "locator failed during refresh; retrying"
                    );
                }
                outcome => return outcome,
            }
        }
    }

    async fn refresh_once(
        &self,
        scope: &RefreshScope,
    ) -> Result<Vec<DiscoveredRecord>, LocatorError> {
        let running = self.supervisor.ensure_running().await?;
        let config = self.synchronizer.configure(&running).await?;
        let params = serde_json::to_value(scope.to_params(&config.environment_directories))
            .map_err(|error| LocatorError::Channel(error.into()))?;

        let collector = RecordCollector::subscribe(&running.channel);
        let reply = self
            .guarded(&running, "refresh", Some(params), self.settings.refresh_timeout)
            .await;
        let mut records = collector.finish();
        let summary: RefreshSummary = serde_json::from_value(reply?).unwrap_or_default();

        info!(
            target: LOCATOR_TARGET,
            %scope,
            records = records.len(),
            duration_ms = summary.duration,
            "refresh completed"
        );

        self.complete_partial_records(&running, &mut records).await;
        Ok(records)
    }

    /// Resolves environments that arrived without a version or prefix. A
    /// failed follow-up keeps the partial record.
    async fn complete_partial_records(
        &self,
        running: &RunningLocator,
        records: &mut [DiscoveredRecord],
    ) {
        for record in records.iter_mut() {
            let DiscoveredRecord::Environment(environment) = record else {
                continue;
            };
            if !environment.needs_resolution() {
                continue;
            }
            let Some(executable) = environment.executable.clone() else {
                continue;
            };
            match self.resolve_on(running, &executable).await {
                Ok(resolved) => *environment = resolved,
                Err(error) => warn!(
                    target: LOCATOR_TARGET,
                    executable = %executable.display(),
                    error = %error,
                    "follow-up resolve failed; keeping partial record"
                ),
            }
        }
    }

    /// Classifies one interpreter.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Timeout`] when the locator hangs (it is then
    /// killed), [`LocatorError::Server`] when it rejects the path, and
    /// [`LocatorError::MalformedReply`] when the reply does not decode.
    pub async fn resolve(&self, executable: &Path) -> Result<DiscoveredEnvironment, LocatorError> {
        let running = self.supervisor.ensure_running().await?;
        self.synchronizer.configure(&running).await?;
        self.resolve_on(&running, executable).await
    }

    async fn resolve_on(
        &self,
        running: &RunningLocator,
        executable: &Path,
    ) -> Result<DiscoveredEnvironment, LocatorError> {
        let params = json!({ "executable": executable });
        let reply = self
            .guarded(running, "resolve", Some(params), self.settings.resolve_timeout)
            .await?;
        serde_json::from_value(reply).map_err(|error| LocatorError::malformed("resolve", error))
    }

    /// Sends a request; a timeout kills the locator that timed out.
    async fn guarded(
        &self,
        running: &RunningLocator,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, LocatorError> {
        match running.channel.request(method, params, timeout).await {
            Ok(value) => {
                self.supervisor.record_success();
                Ok(value)
            }
            Err(error) if error.is_timeout() => {
                warn!(
                    target: LOCATOR_TARGET,
                    method,
                    generation = running.generation,
                    "locator unresponsive; killing"
                );
                self.supervisor.kill_generation(running.generation).await;
                Err(error.into())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Stops the locator and persists the cache. Later calls fail with
    /// [`LocatorError::Disposed`].
    pub async fn dispose(&self) {
        self.supervisor.dispose().await;
        if let Err(error) = self.cache.flush() {
            warn!(target: LOCATOR_TARGET, error = %error, "failed to persist refresh cache");
        }
    }
}
