//! Python environment discovery through a supervised locator process.
//!
//! The actual probing of the filesystem is done by an external locator
//! (for example `pet server`) that speaks JSON-RPC over stdio. This crate
//! makes that process look like a reliable in-process API: it launches and
//! restarts the process, pushes configuration only when it changes,
//! serialises discovery passes, caches their results per scope, and turns
//! hung or crashed processes into typed errors.
//!
//! [`Locator`] is the entry point. The process is abstracted behind
//! [`LocatorLauncher`] so tests can drive the client against a scripted
//! in-memory locator instead of a real executable.

mod cache;
mod channel;
mod configure;
mod dispose;
mod error;
mod events;
mod jsonrpc;
mod locator;
mod process;
mod queue;
mod records;
mod restart;
mod retry;
mod scope;
mod settings;
mod supervisor;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

#[cfg(test)]
mod tests;

pub use cache::{CACHE_FILE_NAME, CacheError, ResultCache};
pub use channel::{NotificationHandler, RpcChannel, Subscription};
pub use configure::{
    ConfigurationSource, ConfigurationSynchronizer, ConfigureTimeouts, DiscoveryConfiguration,
    StaticConfigurationSource, ToolOverrides,
};
pub use error::{ChannelError, LocatorError};
pub use events::{LocatorEvents, TracingLocatorEvents};
pub use locator::Locator;
pub use process::{ChildProcess, LaunchedLocator, LocatorLauncher, LocatorProcess, TokioLauncher};
pub use queue::RefreshQueue;
pub use records::{
    DiscoveredEnvironment, DiscoveredManagerTool, DiscoveredRecord, EnvironmentKind,
    EnvironmentKindParseError, ManagerToolKind,
};
pub use restart::{RestartPolicy, RestartState};
pub use retry::{ConfigureRetryState, TimeoutVerdict, configure_timeout};
pub use scope::{RefreshParams, RefreshScope};
pub use settings::LocatorSettings;
pub use supervisor::{ProcessSupervisor, RunningLocator, SupervisorSettings};
pub use transport::{BoxedReader, BoxedWriter, MAX_FRAME_BYTES, TransportError};
