//! Error types for the locator client.
//!
//! I/O and codec errors are wrapped in `Arc` so the enums stay small and
//! cloneable; a single channel failure is reported to every waiter.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc::JsonRpcError;
use crate::transport::TransportError;

/// Failures of a single exchange on the RPC channel.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The locator did not answer before the deadline.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Method that timed out.
        method: String,
        /// Deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The locator answered with a JSON-RPC error object.
    #[error("locator rejected '{method}': {message} (code: {code})")]
    Server {
        /// Method that failed.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message reported by the locator.
        message: String,
        /// Optional structured payload.
        data: Option<Value>,
    },

    /// The channel was closed or the locator's output ended.
    #[error("RPC channel closed")]
    Closed,

    /// Writing to or reading from the locator failed.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<TransportError>),

    /// A message could not be encoded or decoded.
    #[error("JSON codec error: {0}")]
    Codec(#[source] Arc<serde_json::Error>),
}

impl ChannelError {
    pub(crate) fn from_jsonrpc(method: &str, error: JsonRpcError) -> Self {
        Self::Server {
            method: method.to_owned(),
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }

    /// Whether the deadline elapsed.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<TransportError> for ChannelError {
    fn from(error: TransportError) -> Self {
        Self::Transport(Arc::new(error))
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec(Arc::new(error))
    }
}

/// Errors surfaced by [`crate::Locator`].
#[derive(Debug, Clone, Error)]
pub enum LocatorError {
    /// The locator executable does not exist.
    #[error("locator executable not found: {}", .command.display())]
    BinaryNotFound {
        /// Command that was not found.
        command: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The locator could not be started.
    #[error("failed to start locator: {message}")]
    SpawnFailed {
        /// Description of the spawn failure.
        message: String,
        /// Underlying I/O error.
        #[source]
        source: Option<Arc<io::Error>>,
    },

    /// The locator exited or closed its output unexpectedly.
    #[error("locator process exited unexpectedly")]
    ProcessExited,

    /// A request exceeded its deadline; the locator is assumed hung.
    #[error("locator request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Method that timed out.
        method: String,
        /// Deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The locator rejected a request. Propagated unchanged.
    #[error("locator rejected '{method}': {message} (code: {code})")]
    Server {
        /// Method that failed.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message reported by the locator.
        message: String,
    },

    /// Another caller is restarting the locator.
    #[error("locator restart in progress")]
    RestartInProgress,

    /// The restart budget is spent; the supervisor will not spawn again.
    #[error(
        "locator failed {attempts} consecutive restart attempts; run `{} server` manually to diagnose",
        .command.display()
    )]
    RestartBudgetExhausted {
        /// Number of consecutive failed attempts.
        attempts: u32,
        /// Locator command, for the diagnostic hint.
        command: PathBuf,
    },

    /// The locator client has been shut down.
    #[error("locator client has been disposed")]
    Disposed,

    /// A reply could not be decoded.
    #[error("malformed locator reply to '{method}': {source}")]
    MalformedReply {
        /// Method whose reply was malformed.
        method: String,
        /// Underlying decoding error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// Transport or codec failure on the channel.
    #[error("locator channel failed: {0}")]
    Channel(#[source] ChannelError),
}

impl LocatorError {
    /// Whether the failure is a request timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the failure means the process died and a restart may help.
    #[must_use]
    pub const fn is_process_failure(&self) -> bool {
        matches!(self, Self::ProcessExited | Self::Channel(_))
    }

    /// Whether retrying is pointless until configuration changes.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::BinaryNotFound { .. } | Self::RestartBudgetExhausted { .. } | Self::Disposed
        )
    }

    pub(crate) fn malformed(method: &str, source: serde_json::Error) -> Self {
        Self::MalformedReply {
            method: method.to_owned(),
            source: Arc::new(source),
        }
    }
}

impl From<ChannelError> for LocatorError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Timeout { method, timeout_ms } => Self::Timeout { method, timeout_ms },
            ChannelError::Server {
                method,
                code,
                message,
                ..
            } => Self::Server {
                method,
                code,
                message,
            },
            ChannelError::Closed => Self::ProcessExited,
            other @ (ChannelError::Transport(_) | ChannelError::Codec(_)) => Self::Channel(other),
        }
    }
}
