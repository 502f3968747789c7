//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use envscout_locator::LocatorError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to start async runtime: {0}")]
    Runtime(io::Error),
    #[error("failed to determine the working directory: {0}")]
    WorkingDirectory(io::Error),
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error("failed to serialise output: {0}")]
    SerialiseOutput(serde_json::Error),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
}
