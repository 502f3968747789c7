//! Records streamed back by the locator.
//!
//! The locator announces each discovery as a separate notification:
//! `environment` for interpreters and `manager` for package/environment
//! manager executables. [`DiscoveredRecord`] carries an explicit discriminant
//! so the two shapes never have to be told apart by which fields happen to be
//! present.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a discovered environment, as classified by the locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvironmentKind {
    /// Conda or Miniforge environment.
    Conda,
    /// Pixi environment.
    Pixi,
    /// Homebrew-installed interpreter.
    Homebrew,
    /// Interpreter installed by pyenv.
    Pyenv,
    /// Interpreter found on `PATH` or another global location.
    GlobalPaths,
    /// Virtual environment created by pyenv-virtualenv.
    PyenvVirtualEnv,
    /// Pipenv-managed virtual environment.
    Pipenv,
    /// Poetry-managed virtual environment.
    Poetry,
    /// Installer from python.org on macOS.
    MacPythonOrg,
    /// Interpreter shipped with the macOS command line tools.
    MacCommandLineTools,
    /// System interpreter on Linux.
    LinuxGlobal,
    /// Interpreter shipped with Xcode.
    MacXCode,
    /// Interpreter or environment managed by uv.
    Uv,
    /// uv workspace environment.
    UvWorkspace,
    /// `venv` virtual environment.
    Venv,
    /// `virtualenv` virtual environment.
    VirtualEnv,
    /// virtualenvwrapper environment.
    VirtualEnvWrapper,
    /// Microsoft Store interpreter.
    WindowsStore,
    /// Interpreter registered in the Windows registry.
    WindowsRegistry,
    /// A kind this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl EnvironmentKind {
    /// Every known kind, in wire order.
    pub const ALL: [Self; 19] = [
        Self::Conda,
        Self::Pixi,
        Self::Homebrew,
        Self::Pyenv,
        Self::GlobalPaths,
        Self::PyenvVirtualEnv,
        Self::Pipenv,
        Self::Poetry,
        Self::MacPythonOrg,
        Self::MacCommandLineTools,
        Self::LinuxGlobal,
        Self::MacXCode,
        Self::Uv,
        Self::UvWorkspace,
        Self::Venv,
        Self::VirtualEnv,
        Self::VirtualEnvWrapper,
        Self::WindowsStore,
        Self::WindowsRegistry,
    ];

    /// Name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conda => "Conda",
            Self::Pixi => "Pixi",
            Self::Homebrew => "Homebrew",
            Self::Pyenv => "Pyenv",
            Self::GlobalPaths => "GlobalPaths",
            Self::PyenvVirtualEnv => "PyenvVirtualEnv",
            Self::Pipenv => "Pipenv",
            Self::Poetry => "Poetry",
            Self::MacPythonOrg => "MacPythonOrg",
            Self::MacCommandLineTools => "MacCommandLineTools",
            Self::LinuxGlobal => "LinuxGlobal",
            Self::MacXCode => "MacXCode",
            Self::Uv => "Uv",
            Self::UvWorkspace => "UvWorkspace",
            Self::Venv => "Venv",
            Self::VirtualEnv => "VirtualEnv",
            Self::VirtualEnvWrapper => "VirtualEnvWrapper",
            Self::WindowsStore => "WindowsStore",
            Self::WindowsRegistry => "WindowsRegistry",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when parsing an environment kind fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown environment kind: {0}")]
pub struct EnvironmentKindParseError(String);

impl FromStr for EnvironmentKind {
    type Err = EnvironmentKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| EnvironmentKindParseError(trimmed.to_owned()))
    }
}

/// Kind of manager executable reported by the locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagerToolKind {
    /// `conda`.
    Conda,
    /// `pipenv`.
    Pipenv,
    /// `poetry`.
    Poetry,
    /// `pyenv`.
    Pyenv,
    /// `uv`.
    Uv,
    /// `pixi`.
    Pixi,
    /// A tool this client does not know about yet.
    #[serde(other)]
    Unknown,
}

/// One located package or environment manager executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredManagerTool {
    /// Which manager this is.
    pub tool: ManagerToolKind,
    /// Path to the manager executable.
    pub executable: PathBuf,
    /// Version string, when the locator could determine it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One located interpreter or environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredEnvironment {
    /// Environment name (Conda and similar named environments).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-readable label suggested by the locator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Interpreter executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    /// Classification assigned by the locator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnvironmentKind>,
    /// Interpreter version, e.g. `3.12.1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Installation prefix (`sys.prefix`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<PathBuf>,
    /// Manager owning this environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<DiscoveredManagerTool>,
    /// Project directory the environment belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<PathBuf>,
    /// CPU architecture, e.g. `x64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Other paths that point at the same interpreter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlinks: Option<Vec<PathBuf>>,
    /// Set when the locator found the entry but could not validate it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiscoveredEnvironment {
    /// Builds a record for a bare executable.
    #[must_use]
    pub fn for_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
            ..Self::default()
        }
    }

    /// Executable path, the informal identity of the record.
    #[must_use]
    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    /// Whether the record names an executable but lacks a version or prefix,
    /// so a follow-up `resolve` is needed.
    #[must_use]
    pub fn needs_resolution(&self) -> bool {
        self.executable.is_some() && (self.version.is_none() || self.prefix.is_none())
    }
}

/// Unit streamed back by a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveredRecord {
    /// A located interpreter.
    Environment(DiscoveredEnvironment),
    /// A located manager executable.
    Manager(DiscoveredManagerTool),
}

impl DiscoveredRecord {
    /// Returns the environment payload, if this is one.
    #[must_use]
    pub const fn as_environment(&self) -> Option<&DiscoveredEnvironment> {
        match self {
            Self::Environment(environment) => Some(environment),
            Self::Manager(_) => None,
        }
    }

    /// Returns the manager payload, if this is one.
    #[must_use]
    pub const fn as_manager(&self) -> Option<&DiscoveredManagerTool> {
        match self {
            Self::Manager(manager) => Some(manager),
            Self::Environment(_) => None,
        }
    }
}
