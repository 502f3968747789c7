//! Restrictions applied to a discovery pass.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::records::EnvironmentKind;

/// Separator between locations in a cache key. NUL cannot occur in a path.
const LOCATION_SEPARATOR: char = '\0';

/// Which environments a refresh should look for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RefreshScope {
    /// No restriction.
    #[default]
    All,
    /// Only environments of one kind.
    Kind(EnvironmentKind),
    /// Only the listed roots or files, replacing the configured workspace
    /// directories for this pass.
    Locations(Vec<PathBuf>),
}

impl RefreshScope {
    /// Deterministic key used by the result cache.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self {
            Self::All => String::from("all"),
            Self::Kind(kind) => format!("kind:{kind}"),
            Self::Locations(paths) => {
                let joined = paths
                    .iter()
                    .map(|path| path.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(&LOCATION_SEPARATOR.to_string());
                format!("locations:{joined}")
            }
        }
    }

    /// Translates the scope into `refresh` parameters.
    ///
    /// Statically configured search directories are appended to explicit
    /// location lists so they are never dropped.
    #[must_use]
    pub fn to_params(&self, extra_directories: &[PathBuf]) -> RefreshParams {
        match self {
            Self::All => RefreshParams::default(),
            Self::Kind(kind) => RefreshParams {
                search_kind: Some(*kind),
                search_paths: None,
            },
            Self::Locations(paths) => {
                let mut search_paths = paths.clone();
                for extra in extra_directories {
                    if !search_paths.contains(extra) {
                        search_paths.push(extra.clone());
                    }
                }
                RefreshParams {
                    search_kind: None,
                    search_paths: Some(search_paths),
                }
            }
        }
    }
}

impl fmt::Display for RefreshScope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => formatter.write_str("all"),
            Self::Kind(kind) => write!(formatter, "kind {kind}"),
            Self::Locations(paths) => write!(formatter, "{} location(s)", paths.len()),
        }
    }
}

/// Parameters of the `refresh` request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParams {
    /// Restrict discovery to one kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_kind: Option<EnvironmentKind>,
    /// Search only these paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_paths: Option<Vec<PathBuf>>,
}
