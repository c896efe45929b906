//! Elm project and version detection
//!
//! Walks up from a path hint to the nearest Elm manifest and reports which
//! toolchain generation the project uses.

use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Manifest of Elm 0.19 and later
pub const CURRENT_MANIFEST: &str = "elm.json";

/// Manifest of Elm 0.18 and earlier
pub const LEGACY_MANIFEST: &str = "elm-package.json";

const VERSION_FIELD: &str = "elm-version";

/// Errors that can occur while resolving a project
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No Elm project found at or above {}", .0.display())]
    ProjectNotFound(PathBuf),

    #[error("Cannot read Elm manifest {}: {reason}", .path.display())]
    ManifestUnreadable { path: PathBuf, reason: String },
}

/// Major version generation of the Elm toolchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElmGeneration {
    /// Elm 0.18: separate `elm-repl` / `elm-reactor` binaries
    Legacy,
    /// Elm 0.19 and later: a single `elm` entry point with subcommands
    Current,
}

impl ElmGeneration {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElmGeneration::Legacy => "legacy",
            ElmGeneration::Current => "current",
        }
    }
}

impl fmt::Display for ElmGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A located Elm project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectResolution {
    /// Directory containing the manifest
    pub project_root: PathBuf,
    /// Path of the manifest that was read
    pub manifest: PathBuf,
    /// Toolchain generation in use
    pub generation: ElmGeneration,
    /// Raw `elm-version` value, when the manifest declares one
    pub elm_version: Option<String>,
}

/// Resolve the project containing `hint`
///
/// `hint` may name a file (which need not exist) or a directory. The nearest
/// ancestor holding `elm.json` or `elm-package.json` wins; within a single
/// directory `elm.json` takes precedence.
pub fn resolve(hint: &Path) -> Result<ProjectResolution, ResolveError> {
    let start = if hint.is_dir() {
        hint
    } else {
        hint.parent().unwrap_or(hint)
    };

    for dir in start.ancestors() {
        let current = dir.join(CURRENT_MANIFEST);
        if current.is_file() {
            debug!("Found {} in {}", CURRENT_MANIFEST, dir.display());
            let manifest = read_manifest(&current)?;
            let version = manifest
                .get(VERSION_FIELD)
                .and_then(Value::as_str)
                .ok_or_else(|| ResolveError::ManifestUnreadable {
                    path: current.clone(),
                    reason: format!("missing string field \"{}\"", VERSION_FIELD),
                })?;

            return Ok(ProjectResolution {
                project_root: dir.to_path_buf(),
                manifest: current,
                generation: ElmGeneration::Current,
                elm_version: Some(version.to_string()),
            });
        }

        let legacy = dir.join(LEGACY_MANIFEST);
        if legacy.is_file() {
            debug!("Found {} in {}", LEGACY_MANIFEST, dir.display());
            let manifest = read_manifest(&legacy)?;
            let version = manifest
                .get(VERSION_FIELD)
                .and_then(Value::as_str)
                .map(String::from);

            return Ok(ProjectResolution {
                project_root: dir.to_path_buf(),
                manifest: legacy,
                generation: ElmGeneration::Legacy,
                elm_version: version,
            });
        }
    }

    Err(ResolveError::ProjectNotFound(start.to_path_buf()))
}

fn read_manifest(path: &Path) -> Result<serde_json::Map<String, Value>, ResolveError> {
    let unreadable = |reason: String| ResolveError::ManifestUnreadable {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    match serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))? {
        Value::Object(map) => Ok(map),
        _ => Err(unreadable("manifest is not a JSON object".to_string())),
    }
}
