//! Launch planning
//!
//! Turns a resolved project and the user's settings into the concrete
//! command line for a session. Nothing here touches the filesystem or spawns
//! anything.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::version::{ElmGeneration, ProjectResolution};
use crate::config::{
    ConfigSource, KEY_COMPILER, KEY_REACTOR_HOST, KEY_REACTOR_PORT, KEY_REACTOR_SUBDIR,
};

/// Legacy interactive binary
pub const LEGACY_REPL: &str = "elm-repl";

/// Legacy development server binary
pub const LEGACY_REACTOR: &str = "elm-reactor";

pub const DEFAULT_COMPILER: &str = "elm";
pub const DEFAULT_REACTOR_HOST: &str = "localhost";
pub const DEFAULT_REACTOR_PORT: &str = "8000";
pub const DEFAULT_REACTOR_SUBDIR: &str = "";

/// Which external tool a session wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// The interactive read-eval-print loop
    Repl,
    /// The local development server
    Reactor,
}

impl SessionKind {
    /// Human readable name used in messages
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionKind::Repl => "Elm REPL",
            SessionKind::Reactor => "Elm Reactor",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Everything needed to launch one session process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub working_dir: PathBuf,
    pub executable: String,
    pub args: Vec<String>,
}

/// Planner inputs read from the settings surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub compiler: String,
    pub reactor_host: String,
    pub reactor_port: String,
    pub reactor_subdir: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            compiler: DEFAULT_COMPILER.to_string(),
            reactor_host: DEFAULT_REACTOR_HOST.to_string(),
            reactor_port: DEFAULT_REACTOR_PORT.to_string(),
            reactor_subdir: DEFAULT_REACTOR_SUBDIR.to_string(),
        }
    }
}

impl LaunchConfig {
    /// Read the planner inputs, falling back to defaults for missing or blank keys
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let read = |key: &str, default: &str| {
            source
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            compiler: read(KEY_COMPILER, DEFAULT_COMPILER),
            reactor_host: read(KEY_REACTOR_HOST, DEFAULT_REACTOR_HOST),
            reactor_port: read(KEY_REACTOR_PORT, DEFAULT_REACTOR_PORT),
            reactor_subdir: read(KEY_REACTOR_SUBDIR, DEFAULT_REACTOR_SUBDIR),
        }
    }
}

/// Build the launch plan for `kind` in the resolved project
pub fn plan(kind: SessionKind, project: &ProjectResolution, config: &LaunchConfig) -> LaunchPlan {
    let (executable, args) = match (project.generation, kind) {
        (ElmGeneration::Legacy, SessionKind::Repl) => (LEGACY_REPL.to_string(), Vec::new()),
        (ElmGeneration::Legacy, SessionKind::Reactor) => (
            LEGACY_REACTOR.to_string(),
            vec![
                format!("-a={}", config.reactor_host),
                format!("-p={}", config.reactor_port),
            ],
        ),
        (ElmGeneration::Current, SessionKind::Repl) => {
            (config.compiler.clone(), vec!["repl".to_string()])
        }
        (ElmGeneration::Current, SessionKind::Reactor) => (
            config.compiler.clone(),
            vec![
                "reactor".to_string(),
                format!("--port={}", config.reactor_port),
            ],
        ),
    };

    let working_dir = match kind {
        SessionKind::Repl => project.project_root.clone(),
        SessionKind::Reactor => project.project_root.join(&config.reactor_subdir),
    };

    LaunchPlan {
        working_dir,
        executable,
        args,
    }
}
