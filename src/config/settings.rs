//! Workspace settings
//!
//! Loads the toolchain settings from .elm-bridge/config.toml and exposes them
//! through the flat key/value [`ConfigSource`] contract. Sessions take one
//! snapshot of it on every start.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Configuration directory and file names
pub const CONFIG_DIR: &str = ".elm-bridge";
pub const CONFIG_FILE: &str = "config.toml";

/// Setting keys
pub const KEY_COMPILER: &str = "compiler";
pub const KEY_REACTOR_HOST: &str = "reactorHost";
pub const KEY_REACTOR_PORT: &str = "reactorPort";
pub const KEY_REACTOR_SUBDIR: &str = "reactorSubdir";
pub const KEY_MAKE_OUTPUT: &str = "makeOutput";

/// Errors that can occur while loading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Flat key/value configuration lookup
pub trait ConfigSource: Send + Sync {
    /// Look up a setting by key
    fn get(&self, key: &str) -> Option<String>;

    /// Every known setting, read at one point in time
    fn snapshot(&self) -> Settings {
        Settings {
            compiler: self.get(KEY_COMPILER),
            reactor_host: self.get(KEY_REACTOR_HOST),
            reactor_port: self.get(KEY_REACTOR_PORT),
            reactor_subdir: self.get(KEY_REACTOR_SUBDIR),
            make_output: self.get(KEY_MAKE_OUTPUT),
        }
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Toolchain settings as stored in the workspace settings file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Path to the Elm 0.19+ executable
    pub compiler: Option<String>,
    /// Host the legacy reactor binds to
    pub reactor_host: Option<String>,
    /// Port the reactor listens on
    pub reactor_port: Option<String>,
    /// Subdirectory of the project the reactor serves
    pub reactor_subdir: Option<String>,
    /// Output file for `elm make`
    pub make_output: Option<String>,
}

impl Settings {
    /// Load settings from a workspace directory
    ///
    /// A missing settings file yields the defaults.
    pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
        let path = workspace.join(CONFIG_DIR).join(CONFIG_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }
}

impl ConfigSource for Settings {
    fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            KEY_COMPILER => &self.compiler,
            KEY_REACTOR_HOST => &self.reactor_host,
            KEY_REACTOR_PORT => &self.reactor_port,
            KEY_REACTOR_SUBDIR => &self.reactor_subdir,
            KEY_MAKE_OUTPUT => &self.make_output,
            _ => return None,
        };
        value.clone()
    }

    fn snapshot(&self) -> Settings {
        self.clone()
    }
}

/// Settings backed by the workspace file, re-read on every snapshot
///
/// The file may be edited while the bridge runs; sessions pick up the new
/// values on their next start.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    workspace: PathBuf,
}

impl SettingsFile {
    /// Create a settings source for a workspace directory
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    /// Path of the backing settings file
    pub fn path(&self) -> PathBuf {
        self.workspace.join(CONFIG_DIR).join(CONFIG_FILE)
    }
}

impl ConfigSource for SettingsFile {
    fn get(&self, key: &str) -> Option<String> {
        self.snapshot().get(key)
    }

    /// A broken file reads as all defaults
    fn snapshot(&self) -> Settings {
        Settings::load(&self.workspace).unwrap_or_else(|e| {
            warn!("Ignoring settings file {}: {}", self.path().display(), e);
            Settings::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_settings(dir: &Path, content: &str) {
        let config_dir = dir.join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(CONFIG_FILE), content).unwrap();
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_camel_case_keys() {
        let dir = tempdir().unwrap();
        write_settings(
            dir.path(),
            r#"
compiler = "/opt/elm/bin/elm"
reactorPort = "9001"
reactorSubdir = "src"
"#,
        );

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.get(KEY_COMPILER).as_deref(), Some("/opt/elm/bin/elm"));
        assert_eq!(settings.get(KEY_REACTOR_PORT).as_deref(), Some("9001"));
        assert_eq!(settings.get(KEY_REACTOR_SUBDIR).as_deref(), Some("src"));
        assert!(settings.get(KEY_REACTOR_HOST).is_none());
        assert!(settings.get("unknown").is_none());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let dir = tempdir().unwrap();
        write_settings(dir.path(), "compiler = = elm");
        assert!(matches!(
            Settings::load(dir.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_settings_file_rereads_on_each_lookup() {
        let dir = tempdir().unwrap();
        let source = SettingsFile::new(dir.path());
        assert!(source.get(KEY_COMPILER).is_none());

        write_settings(dir.path(), "compiler = \"elm-0.19.1\"");
        assert_eq!(source.get(KEY_COMPILER).as_deref(), Some("elm-0.19.1"));

        write_settings(dir.path(), "compiler = \"elm-dev\"");
        assert_eq!(source.get(KEY_COMPILER).as_deref(), Some("elm-dev"));
    }

    #[test]
    fn test_settings_file_snapshot_reads_whole_file() {
        let dir = tempdir().unwrap();
        write_settings(
            dir.path(),
            "compiler = \"elm-0.19.1\"\nreactorPort = \"8100\"",
        );
        let source = SettingsFile::new(dir.path());
        let snapshot = source.snapshot();

        write_settings(dir.path(), "compiler = \"elm-dev\"");
        assert_eq!(snapshot.get(KEY_COMPILER).as_deref(), Some("elm-0.19.1"));
        assert_eq!(snapshot.get(KEY_REACTOR_PORT).as_deref(), Some("8100"));
        assert_eq!(source.snapshot().get(KEY_REACTOR_PORT), None);
    }

    #[test]
    fn test_default_snapshot_collects_every_key() {
        let mut map = HashMap::new();
        map.insert(KEY_REACTOR_SUBDIR.to_string(), "src".to_string());
        map.insert(KEY_MAKE_OUTPUT.to_string(), "main.js".to_string());

        let snapshot = map.snapshot();
        assert_eq!(snapshot.reactor_subdir.as_deref(), Some("src"));
        assert_eq!(snapshot.make_output.as_deref(), Some("main.js"));
        assert!(snapshot.compiler.is_none());
    }

    #[test]
    fn test_settings_file_falls_back_on_broken_file() {
        let dir = tempdir().unwrap();
        write_settings(dir.path(), "not toml at all [[[");
        let source = SettingsFile::new(dir.path());
        assert!(source.get(KEY_COMPILER).is_none());
        assert_eq!(source.snapshot(), Settings::default());
    }

    #[test]
    fn test_hash_map_source() {
        let mut map = HashMap::new();
        map.insert(KEY_REACTOR_HOST.to_string(), "0.0.0.0".to_string());
        assert_eq!(ConfigSource::get(&map, KEY_REACTOR_HOST).as_deref(), Some("0.0.0.0"));
        assert!(ConfigSource::get(&map, KEY_COMPILER).is_none());
    }
}
