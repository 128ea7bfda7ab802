use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "config.yaml";
const DEFAULT_SCAN_WORKERS: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory not found")]
    ConfigDirNotFound,

    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// A tmux window created next to the claude window
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WindowSpec {
    pub name: String,
    /// Run once in the new window; the shell stays up after it exits
    #[serde(default)]
    pub command: Option<String>,
}

impl WindowSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            command: None,
        }
    }

    #[cfg(test)]
    pub fn with_command(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: Some(command.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TmuxConfig {
    pub windows: Vec<WindowSpec>,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                WindowSpec::new("logs"),
                WindowSpec::new("edit"),
                WindowSpec::new("scratch"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Upper bound on concurrent transcript parses
    pub workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_SCAN_WORKERS,
        }
    }
}

/// User configuration, read once at startup and passed to whoever needs it
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overrides the transcript root
    pub projects_dir: Option<PathBuf>,
    pub tmux: TmuxConfig,
    pub scan: ScanConfig,
}

impl Config {
    /// Load from the default location. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file deserializes as null
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: Self = serde_yaml::from_str(raw)?;
        config.scan.workers = config.scan.workers.max(1);
        Ok(config)
    }
}

/// `$XDG_CONFIG_HOME/claude-jump/config.yaml`, else `~/.config/claude-jump/config.yaml`
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config"),
    };
    Ok(base.join(env!("CARGO_PKG_NAME")).join(CONFIG_FILE_NAME))
}
