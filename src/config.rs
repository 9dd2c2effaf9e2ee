use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from devprobe.toml.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub command: CommandConfig,
    pub timeouts: TimeoutConfig,
    /// Extra variables for the child, applied before the forced diagnostic flags.
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub run_secs: u64,
    pub soft_stop_secs: u64,
    pub hard_kill_secs: u64,
    pub poll_interval_ms: u64,
}

/// Resolved phase budgets for one supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// T1: how long the command may run before it is interrupted.
    pub run: Duration,
    /// T2: how long output is still forwarded after the interrupt.
    pub soft_stop: Duration,
    /// T3: how long to wait for the OS to reap after the kill.
    pub hard_kill: Duration,
    pub poll_interval: Duration,
}

/// Errors produced while loading a config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load config from `path`.
///
/// A missing file is not an error: it yields the built-in defaults.
pub fn load(path: &Path) -> Result<ProbeConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(ProbeConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

impl ProbeConfig {
    /// The argument list to run when none is given on the command line.
    ///
    /// An empty `[command] args` falls back to the built-in dev-server command.
    pub fn default_args(&self) -> Vec<String> {
        if self.command.args.is_empty() {
            CommandConfig::default().args
        } else {
            self.command.args.clone()
        }
    }
}

impl TimeoutConfig {
    pub fn resolve(&self) -> Timeouts {
        Timeouts {
            run: Duration::from_secs(self.run_secs),
            soft_stop: Duration::from_secs(self.soft_stop_secs),
            hard_kill: Duration::from_secs(self.hard_kill_secs),
            // A zero interval would turn the poll loop into a spin.
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        TimeoutConfig::default().resolve()
    }
}

// --- Default implementations ---

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            args: vec![
                "npx".to_string(),
                "expo".to_string(),
                "start".to_string(),
                "--web".to_string(),
                "--localhost".to_string(),
                "--max-workers".to_string(),
                "2".to_string(),
            ],
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            run_secs: 25,
            soft_stop_secs: 3,
            hard_kill_secs: 2,
            poll_interval_ms: 500,
        }
    }
}
