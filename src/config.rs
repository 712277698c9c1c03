use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file, looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "devsmoke.toml";

/// Top-level configuration loaded from devsmoke.toml.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
#[derive(Default)]
pub struct SmokeConfig {
    pub server: ServerConfig,
    pub poll: PollConfig,
    pub markers: MarkerConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_ticks: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MarkerConfig {
    /// Exact line the server prints once it is accepting requests.
    pub ready: String,
    /// Regexes that flag a crash anywhere in the captured log.
    pub crash_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_secs: u64,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "run-dev.py".to_string(),
            args: Vec::new(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_ticks: 200,
        }
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            ready: "Quit the server with CTRL-C.".to_string(),
            crash_patterns: vec!["Traceback".to_string()],
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 10 }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub interval_ms: Option<u64>,
    pub max_ticks: Option<u32>,
    pub marker: Option<String>,
    pub grace_secs: Option<u64>,
}

/// Errors from loading or validating configuration.
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
    Invalid(String),
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
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl SmokeConfig {
    /// Load config from `path`. When `required` is false a missing file yields defaults.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply CLI overrides on top of file values.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(command) = overrides.command {
            self.server.command = command;
        }
        if let Some(args) = overrides.args {
            self.server.args = args;
        }
        if let Some(ms) = overrides.interval_ms {
            self.poll.interval_ms = ms;
        }
        if let Some(ticks) = overrides.max_ticks {
            self.poll.max_ticks = ticks;
        }
        if let Some(marker) = overrides.marker {
            self.markers.ready = marker;
        }
        if let Some(secs) = overrides.grace_secs {
            self.shutdown.grace_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.command.trim().is_empty() {
            return Err(ConfigError::Invalid("server.command is empty".to_string()));
        }
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.poll.max_ticks == 0 {
            return Err(ConfigError::Invalid(
                "poll.max_ticks must be greater than 0".to_string(),
            ));
        }
        if self.markers.ready.is_empty() {
            return Err(ConfigError::Invalid("markers.ready is empty".to_string()));
        }
        if self.markers.ready.contains('\n') {
            return Err(ConfigError::Invalid(
                "markers.ready must be a single line".to_string(),
            ));
        }
        Ok(())
    }
}
