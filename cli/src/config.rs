//! Run settings read from `when.toml`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use interpreter::{RestartPolicy, SchedulerConfig};
use serde::Deserialize;

/// Name of the settings file looked up next to the program source.
pub const CONFIG_FILE_NAME: &str = "when.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartSetting {
    #[default]
    Reset,
    Error,
}

impl From<RestartSetting> for RestartPolicy {
    fn from(setting: RestartSetting) -> Self {
        match setting {
            RestartSetting::Reset => RestartPolicy::Reset,
            RestartSetting::Error => RestartPolicy::Error,
        }
    }
}

/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Stop after this many passes. Unset runs until `exit`.
    pub max_passes: Option<u64>,

    /// Pause between passes, in milliseconds.
    pub pass_delay_ms: u64,

    /// What `start` does to an exhausted counted block.
    pub restart_policy: RestartSetting,

    pub max_call_depth: usize,

    /// How often `--watch` checks the source file, in milliseconds.
    pub watch_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_passes: None,
            pass_delay_ms: 0,
            restart_policy: RestartSetting::Reset,
            max_call_depth: 256,
            watch_interval_ms: 250,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, error: std::io::Error },
    Parse { path: PathBuf, message: String },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, error } => {
                write!(f, "cannot read '{}': {}", path.display(), error)
            }
            ConfigError::Parse { path, message } => {
                write!(f, "invalid config '{}': {}", path.display(), message)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_passes == Some(0) {
            return Err(ConfigError::Invalid("max_passes must be > 0".into()));
        }
        if self.max_call_depth == 0 {
            return Err(ConfigError::Invalid("max_call_depth must be > 0".into()));
        }
        if self.watch_interval_ms == 0 {
            return Err(ConfigError::Invalid("watch_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_passes: self.max_passes,
            pass_delay: Duration::from_millis(self.pass_delay_ms),
            restart_policy: self.restart_policy.into(),
            max_call_depth: self.max_call_depth,
        }
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig, ConfigError> {
    if !path.exists() {
        return Ok(RunConfig::default());
    }
    read_config(path)
}

/// Load an explicitly requested file, or `when.toml` beside `source`.
pub fn resolve_config(explicit: Option<&Path>, source: &Path) -> Result<RunConfig, ConfigError> {
    match explicit {
        Some(path) => read_config(path),
        None => {
            let dir = source.parent().unwrap_or_else(|| Path::new("."));
            load_config(&dir.join(CONFIG_FILE_NAME))
        }
    }
}

fn read_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
        path: path.to_path_buf(),
        error,
    })?;
    let cfg: RunConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    cfg.validate()?;
    Ok(cfg)
}
