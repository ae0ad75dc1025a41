use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{FileExtension, LanguageProfile, SANDBOX_SOURCE_DIR};
use crate::types::{SandboxLimits, checked_seconds};

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../codebox.example.toml");

/// Prefix for environment variable overrides (e.g. `CODEBOX_DISPATCHER__WORKERS`)
pub const ENV_PREFIX: &str = "CODEBOX";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Worker pool and caller-side wait settings
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Number of workers, which is also the cap on simultaneous environments
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of tasks waiting for a worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds a caller waits for a result before giving up
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: f64,
}

impl DispatcherConfig {
    /// Caller-side bound, falling back to the default when the configured
    /// value is not a usable number of seconds
    pub fn wait_timeout(&self) -> Duration {
        checked_seconds(self.wait_timeout)
            .unwrap_or(Duration::from_secs(default_wait_timeout() as u64))
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            wait_timeout: default_wait_timeout(),
        }
    }
}

/// Config for codebox
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the docker CLI (uses PATH if not specified).
    #[serde(default)]
    pub docker_path: Option<PathBuf>,

    /// Parent directory for per-task scratch directories.
    ///
    /// Defaults to the system temp directory. The docker daemon must be able
    /// to bind-mount files from here.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Prefix for container names and the ownership label.
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Default resource limits applied to all executions.
    #[serde(default)]
    pub default_limits: SandboxLimits,

    /// Worker pool settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Language profiles keyed by lower-case language ID
    #[serde(default)]
    pub languages: HashMap<String, LanguageProfile>,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            docker_path: None,
            scratch_dir: None,
            container_prefix: default_container_prefix(),
            default_limits: SandboxLimits::default(),
            dispatcher: DispatcherConfig::default(),
            languages: HashMap::new(),
        }
    }

    /// Get the path to the docker binary
    pub fn docker_binary(&self) -> PathBuf {
        self.docker_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("docker"))
    }

    /// Label key marking environments owned by this installation
    pub fn owner_label(&self) -> String {
        format!("{}.owner", self.container_prefix)
    }

    /// Label key naming the process that launched an environment
    pub fn instance_label(&self) -> String {
        format!("{}.instance", self.container_prefix)
    }

    /// Label key holding an environment's launch time in unix seconds
    pub fn started_label(&self) -> String {
        format!("{}.started", self.container_prefix)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_container_prefix() -> String {
    "codebox".to_owned()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_wait_timeout() -> f64 {
    40.0
}
