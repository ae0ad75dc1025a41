//! Configuration file loading for codebox
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG};
use crate::types::{MAX_TIMEOUT_SECS, checked_seconds};

/// Upper bound on the worker pool; each worker may hold one live environment
const MAX_WORKERS: usize = 256;

/// Upper bound on the CPU share of a single environment
const MAX_CPUS: f64 = 64.0;

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the embedded defaults or `path`, then apply `CODEBOX_*` environment overrides
    ///
    /// Nested keys use a double underscore, e.g. `CODEBOX_DISPATCHER__WORKERS=8`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, env_source())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(path) => ConfigBuilder::builder().add_source(File::from(path)),
            None => ConfigBuilder::builder()
                .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml)),
        };

        let config: Config = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Loading validates automatically; call this again after changing
    /// fields programmatically.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "container_prefix must not be empty".to_owned(),
            ));
        }

        for (id, lang) in &self.languages {
            if id.to_lowercase() != *id {
                return Err(ConfigError::Invalid(format!(
                    "language id '{id}' must be lower case"
                )));
            }
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.image.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty image"
                )));
            }
            if lang.extension.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty extension"
                )));
            }
            if let Some(ref command) = lang.command
                && command.is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty command"
                )));
            }
        }

        let limits = &self.default_limits;
        if limits.memory_limit.is_none() || limits.cpu_limit.is_none() {
            return Err(ConfigError::Invalid(
                "default_limits must set memory_limit and cpu_limit".to_owned(),
            ));
        }

        let dispatcher = &self.dispatcher;
        if dispatcher.workers == 0 || dispatcher.workers > MAX_WORKERS {
            return Err(ConfigError::Invalid(format!(
                "dispatcher.workers must be between 1 and {MAX_WORKERS}"
            )));
        }
        if dispatcher.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.queue_capacity must be at least 1".to_owned(),
            ));
        }
        let Some(wait_timeout) = checked_seconds(dispatcher.wait_timeout) else {
            return Err(ConfigError::Invalid(format!(
                "dispatcher.wait_timeout must be a number of seconds in (0, {MAX_TIMEOUT_SECS}]"
            )));
        };

        // Every language's effective limits must be enforceable and the
        // sandbox watchdog must fire before the caller gives up.
        let mut all_limits = vec![("default".to_owned(), limits.clone())];
        for (id, lang) in &self.languages {
            all_limits.push((id.clone(), lang.effective_limits(limits)));
        }
        for (id, limits) in all_limits {
            if limits.memory_limit == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "limits for '{id}': memory_limit must be positive"
                )));
            }
            if let Some(cpus) = limits.cpu_limit
                && !(cpus > 0.0 && cpus <= MAX_CPUS)
            {
                return Err(ConfigError::Invalid(format!(
                    "limits for '{id}': cpu_limit must be in (0, {MAX_CPUS}]"
                )));
            }
            if let Some(seconds) = limits.wall_time_limit
                && checked_seconds(seconds).is_none()
            {
                return Err(ConfigError::Invalid(format!(
                    "limits for '{id}': wall_time_limit must be a number of seconds \
                     in (0, {MAX_TIMEOUT_SECS}]"
                )));
            }
            let wall_time = limits.wall_time();
            if wall_time >= wait_timeout {
                return Err(ConfigError::Invalid(format!(
                    "limits for '{id}': wall_time_limit ({}s) must be below \
                     dispatcher.wait_timeout ({}s)",
                    wall_time.as_secs_f64(),
                    wait_timeout.as_secs_f64()
                )));
            }
        }

        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
