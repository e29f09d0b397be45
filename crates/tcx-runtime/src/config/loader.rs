//! Configuration loader with hierarchical merging.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Global config (`~/.tcx/config.toml`)
//! 3. Explicit config file (e.g. handed over by the launcher)
//! 4. Environment variables (`TCX_*`)
//!
//! Each layer overrides the previous.

use super::{default_config_path, ConfigError, TcxConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Helper macro for parsing boolean environment variables.
macro_rules! parse_env_bool {
    ($field:expr, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $field = parse_bool(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected bool"))?;
        }
    };
}

/// Helper macro for parsing numeric environment variables.
macro_rules! parse_env_num {
    ($field:expr, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $field = val
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_env_var($var, "expected unsigned integer"))?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```no_run
/// use tcx_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_config_file("/etc/tcx/hc.toml")
///     .skip_env_vars()
///     .load()?;
/// # Ok::<(), tcx_runtime::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Global config file path (defaults to ~/.tcx/config.toml).
    global_config_path: Option<PathBuf>,

    /// Explicit config file layered above the global one.
    config_file: Option<PathBuf>,

    /// Skip environment variable loading.
    skip_env: bool,

    /// Skip global config loading.
    skip_global: bool,
}

impl ConfigLoader {
    /// Creates a new loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom global config path.
    #[must_use]
    pub fn with_global_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Adds an explicit config file layered above the global config.
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Skips environment variable loading.
    ///
    /// Useful for testing with deterministic config.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Skips global config loading.
    #[must_use]
    pub fn skip_global_config(mut self) -> Self {
        self.skip_global = true;
        self
    }

    /// Loads and merges configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any config file exists but cannot be
    /// parsed, or if an environment override is malformed. Missing
    /// config files are silently ignored.
    pub fn load(&self) -> Result<TcxConfig, ConfigError> {
        let mut config = TcxConfig::default();

        if !self.skip_global {
            let global_path = self
                .global_config_path
                .clone()
                .unwrap_or_else(default_config_path);

            if let Some(global_config) = Self::load_file(&global_path)? {
                debug!(path = %global_path.display(), "Loaded global config");
                config.merge(&global_config);
            }
        }

        if let Some(ref path) = self.config_file {
            if let Some(file_config) = Self::load_file(path)? {
                debug!(path = %path.display(), "Loaded config file");
                config.merge(&file_config);
            }
        }

        if !self.skip_env {
            Self::apply_env_vars(&mut config)?;
        }

        validate(&config)?;
        Ok(config)
    }

    /// Loads a config file, returning None if it doesn't exist.
    fn load_file(path: &Path) -> Result<Option<TcxConfig>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

        let config =
            TcxConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;

        Ok(Some(config))
    }

    /// Applies environment variable overrides.
    fn apply_env_vars(config: &mut TcxConfig) -> Result<(), ConfigError> {
        parse_env_num!(config.executor.snapshot_timeout_ms, "TCX_SNAPSHOT_TIMEOUT_MS");
        parse_env_num!(config.connection.unix_bind_max_iter, "TCX_UNIX_BIND_MAX_ITER");
        parse_env_bool!(config.logging.ansi, "TCX_LOG_ANSI");

        if let Ok(val) = std::env::var("TCX_LOCAL_ADDRESS") {
            config.connection.local_address = val;
        }
        if let Ok(val) = std::env::var("TCX_UNIX_SOCKET_DIR") {
            config.connection.unix_socket_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TCX_LOG_LEVEL") {
            config.logging.level = val;
        }

        Ok(())
    }
}

fn validate(config: &TcxConfig) -> Result<(), ConfigError> {
    if config.connection.unix_bind_max_iter == 0 {
        return Err(ConfigError::invalid_value(
            "connection.unix_bind_max_iter",
            "must allow at least one attempt",
        ));
    }
    if config.connection.max_frame_len == 0 {
        return Err(ConfigError::invalid_value(
            "connection.max_frame_len",
            "must be positive",
        ));
    }
    if config.executor.overload_retry_max_ms < config.executor.overload_retry_ms {
        return Err(ConfigError::invalid_value(
            "executor.overload_retry_max_ms",
            "smaller than executor.overload_retry_ms",
        ));
    }
    Ok(())
}

/// Parses a boolean from string.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off"
/// (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
