//! Configuration types.
//!
//! All types implement [`Default`] for compile-time fallback values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
///
/// This is the unified configuration after merging all layers.
///
/// # Example
///
/// ```
/// use tcx_runtime::config::TcxConfig;
///
/// let config = TcxConfig::default();
/// assert_eq!(config.connection.unix_bind_max_iter, 100);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TcxConfig {
    /// Event loop and host controller tuning.
    pub executor: ExecutorConfig,

    /// Port connection settings.
    pub connection: ConnectionConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

impl TcxConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes to TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserializes from TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Merges another config into this one.
    ///
    /// Values from `other` override values in `self` only if they
    /// differ from the default.
    pub fn merge(&mut self, other: &Self) {
        self.executor.merge(&other.executor);
        self.connection.merge(&other.connection);
        self.logging.merge(&other.logging);
    }
}

/// Event loop and host controller tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound for one blocking snapshot, in milliseconds.
    pub snapshot_timeout_ms: u64,

    /// First retry interval of the overload check, in milliseconds.
    pub overload_retry_ms: u64,

    /// Cap for the doubling overload retry interval.
    pub overload_retry_max_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout_ms: 1_000,
            overload_retry_ms: 1_000,
            overload_retry_max_ms: 60_000,
        }
    }
}

impl ExecutorConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.snapshot_timeout_ms != default.snapshot_timeout_ms {
            self.snapshot_timeout_ms = other.snapshot_timeout_ms;
        }
        if other.overload_retry_ms != default.overload_retry_ms {
            self.overload_retry_ms = other.overload_retry_ms;
        }
        if other.overload_retry_max_ms != default.overload_retry_max_ms {
            self.overload_retry_max_ms = other.overload_retry_max_ms;
        }
    }

    #[must_use]
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    #[must_use]
    pub fn overload_retry(&self) -> Duration {
        Duration::from_millis(self.overload_retry_ms)
    }

    #[must_use]
    pub fn overload_retry_max(&self) -> Duration {
        Duration::from_millis(self.overload_retry_max_ms)
    }
}

/// Port connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Address TCP listeners bind to when the coordinator link cannot
    /// tell us our own address.
    pub local_address: String,

    /// Directory holding UNIX-domain listener sockets.
    pub unix_socket_dir: PathBuf,

    /// File name prefix of UNIX-domain listener sockets.
    pub unix_socket_prefix: String,

    /// How many alternative pathnames to try before giving up.
    pub unix_bind_max_iter: u32,

    /// Largest accepted frame body in bytes.
    pub max_frame_len: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            local_address: "127.0.0.1".into(),
            unix_socket_dir: PathBuf::from("/tmp"),
            unix_socket_prefix: "tcx-portconn-".into(),
            unix_bind_max_iter: 100,
            max_frame_len: 64 * 1024 * 1024,
        }
    }
}

impl ConnectionConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.local_address != default.local_address {
            self.local_address = other.local_address.clone();
        }
        if other.unix_socket_dir != default.unix_socket_dir {
            self.unix_socket_dir = other.unix_socket_dir.clone();
        }
        if other.unix_socket_prefix != default.unix_socket_prefix {
            self.unix_socket_prefix = other.unix_socket_prefix.clone();
        }
        if other.unix_bind_max_iter != default.unix_bind_max_iter {
            self.unix_bind_max_iter = other.unix_bind_max_iter;
        }
        if other.max_frame_len != default.max_frame_len {
            self.max_frame_len = other.max_frame_len;
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `"info"` or `"tcx_runtime=debug"`.
    pub level: String,

    /// Append log records to this file instead of stderr.
    pub file: Option<PathBuf>,

    /// Colourise output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.level != default.level {
            self.level = other.level.clone();
        }
        if other.file.is_some() {
            self.file = other.file.clone();
        }
        if other.ansi != default.ansi {
            self.ansi = other.ansi;
        }
    }
}
