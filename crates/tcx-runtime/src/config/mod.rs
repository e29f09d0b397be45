//! Configuration management with hierarchical layering.
//!
//! # Architecture
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌─────────────────────────────────────────┐
//! │  1. Environment Variables (TCX_*)       │  Runtime override
//! ├─────────────────────────────────────────┤
//! │  2. Explicit file (with_config_file)    │  Per-run settings
//! ├─────────────────────────────────────────┤
//! │  3. Global Config (~/.tcx/config.toml)  │  Host defaults
//! ├─────────────────────────────────────────┤
//! │  4. Default Values (compile-time)       │  Fallback
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Config Field | Type |
//! |----------|--------------|------|
//! | `TCX_SNAPSHOT_TIMEOUT_MS` | `executor.snapshot_timeout_ms` | u64 |
//! | `TCX_LOCAL_ADDRESS` | `connection.local_address` | String |
//! | `TCX_UNIX_SOCKET_DIR` | `connection.unix_socket_dir` | PathBuf |
//! | `TCX_UNIX_BIND_MAX_ITER` | `connection.unix_bind_max_iter` | u32 |
//! | `TCX_LOG_LEVEL` | `logging.level` | String |
//! | `TCX_LOG_ANSI` | `logging.ansi` | bool |
//!
//! # Example Configuration
//!
//! ```toml
//! [executor]
//! snapshot_timeout_ms = 1000
//! overload_retry_ms = 1000
//! overload_retry_max_ms = 60000
//!
//! [connection]
//! local_address = "127.0.0.1"
//! unix_socket_dir = "/tmp"
//! unix_socket_prefix = "tcx-portconn-"
//! unix_bind_max_iter = 100
//!
//! [logging]
//! level = "info"
//! ansi = true
//! ```

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::{ConnectionConfig, ExecutorConfig, LoggingConfig, TcxConfig};

/// Default global config directory.
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".tcx")
}

/// Default global config file path.
pub fn default_config_path() -> std::path::PathBuf {
    default_config_dir().join("config.toml")
}
