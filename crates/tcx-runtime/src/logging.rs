//! Log output setup.
//!
//! Every module logs through `tracing`; this module installs the
//! subscriber once per process.
//!
//! # Filter precedence
//!
//! `TCX_LOG` > `RUST_LOG` > [`LoggingConfig::level`]
//!
//! # Output
//!
//! | `logging.file` | Writer | ANSI |
//! |----------------|--------|------|
//! | unset | stderr | `logging.ansi` |
//! | set | appended to the file | never |
//!
//! Forked components inherit the subscriber of the host controller, so
//! one file collects the records of every process on the host. Each
//! record is buffered and written with a single call under a lock, so
//! records of different processes do not interleave mid-line.

use crate::config::LoggingConfig;
use crate::error::ExecutorError;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable with the highest-priority filter directive.
pub const LOG_ENV: &str = "TCX_LOG";

/// Filter from the environment, falling back to `default_level`.
#[must_use]
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs the global subscriber described by `config`.
///
/// Returns `Ok(false)` if a subscriber was already installed, e.g. by a
/// test harness.
///
/// # Errors
///
/// [`ExecutorError::Io`] if the log file cannot be opened.
pub fn init(config: &LoggingConfig) -> Result<bool, ExecutorError> {
    let filter = env_filter(&config.level);
    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ExecutorError::io(format!("cannot open log file {}", path.display()), e)
                })?;
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(FileMakeWriter::new(file))
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        None => {
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(config.ansi)
                .with_writer(io::stderr)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };
    Ok(installed.is_ok())
}

/// [`MakeWriter`] appending whole records to a shared log file.
#[derive(Debug, Clone)]
pub struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

impl FileMakeWriter {
    #[must_use]
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            file: Arc::clone(&self.file),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Buffers one record; the record is written when the writer drops.
#[derive(Debug)]
pub struct FileWriter {
    file: Arc<Mutex<File>>,
    buf: Vec<u8>,
}

impl Write for FileWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let mut file = self.file.lock();
        // Nowhere left to report a failing log write.
        let _ = file.write_all(&self.buf);
        let _ = file.flush();
    }
}
