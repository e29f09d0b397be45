//! Executor errors.
//!
//! Every fallible runtime operation returns [`ExecutorError`]. The
//! variants follow the engine's error taxonomy:
//!
//! | Variant | Code | Recoverable | Fatal |
//! |---------|------|-------------|-------|
//! | [`ExecutorError::Internal`] | `EXEC_INTERNAL` | No | Yes |
//! | [`ExecutorError::TestCase`] | `EXEC_TEST_CASE` | Yes | No |
//! | [`ExecutorError::Terminated`] | `EXEC_TERMINATED` | Yes | No |
//! | [`ExecutorError::Coordinator`] | `EXEC_COORDINATOR` | No | Yes |
//! | [`ExecutorError::Frame`] | `EXEC_FRAME` | No | Yes |
//! | [`ExecutorError::Io`] | `EXEC_IO` | No | Yes |
//! | [`ExecutorError::System`] | `EXEC_SYSTEM` | No | Yes |
//! | [`ExecutorError::Config`] | `EXEC_CONFIG` | No | Yes |
//!
//! # Propagation
//!
//! ```text
//!  port / connection / cache operation
//!          │  Err(TestCase)      → caller's test case gets an error verdict
//!          │  Err(Terminated)    → unwinds the behaviour function (stop/kill)
//!          │  Err(fatal)         → unwinds to Executor::run()
//!          ▼
//!  Executor::run()  ── deactivate ports, notify coordinator, return
//! ```
//!
//! `Terminated` is control flow, not a failure: it is how `stop self`
//! and `kill self` leave a running behaviour function.

use crate::config::ConfigError;
use crate::connection::FrameError;
use crate::coordinator::CoordinatorError;
use nix::errno::Errno;
use tcx_types::ErrorCode;
use thiserror::Error;

/// Error raised by executor, port and connection operations.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// An internal invariant was violated, e.g. an operation in the
    /// wrong executor state.
    #[error("internal error: {0}")]
    Internal(String),

    /// A dynamic test case error caused by the test code.
    #[error("{0}")]
    TestCase(String),

    /// The running behaviour was stopped or killed.
    #[error("execution terminated")]
    Terminated,

    /// The coordinator link failed.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// A peer sent an undecodable frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A socket or file operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A system call failed.
    #[error("{context}: {errno}")]
    System { context: String, errno: Errno },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExecutorError {
    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a dynamic test case error.
    pub fn test_case(message: impl Into<String>) -> Self {
        Self::TestCase(message.into())
    }

    /// Creates an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a system call error with context.
    pub fn system(context: impl Into<String>, errno: Errno) -> Self {
        Self::System {
            context: context.into(),
            errno,
        }
    }

    /// Returns `true` when the process cannot continue its current role.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::TestCase(_) | Self::Terminated)
    }

    /// Returns `true` for the stop/kill control-flow signal.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl ErrorCode for ExecutorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Internal(_) => "EXEC_INTERNAL",
            Self::TestCase(_) => "EXEC_TEST_CASE",
            Self::Terminated => "EXEC_TERMINATED",
            Self::Coordinator(_) => "EXEC_COORDINATOR",
            Self::Frame(_) => "EXEC_FRAME",
            Self::Io { .. } => "EXEC_IO",
            Self::System { .. } => "EXEC_SYSTEM",
            Self::Config(_) => "EXEC_CONFIG",
        }
    }

    fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcx_types::assert_error_codes;

    fn all_variants() -> Vec<ExecutorError> {
        vec![
            ExecutorError::internal("x"),
            ExecutorError::test_case("x"),
            ExecutorError::Terminated,
            ExecutorError::Coordinator(CoordinatorError::Closed),
            ExecutorError::Frame(FrameError::InvalidTag(9)),
            ExecutorError::io("x", std::io::Error::other("y")),
            ExecutorError::system("x", Errno::EAGAIN),
            ExecutorError::Config(ConfigError::invalid_env_var("X", "y")),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "EXEC_");
    }

    #[test]
    fn fatal_split() {
        for err in all_variants() {
            let expected = !matches!(err, ExecutorError::TestCase(_) | ExecutorError::Terminated);
            assert_eq!(err.is_fatal(), expected, "{}", err.code());
            assert_eq!(err.is_recoverable(), !expected);
        }
    }

    #[test]
    fn test_case_message_is_verbatim() {
        let err = ExecutorError::test_case("Port p does not exist.");
        assert_eq!(err.to_string(), "Port p does not exist.");
    }
}
