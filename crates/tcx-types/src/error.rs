//! Error codes shared by every tcx error type.
//!
//! Each error enum in the workspace owns one code prefix:
//!
//! | Prefix | Type | Crate |
//! |--------|------|-------|
//! | `EXEC_` | `ExecutorError` | tcx-runtime |
//! | `FRAME_` | `FrameError` | tcx-runtime |
//! | `LISTEN_` | `ListenError` | tcx-runtime |
//! | `COORD_` | `CoordinatorError` | tcx-runtime |
//! | `CONFIG_` | `ConfigError` | tcx-runtime |
//! | `EVENT_` | `EventError` | tcx-event |
//!
//! Codes appear in log records next to the message text, e.g.
//! `EXEC_TEST_CASE`, `FRAME_TOO_LARGE`, `LISTEN_PATHS_EXHAUSTED`.

/// Stable code and recoverability of an error.
///
/// Recoverability follows the executor's fatal split: an error is
/// recoverable when the process can keep its role after reporting it.
/// For `ExecutorError` this is exactly `!is_fatal()`, so a dynamic test
/// case error (`EXEC_TEST_CASE`) is recoverable while a coordinator
/// failure (`EXEC_COORDINATOR`) is not. Lower-level errors answer the
/// same question for the place they surface:
///
/// - `LISTEN_*` is recoverable: the failure goes back to the MC as a
///   connect error and the test case continues.
/// - `FRAME_*` is not: a peer that sends an undecodable frame leaves
///   the connection in an unknown state.
pub trait ErrorCode {
    /// `PREFIX_UPPER_SNAKE` code, stable across releases.
    fn code(&self) -> &'static str;

    /// Whether the process keeps its current role after this error.
    fn is_recoverable(&self) -> bool;
}

/// Checks the codes of every variant of one error type.
///
/// Each code must start with `prefix`, use only `A-Z`, `0-9` and single
/// underscores, and differ from the codes of the other variants.
///
/// # Panics
///
/// On the first code that breaks a rule.
pub fn assert_error_codes<E: ErrorCode>(variants: &[E], prefix: &str) {
    let mut seen: Vec<&'static str> = Vec::with_capacity(variants.len());
    for err in variants {
        let code = err.code();
        let rest = code.strip_prefix(prefix).unwrap_or_else(|| {
            panic!("error code {code} does not start with {prefix}")
        });
        let words_ok = rest.split('_').all(|word| {
            !word.is_empty()
                && word
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        });
        assert!(words_ok, "error code {code} is not UPPER_SNAKE_CASE");
        assert!(!seen.contains(&code), "error code {code} is used twice");
        seen.push(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mirrors the shape of the listener errors.
    enum Listen {
        PathsExhausted,
        Bind,
    }

    impl ErrorCode for Listen {
        fn code(&self) -> &'static str {
            match self {
                Self::PathsExhausted => "LISTEN_PATHS_EXHAUSTED",
                Self::Bind => "LISTEN_BIND",
            }
        }

        fn is_recoverable(&self) -> bool {
            true
        }
    }

    struct Code(&'static str);

    impl ErrorCode for Code {
        fn code(&self) -> &'static str {
            self.0
        }

        fn is_recoverable(&self) -> bool {
            false
        }
    }

    #[test]
    fn distinct_prefixed_codes_pass() {
        assert_error_codes(&[Listen::PathsExhausted, Listen::Bind], "LISTEN_");
        assert_error_codes(&[Code("FRAME_TOO_LARGE"), Code("FRAME_V2")], "FRAME_");
    }

    #[test]
    #[should_panic(expected = "does not start with EXEC_")]
    fn foreign_prefix_is_rejected() {
        assert_error_codes(&[Listen::Bind], "EXEC_");
    }

    #[test]
    #[should_panic(expected = "used twice")]
    fn duplicate_code_is_rejected() {
        assert_error_codes(&[Code("EXEC_IO"), Code("EXEC_IO")], "EXEC_");
    }

    #[test]
    fn malformed_codes_are_rejected() {
        for code in ["EXEC_", "EXEC_io", "EXEC__IO", "EXEC_IO_", "EXEC_I-O"] {
            let result = std::panic::catch_unwind(|| assert_error_codes(&[Code(code)], "EXEC_"));
            assert!(result.is_err(), "{code} was accepted");
        }
    }
}
