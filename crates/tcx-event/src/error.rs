//! Message validation errors.
//!
//! Messages from the coordinator are deserialized structurally by serde;
//! [`Incoming::validate`](crate::Incoming::validate) then checks the
//! semantic constraints serde cannot express.
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`EventError::Malformed`] | `EVENT_MALFORMED` | No |
//! | [`EventError::UnexpectedTransport`] | `EVENT_UNEXPECTED_TRANSPORT` | No |
//!
//! # Usage
//!
//! ```
//! use tcx_event::EventError;
//! use tcx_types::ErrorCode;
//!
//! let err = EventError::malformed("component_status", "no status flag is set");
//! assert_eq!(err.code(), "EVENT_MALFORMED");
//! assert!(!err.is_recoverable());
//! ```

use tcx_types::{ErrorCode, TransportKind};
use thiserror::Error;

/// A coordinator message that decoded but makes no sense.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// Required content is missing or contradictory.
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },

    /// The transport does not fit the request, e.g. a listen request
    /// for a same-process connection.
    #[error("{kind} message cannot use transport {transport}")]
    UnexpectedTransport {
        kind: &'static str,
        transport: TransportKind,
    },
}

impl EventError {
    #[must_use]
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

impl ErrorCode for EventError {
    fn code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "EVENT_MALFORMED",
            Self::UnexpectedTransport { .. } => "EVENT_UNEXPECTED_TRANSPORT",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcx_types::assert_error_codes;

    fn all_variants() -> Vec<EventError> {
        vec![
            EventError::malformed("x", "y"),
            EventError::UnexpectedTransport {
                kind: "connect_listen",
                transport: TransportKind::Local,
            },
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "EVENT_");
    }

    #[test]
    fn display_names_transport() {
        let err = EventError::UnexpectedTransport {
            kind: "connect_listen",
            transport: TransportKind::Local,
        };
        assert!(err.to_string().contains("LOCAL"));
    }
}
