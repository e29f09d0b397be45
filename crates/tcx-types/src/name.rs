//! Module-qualified names and transport kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A definition name qualified by its module, e.g. a component type or
/// a behaviour function.
///
/// # Example
///
/// ```
/// use tcx_types::QualifiedName;
///
/// let ty = QualifiedName::new("Demo", "PtcType");
/// assert_eq!(ty.to_string(), "Demo.PtcType");
/// assert!(QualifiedName::default().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub module: String,
    pub definition: String,
}

impl QualifiedName {
    #[must_use]
    pub fn new(module: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            definition: definition.into(),
        }
    }

    /// Returns `true` when neither part is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.module.is_empty() && self.definition.is_empty()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_empty() {
            f.write_str(&self.definition)
        } else {
            write!(f, "{}.{}", self.module, self.definition)
        }
    }
}

/// Transport carrying a port connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Both ports live in the same process.
    Local,
    /// TCP stream socket.
    InetStream,
    /// UNIX-domain stream socket.
    UnixStream,
}

impl TransportKind {
    /// Returns `true` for socket-backed transports.
    #[must_use]
    pub fn is_stream(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "LOCAL",
            Self::InetStream => "INET_STREAM",
            Self::UnixStream => "UNIX_STREAM",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_display_without_module() {
        assert_eq!(QualifiedName::new("", "f").to_string(), "f");
    }

    #[test]
    fn transport_kinds() {
        assert!(!TransportKind::Local.is_stream());
        assert!(TransportKind::UnixStream.is_stream());
        assert_eq!(TransportKind::InetStream.to_string(), "INET_STREAM");
    }
}
