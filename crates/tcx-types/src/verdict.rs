//! Test verdicts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a test component, ordered by severity.
///
/// A component's verdict only ever moves towards [`Verdict::Error`];
/// combining two verdicts keeps the stricter one.
///
/// ```text
/// None < Pass < Inconc < Fail < Error
/// ```
///
/// # Example
///
/// ```
/// use tcx_types::Verdict;
///
/// assert_eq!(Verdict::Pass.worst(Verdict::Fail), Verdict::Fail);
/// assert_eq!(Verdict::Inconc.worst(Verdict::Pass), Verdict::Inconc);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    None,
    Pass,
    Inconc,
    Fail,
    Error,
}

impl Verdict {
    /// All verdicts in ascending severity.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Pass,
        Self::Inconc,
        Self::Fail,
        Self::Error,
    ];

    /// Returns the stricter of two verdicts.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Lowercase name as printed in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Inconc => "inconc",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_by_severity() {
        for pair in Verdict::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should be below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn worst_is_commutative() {
        for a in Verdict::ALL {
            for b in Verdict::ALL {
                assert_eq!(a.worst(b), b.worst(a));
            }
        }
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&Verdict::Inconc).expect("serialize");
        assert_eq!(json, "\"inconc\"");
    }
}
