//! Readiness of a polled operation.

use serde::{Deserialize, Serialize};

/// Result of an operation that may have to be evaluated again once more
/// events have been processed.
///
/// | Variant | Meaning |
/// |---------|---------|
/// | `Yes` | The condition holds |
/// | `No` | The condition cannot hold |
/// | `Maybe` | Not decided yet, poll again after the next snapshot |
/// | `Repeat` | A query was just issued; re-evaluate immediately |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Yes,
    No,
    Maybe,
    Repeat,
}

impl Readiness {
    /// Returns `true` for [`Readiness::Yes`].
    #[must_use]
    pub fn is_yes(self) -> bool {
        matches!(self, Self::Yes)
    }

    /// Combines two results of an "any" fan-out: `Yes` wins, then
    /// `Repeat`, then `Maybe`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Yes, _) | (_, Self::Yes) => Self::Yes,
            (Self::Repeat, _) | (_, Self::Repeat) => Self::Repeat,
            (Self::Maybe, _) | (_, Self::Maybe) => Self::Maybe,
            _ => Self::No,
        }
    }
}

impl From<bool> for Readiness {
    fn from(value: bool) -> Self {
        if value {
            Self::Yes
        } else {
            Self::No
        }
    }
}
