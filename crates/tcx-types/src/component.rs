//! Component references.
//!
//! Every test component is addressed by a small integer. A handful of
//! values are reserved for pseudo-components; everything from
//! [`ComponentRef::FIRST_PTC`] upwards is allocated dynamically by the
//! coordinator for parallel test components.
//!
//! | Constant | Value | Meaning |
//! |----------|-------|---------|
//! | `CONTROL` | -4 | The control part pseudo-component |
//! | `UNBOUND` | -3 | A reference variable that was never assigned |
//! | `ALL` | -2 | "all component" in aggregate operations |
//! | `ANY` | -1 | "any component" in aggregate operations |
//! | `NULL` | 0 | The null reference |
//! | `MTC` | 1 | The main test component |
//! | `SYSTEM` | 2 | The test system interface |
//! | `FIRST_PTC` | 3 | First dynamically allocated PTC |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer reference to a test component.
///
/// The default value is [`ComponentRef::NULL`].
///
/// # Example
///
/// ```
/// use tcx_types::ComponentRef;
///
/// let ptc = ComponentRef::new(7);
/// assert!(ptc.is_ptc());
/// assert!(!ComponentRef::MTC.is_ptc());
/// assert_eq!(ComponentRef::ANY.to_string(), "any component");
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ComponentRef(i32);

impl ComponentRef {
    /// The control part pseudo-component.
    pub const CONTROL: Self = Self(-4);
    /// An unassigned reference.
    pub const UNBOUND: Self = Self(-3);
    /// Aggregate "all component".
    pub const ALL: Self = Self(-2);
    /// Aggregate "any component".
    pub const ANY: Self = Self(-1);
    /// The null reference.
    pub const NULL: Self = Self(0);
    /// The main test component.
    pub const MTC: Self = Self(1);
    /// The test system interface.
    pub const SYSTEM: Self = Self(2);
    /// Lowest reference handed out to a parallel test component.
    pub const FIRST_PTC: Self = Self(3);

    /// Wraps a raw reference.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Returns `true` for a dynamically allocated PTC reference.
    #[must_use]
    pub const fn is_ptc(self) -> bool {
        self.0 >= Self::FIRST_PTC.0
    }

    /// Returns `true` for `ANY` or `ALL`.
    #[must_use]
    pub const fn is_aggregate(self) -> bool {
        self.0 == Self::ANY.0 || self.0 == Self::ALL.0
    }

    /// Returns `true` for the null, MTC and system references, which
    /// cannot be the subject of done/killed/running/alive queries.
    #[must_use]
    pub const fn is_reserved_target(self) -> bool {
        self.0 == Self::NULL.0 || self.0 == Self::MTC.0 || self.0 == Self::SYSTEM.0
    }

    /// Returns the 4 native-endian bytes used for path hashing.
    #[must_use]
    pub const fn to_ne_bytes(self) -> [u8; 4] {
        self.0.to_ne_bytes()
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NULL => f.write_str("null"),
            Self::MTC => f.write_str("mtc"),
            Self::SYSTEM => f.write_str("system"),
            Self::ANY => f.write_str("any component"),
            Self::ALL => f.write_str("all component"),
            Self::UNBOUND => f.write_str("<unbound>"),
            Self::CONTROL => f.write_str("control"),
            Self(raw) => write!(f, "{raw}"),
        }
    }
}

impl From<i32> for ComponentRef {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_values() {
        assert_eq!(ComponentRef::NULL.raw(), 0);
        assert_eq!(ComponentRef::MTC.raw(), 1);
        assert_eq!(ComponentRef::SYSTEM.raw(), 2);
        assert_eq!(ComponentRef::FIRST_PTC.raw(), 3);
        assert_eq!(ComponentRef::ANY.raw(), -1);
        assert_eq!(ComponentRef::ALL.raw(), -2);
        assert_eq!(ComponentRef::UNBOUND.raw(), -3);
        assert_eq!(ComponentRef::CONTROL.raw(), -4);
    }

    #[test]
    fn classification() {
        assert!(ComponentRef::new(3).is_ptc());
        assert!(ComponentRef::new(1000).is_ptc());
        assert!(!ComponentRef::SYSTEM.is_ptc());
        assert!(!ComponentRef::ANY.is_ptc());

        assert!(ComponentRef::ANY.is_aggregate());
        assert!(ComponentRef::ALL.is_aggregate());
        assert!(!ComponentRef::MTC.is_aggregate());

        assert!(ComponentRef::NULL.is_reserved_target());
        assert!(ComponentRef::MTC.is_reserved_target());
        assert!(ComponentRef::SYSTEM.is_reserved_target());
        assert!(!ComponentRef::new(5).is_reserved_target());
    }

    #[test]
    fn display() {
        assert_eq!(ComponentRef::MTC.to_string(), "mtc");
        assert_eq!(ComponentRef::ALL.to_string(), "all component");
        assert_eq!(ComponentRef::new(42).to_string(), "42");
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&ComponentRef::new(9)).expect("serialize");
        assert_eq!(json, "9");
        let back: ComponentRef = serde_json::from_str("-2").expect("deserialize");
        assert_eq!(back, ComponentRef::ALL);
    }
}
