//! Core types for the tcx test execution engine.
//!
//! This crate holds the small value types shared by every process role
//! (host controller, main test component, parallel test component) and
//! by the coordinator message catalogue.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SDK Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  tcx-types   : ComponentRef, Verdict, ErrorCode   ◄── HERE   │
//! │  tcx-event   : coordinator message catalogue                 │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Runtime Layer                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  tcx-runtime : executor, registry, status cache, ports,      │
//! │                connections, framing, transports              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tcx_types::{ComponentRef, Readiness, Verdict};
//!
//! let target = ComponentRef::new(4);
//! assert!(target.is_ptc());
//!
//! let verdict = Verdict::Pass.worst(Verdict::Inconc);
//! assert_eq!(verdict, Verdict::Inconc);
//!
//! assert_eq!(Readiness::Maybe.or(Readiness::Yes), Readiness::Yes);
//! ```

mod component;
mod error;
mod name;
mod readiness;
mod verdict;

pub use component::ComponentRef;
pub use error::{assert_error_codes, ErrorCode};
pub use name::{QualifiedName, TransportKind};
pub use readiness::Readiness;
pub use verdict::Verdict;
