//! tcx runtime - distributed test execution engine.
//!
//! Every process of a distributed test run embeds one
//! [`Executor`](executor::Executor). Its role is fixed by how the process
//! was started:
//!
//! | Role | Started as | Does |
//! |------|------------|------|
//! | Host controller (HC) | `Executor::host` | forks MTC and PTC processes on request |
//! | Main test component (MTC) | forked by the HC | runs control parts and test cases |
//! | Parallel test component (PTC) | forked by the HC | runs behaviour functions |
//! | Single mode | `Executor::single` | control part and MTC in one process, no coordinator |
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SDK Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  tcx-types   : ComponentRef, Verdict, Readiness, ErrorCode   │
//! │  tcx-event   : coordinator message catalogue                 │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Runtime Layer (THIS CRATE)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  executor/    : state machine, component ops, main loops     │
//! │  port/        : test ports, queues, connection protocol      │
//! │  connection/  : framing and local/TCP/UNIX transports        │
//! │  coordinator/ : link to the MC                               │
//! │  status, registry, names, process : executor bookkeeping     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Process Topology
//!
//! ```text
//!                        ┌──────────────┐
//!            ┌──────────►│      MC      │◄──────────┐
//!            │           └──────────────┘           │
//!            │ coordinator     ▲ link               │
//!      ┌─────┴────┐            │              ┌─────┴────┐
//!      │    HC    │ fork  ┌────┴─────┐        │   PTC    │
//!      │          │──────►│   MTC    │◄══════►│          │
//!      └──────────┘       └──────────┘  port  └──────────┘
//!                                    connection
//! ```
//!
//! Component operations (`create`, `start`, `done`, `connect`, ...) are
//! requests to the MC; the executor blocks in snapshots until the reply
//! arrives. Port data flows directly between components.
//!
//! # Modules
//!
//! ## [`executor`] - Executor
//!
//! - [`Executor`](executor::Executor): per-process state and operations
//! - [`ExecutorState`](executor::ExecutorState): the state machine
//! - [`RunOutcome`](executor::RunOutcome): how a main loop ended
//!
//! ## [`port`] - Test Ports
//!
//! - [`Port`](port::Port), [`PortSet`](port::PortSet)
//! - [`PortBehaviour`](port::PortBehaviour): user hooks for mapping and
//!   system-side sending
//!
//! ## [`config`] - Configuration
//!
//! Layered TOML: environment > project > global > default.
//!
//! ## [`behaviours`] - Test Code Entry Points
//!
//! [`Behaviours`](behaviours::Behaviours) is implemented by the compiled
//! test suite.
//!
//! ## [`testing`] - Test Doubles
//!
//! Scripted coordinator, fake process control and a recording
//! `Behaviours`.

pub mod behaviours;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod logging;
pub mod names;
pub mod port;
pub mod process;
pub mod registry;
pub mod signal;
pub mod status;
pub mod testing;

// Re-exports for convenience
pub use behaviours::Behaviours;
pub use config::{ConfigError, ConfigLoader, TcxConfig};
pub use coordinator::{Coordinator, CoordinatorError, DetachedCoordinator, StreamCoordinator};
pub use error::ExecutorError;
pub use executor::{Executor, ExecutorState, PtcIdentity, Role, RunOutcome, VerdictStatistics};
pub use port::{Port, PortBehaviour, PortSet, QueueingBehaviour};
pub use process::{ProcessControl, SystemProcesses};
pub use status::{CheckStatus, StatusCache};
