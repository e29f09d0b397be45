//! Coordinator message catalogue for tcx.
//!
//! Every process role talks to the coordinator (MC) through two closed
//! message sets: [`Outgoing`] (component → MC) and [`Incoming`]
//! (MC → component). The wire encoding is owned by the coordinator link
//! in `tcx-runtime`; this crate fixes only the message names and fields.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SDK Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  tcx-types   : ComponentRef, Verdict, ErrorCode              │
//! │  tcx-event   : coordinator message catalogue      ◄── HERE   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Request / Reply Pairs
//!
//! ```text
//!  component                              coordinator
//!  ─────────                              ───────────
//!  CreateReq ───────────────────────────► CreateAck(ref)
//!  StartReq ────────────────────────────► StartAck
//!                     ... later ...       Stopped / StoppedKilled (from PTC)
//!  DoneReq(ref|any|all) ────────────────► DoneAck(answer, return?)
//!  KilledReq ───────────────────────────► KilledAck(answer)
//!  IsRunning / IsAlive ─────────────────► Running / Alive(answer)
//!  StopReq / KillReq ───────────────────► StopAck / KillAck
//!  ConnectReq ──────────────────────────► ConnectAck
//!  DisconnectReq / MapReq / UnmapReq ───► DisconnectAck / MapAck / UnmapAck
//! ```
//!
//! # Example
//!
//! ```
//! use tcx_event::{Incoming, Outgoing};
//! use tcx_types::ComponentRef;
//!
//! let req = Outgoing::KilledReq { component: ComponentRef::ALL };
//! assert_eq!(req.kind(), "killed_req");
//!
//! let reply = Incoming::KilledAck { answer: true };
//! assert!(reply.validate().is_ok());
//! ```

mod error;
mod incoming;
mod outgoing;
mod payload;

pub use error::EventError;
pub use incoming::Incoming;
pub use outgoing::Outgoing;
pub use payload::{ComponentStatusReport, PtcVerdict, ReturnValue, StreamAddress};
