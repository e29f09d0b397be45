//! Link to the coordinator (MC).
//!
//! The executor talks to the coordinator only through the
//! [`Coordinator`] trait:
//!
//! ```text
//! ┌───────────┐  send(Outgoing)   ┌──────────────┐
//! │ Executor  │ ────────────────► │ Coordinator  │ ──► MC process
//! │           │ ◄──────────────── │ (trait obj)  │ ◄──
//! └───────────┘  try_recv()       └──────────────┘
//! ```
//!
//! [`StreamCoordinator`] is the production implementation and
//! [`DetachedCoordinator`] stands in for single mode;
//! `testing::ScriptedCoordinator` replays canned replies in tests.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`CoordinatorError::Closed`] | `COORD_CLOSED` | No |
//! | [`CoordinatorError::Io`] | `COORD_IO` | No |
//! | [`CoordinatorError::Codec`] | `COORD_CODEC` | No |
//! | [`CoordinatorError::Protocol`] | `COORD_PROTOCOL` | No |

mod stream;

pub use stream::StreamCoordinator;

use std::net::IpAddr;
use std::os::fd::BorrowedFd;
use tcx_event::{Incoming, Outgoing};
use tcx_types::ErrorCode;
use thiserror::Error;

/// Message channel to the coordinator.
pub trait Coordinator {
    /// Sends one message, blocking until it is handed to the OS.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError`] if the link is broken.
    fn send(&mut self, message: Outgoing) -> Result<(), CoordinatorError>;

    /// Returns the next complete message without blocking.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::Closed`] once the coordinator has gone away,
    /// or any read/decode failure.
    fn try_recv(&mut self) -> Result<Option<Incoming>, CoordinatorError>;

    /// Descriptor that becomes readable when [`Coordinator::try_recv`]
    /// may return a message. `None` for in-process links, which are
    /// polled on every snapshot.
    fn as_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Whether [`Coordinator::try_recv`] can return a message without
    /// reading from the descriptor. A snapshot must not sleep in
    /// `poll(2)` while this holds.
    fn has_buffered(&self) -> bool {
        false
    }

    /// Local IP address of the link, reused for TCP listeners.
    fn local_ip(&self) -> Option<IpAddr> {
        None
    }

    /// Drops the link without notifying the coordinator; used by forked
    /// children that must not share the parent's socket.
    fn close(&mut self);
}

/// Stand-in link for single mode, where there is no coordinator.
///
/// Receiving never yields anything and sending fails, so any code path
/// that tries to talk to a coordinator surfaces as an error.
#[derive(Debug, Default)]
pub struct DetachedCoordinator;

impl Coordinator for DetachedCoordinator {
    fn send(&mut self, _message: Outgoing) -> Result<(), CoordinatorError> {
        Err(CoordinatorError::Closed)
    }

    fn try_recv(&mut self) -> Result<Option<Incoming>, CoordinatorError> {
        Ok(None)
    }

    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn close(&mut self) {}
}

/// Coordinator link failure.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("connection to the coordinator is closed")]
    Closed,

    #[error("coordinator link I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("coordinator message could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("coordinator protocol violation: {0}")]
    Protocol(String),
}

impl ErrorCode for CoordinatorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Closed => "COORD_CLOSED",
            Self::Io(_) => "COORD_IO",
            Self::Codec(_) => "COORD_CODEC",
            Self::Protocol(_) => "COORD_PROTOCOL",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}
