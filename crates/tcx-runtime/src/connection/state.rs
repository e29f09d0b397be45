//! Port connection state machine.
//!
//! ```text
//!            connect_listen          accept
//!   Idle ─────────────────► Listening ──────► Connected
//!    │                                          │  │  │
//!    └──── local / stream client ───────────────┘  │  │
//!                                                   │  │
//!          send LAST ┌──────────────────────────────┘  │ receive LAST
//!                    ▼                                 ▼
//!             LastMessageSent                LastMessageReceived
//!                    │ receive LAST                    │ transport closed
//!                    └──────────────► Idle ◄───────────┘
//! ```
//!
//! A connection that returns to `Idle` is removed from its port.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Listening,
    Connected,
    LastMessageSent,
    LastMessageReceived,
}

impl ConnectionState {
    /// Returns `true` if `next` is a legal successor of `self`.
    ///
    /// `Connected → Idle` covers transport loss without a handshake.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Idle, LastMessageReceived, LastMessageSent, Listening};
        matches!(
            (self, next),
            (Idle, Listening)
                | (Idle, Connected)
                | (Listening, Connected)
                | (Connected, LastMessageSent)
                | (Connected, LastMessageReceived)
                | (Connected, Idle)
                | (LastMessageSent, Idle)
                | (LastMessageReceived, Idle)
        )
    }

    /// Returns `true` once the termination handshake has started.
    #[must_use]
    pub fn is_terminating(self) -> bool {
        matches!(self, Self::LastMessageSent | Self::LastMessageReceived)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Connected => "connected",
            Self::LastMessageSent => "last message sent",
            Self::LastMessageReceived => "last message received",
        })
    }
}
