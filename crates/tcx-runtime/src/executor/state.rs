//! Executor states.
//!
//! One process plays exactly one role for its whole life, except for the
//! host controller, whose forked children switch to the MTC or PTC role.
//!
//! ```text
//!  HC   HcInitial ─► HcActive ◄──► HcOverloaded ─► HcOverloadedTimeout
//!                        │                                  │
//!                        └──────────────► HcExit ◄──────────┘
//!
//!  MTC  MtcInitial ─► MtcIdle ─► MtcControlpart ─► MtcTestcase ⇄ Mtc<Op>
//!                        ▲               ▲              │
//!                        │               └── MtcTerminatingTestcase / MtcPaused
//!                        └── MtcReady ◄─────────────────┘            ─► MtcExit
//!
//!  PTC  PtcInitial ─► PtcIdle ─► PtcFunction ⇄ Ptc<Op>
//!                        ▲            │
//!                        └ PtcStopped ┴─► PtcExit
//! ```
//!
//! `Mtc<Op>` and `Ptc<Op>` are the awaiting states of the blocking
//! coordinator requests (`MtcCreate`, `PtcDone`, ...). A reply handler
//! moves them back to `MtcTestcase` or `PtcFunction`.

use std::fmt;

/// The role a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Undefined,
    Single,
    Hc,
    Mtc,
    Ptc,
}

/// State of the executor of one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutorState {
    #[default]
    Undefined,

    SingleControlpart,
    SingleTestcase,

    HcInitial,
    HcIdle,
    HcConfiguring,
    HcActive,
    HcOverloaded,
    HcOverloadedTimeout,
    HcExit,

    MtcInitial,
    MtcIdle,
    MtcControlpart,
    MtcTestcase,
    MtcTerminatingTestcase,
    MtcTerminatingExecution,
    MtcPaused,
    MtcCreate,
    MtcStart,
    MtcStop,
    MtcKill,
    MtcRunning,
    MtcAlive,
    MtcDone,
    MtcKilled,
    MtcConnect,
    MtcDisconnect,
    MtcMap,
    MtcUnmap,
    MtcConfiguring,
    MtcExit,

    PtcInitial,
    PtcIdle,
    PtcFunction,
    PtcCreate,
    PtcStart,
    PtcStop,
    PtcKill,
    PtcRunning,
    PtcAlive,
    PtcDone,
    PtcKilled,
    PtcConnect,
    PtcDisconnect,
    PtcMap,
    PtcUnmap,
    PtcStopped,
    PtcExit,
}

impl ExecutorState {
    #[must_use]
    pub fn role(self) -> Role {
        match self {
            Self::Undefined => Role::Undefined,
            Self::SingleControlpart | Self::SingleTestcase => Role::Single,
            s if (Self::HcInitial..=Self::HcExit).contains(&s) => Role::Hc,
            s if (Self::MtcInitial..=Self::MtcExit).contains(&s) => Role::Mtc,
            _ => Role::Ptc,
        }
    }

    #[must_use]
    pub fn is_hc(self) -> bool {
        self.role() == Role::Hc
    }

    #[must_use]
    pub fn is_mtc(self) -> bool {
        self.role() == Role::Mtc
    }

    #[must_use]
    pub fn is_ptc(self) -> bool {
        self.role() == Role::Ptc
    }

    #[must_use]
    pub fn is_single(self) -> bool {
        self.role() == Role::Single
    }

    /// Returns `true` when the process waits for work rather than for a
    /// reply.
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            Self::HcIdle
                | Self::HcActive
                | Self::HcOverloaded
                | Self::MtcIdle
                | Self::PtcIdle
                | Self::PtcStopped
        )
    }

    /// Returns `true` where `setverdict` and `getverdict` are allowed.
    #[must_use]
    pub fn verdict_enabled(self) -> bool {
        self == Self::SingleTestcase
            || (Self::MtcTestcase..=Self::MtcExit).contains(&self)
            || self.is_ptc()
    }

    #[must_use]
    pub fn in_controlpart(self) -> bool {
        matches!(self, Self::SingleControlpart | Self::MtcControlpart)
    }

    #[must_use]
    pub fn is_overloaded(self) -> bool {
        matches!(self, Self::HcOverloaded | Self::HcOverloadedTimeout)
    }

    /// The awaiting state for `op` in this role, if the role issues
    /// coordinator requests.
    #[must_use]
    pub(crate) fn awaiting(self, op: Awaiting) -> Option<Self> {
        let (mtc, ptc) = op.states();
        match self.role() {
            Role::Mtc => Some(mtc),
            Role::Ptc => Some(ptc),
            _ => None,
        }
    }

    /// The state a reply to a request issued from this state returns to.
    #[must_use]
    pub(crate) fn after_reply(self) -> Option<Self> {
        Awaiting::ALL.iter().find_map(|op| {
            let (mtc, ptc) = op.states();
            if self == mtc {
                Some(Self::MtcTestcase)
            } else if self == ptc {
                Some(Self::PtcFunction)
            } else {
                None
            }
        })
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Blocking coordinator requests and their awaiting states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Awaiting {
    Create,
    Start,
    Stop,
    Kill,
    Running,
    Alive,
    Done,
    Killed,
    Connect,
    Disconnect,
    Map,
    Unmap,
}

impl Awaiting {
    const ALL: [Self; 12] = [
        Self::Create,
        Self::Start,
        Self::Stop,
        Self::Kill,
        Self::Running,
        Self::Alive,
        Self::Done,
        Self::Killed,
        Self::Connect,
        Self::Disconnect,
        Self::Map,
        Self::Unmap,
    ];

    fn states(self) -> (ExecutorState, ExecutorState) {
        use ExecutorState as S;
        match self {
            Self::Create => (S::MtcCreate, S::PtcCreate),
            Self::Start => (S::MtcStart, S::PtcStart),
            Self::Stop => (S::MtcStop, S::PtcStop),
            Self::Kill => (S::MtcKill, S::PtcKill),
            Self::Running => (S::MtcRunning, S::PtcRunning),
            Self::Alive => (S::MtcAlive, S::PtcAlive),
            Self::Done => (S::MtcDone, S::PtcDone),
            Self::Killed => (S::MtcKilled, S::PtcKilled),
            Self::Connect => (S::MtcConnect, S::PtcConnect),
            Self::Disconnect => (S::MtcDisconnect, S::PtcDisconnect),
            Self::Map => (S::MtcMap, S::PtcMap),
            Self::Unmap => (S::MtcUnmap, S::PtcUnmap),
        }
    }

    /// Operation name used in invalid-state errors.
    pub(crate) fn describe(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "component start",
            Self::Stop => "component stop",
            Self::Kill => "kill",
            Self::Running => "component running",
            Self::Alive => "component alive",
            Self::Done => "done",
            Self::Killed => "killed",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Map => "map",
            Self::Unmap => "unmap",
        }
    }
}
