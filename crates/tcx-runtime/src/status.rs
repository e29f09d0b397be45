//! Component status cache.
//!
//! Remembers what the coordinator has already told this process about
//! other components, so that repeated `done`/`killed` checks inside an
//! alt statement do not each cost a round trip.
//!
//! # Per-component entry
//!
//! ```text
//!            query sent          DoneAck(true) / ComponentStatus
//! Unchecked ───────────► Pending ───────────────────────────────► Yes
//!     ▲                                                            │
//!     └─────────────────────────── CancelDone ─────────────────────┘
//! ```
//!
//! A negative answer leaves the entry `Pending` until the coordinator
//! pushes a status report; the next check then reads as "maybe".
//!
//! # Aggregate flags (MTC only)
//!
//! | Flag | Meaning of `Yes` |
//! |------|------------------|
//! | `any_done` | at least one PTC finished its behaviour |
//! | `all_done` | no PTC is running |
//! | `any_killed` | at least one PTC is gone |
//! | `all_killed` | every PTC is gone |
//!
//! The flags start as `Unchecked`, are set to their neutral values when a
//! test case begins, and are reset to `Unchecked` at its end together with
//! every entry.

use crate::error::ExecutorError;
use std::collections::HashMap;
use tcx_event::{ComponentStatusReport, ReturnValue};
use tcx_types::ComponentRef;
use tracing::debug;

/// What is known about one condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CheckStatus {
    /// Nothing known; the coordinator has to be asked.
    #[default]
    Unchecked,
    /// A query is in flight.
    Pending,
    Yes,
    No,
}

impl CheckStatus {
    #[must_use]
    pub fn is_yes(self) -> bool {
        matches!(self, Self::Yes)
    }
}

/// Cached facts about one component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentStatus {
    pub done: CheckStatus,
    pub killed: CheckStatus,
    pub return_value: Option<ReturnValue>,
}

/// The any/all flags kept by the MTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStatus {
    pub any_done: CheckStatus,
    pub all_done: CheckStatus,
    pub any_killed: CheckStatus,
    pub all_killed: CheckStatus,
}

impl AggregateStatus {
    /// Values at the start of a test case, when no PTC exists yet.
    #[must_use]
    pub fn at_testcase_start() -> Self {
        Self {
            any_done: CheckStatus::No,
            all_done: CheckStatus::Yes,
            any_killed: CheckStatus::No,
            all_killed: CheckStatus::Yes,
        }
    }

    /// Invalidates what a newly created PTC makes stale.
    ///
    /// `all_done` survives: a fresh PTC is not running yet.
    pub fn component_created(&mut self) {
        if self.any_done == CheckStatus::No {
            self.any_done = CheckStatus::Unchecked;
        }
        if self.any_killed == CheckStatus::No {
            self.any_killed = CheckStatus::Unchecked;
        }
        self.all_killed = CheckStatus::Unchecked;
    }
}

/// Per-process status cache.
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: HashMap<ComponentRef, ComponentStatus>,
    aggregates: AggregateStatus,
}

impl StatusCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `component`; an unknown component reads as all
    /// `Unchecked`.
    #[must_use]
    pub fn get(&self, component: ComponentRef) -> ComponentStatus {
        self.entries.get(&component).cloned().unwrap_or_default()
    }

    /// Entry for `component`, created on first use.
    pub fn entry(&mut self, component: ComponentRef) -> &mut ComponentStatus {
        self.entries.entry(component).or_default()
    }

    #[must_use]
    pub fn done(&self, component: ComponentRef) -> CheckStatus {
        self.entries
            .get(&component)
            .map_or(CheckStatus::Unchecked, |e| e.done)
    }

    #[must_use]
    pub fn killed(&self, component: ComponentRef) -> CheckStatus {
        self.entries
            .get(&component)
            .map_or(CheckStatus::Unchecked, |e| e.killed)
    }

    /// Records that `component` finished, with its return value if any.
    pub fn set_done(&mut self, component: ComponentRef, return_value: Option<ReturnValue>) {
        let entry = self.entry(component);
        entry.done = CheckStatus::Yes;
        entry.return_value = return_value;
    }

    /// Records that `component` is gone.
    ///
    /// The done status is left alone: it carries the return value, which
    /// only a done report can supply.
    pub fn set_killed(&mut self, component: ComponentRef) {
        self.entry(component).killed = CheckStatus::Yes;
    }

    /// Forgets that `component` finished, before it is started again.
    pub fn cancel_done(&mut self, component: ComponentRef) {
        if let Some(entry) = self.entries.get_mut(&component) {
            entry.done = CheckStatus::Unchecked;
            entry.return_value = None;
        }
    }

    /// Returns `true` if some cached entry is done or killed.
    #[must_use]
    pub fn any_entry_done(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.done.is_yes() || e.killed.is_yes())
    }

    /// Returns `true` if some cached entry is killed.
    #[must_use]
    pub fn any_entry_killed(&self) -> bool {
        self.entries.values().any(|e| e.killed.is_yes())
    }

    #[must_use]
    pub fn aggregates(&self) -> AggregateStatus {
        self.aggregates
    }

    pub fn aggregates_mut(&mut self) -> &mut AggregateStatus {
        &mut self.aggregates
    }

    /// Applies a `ComponentStatus` push from the coordinator.
    ///
    /// # Errors
    ///
    /// Internal error for a report that says nothing about the component
    /// it names, or for aggregate flags sent to a process that does not
    /// keep them.
    pub fn apply_report(
        &mut self,
        report: &ComponentStatusReport,
        keeps_aggregates: bool,
    ) -> Result<(), ExecutorError> {
        let about_component = report.done || report.killed;
        if !about_component && (report.component != ComponentRef::NULL || !report.has_aggregate()) {
            return Err(ExecutorError::internal(
                "Malformed COMPONENT_STATUS message was received.",
            ));
        }
        if report.has_aggregate() && !keeps_aggregates {
            return Err(ExecutorError::internal(
                "Message COMPONENT_STATUS carries any/all component status in a PTC.",
            ));
        }
        if report.done {
            self.set_done(report.component, report.return_value.clone());
        }
        if report.killed {
            self.set_killed(report.component);
        }
        let flags = &mut self.aggregates;
        if report.any_done {
            flags.any_done = CheckStatus::Yes;
        }
        if report.all_done {
            flags.all_done = CheckStatus::Yes;
        }
        if report.any_killed {
            flags.any_killed = CheckStatus::Yes;
        }
        if report.all_killed {
            flags.all_killed = CheckStatus::Yes;
        }
        debug!(component = %report.component, done = report.done, killed = report.killed, "component status updated");
        Ok(())
    }

    /// Drops every entry and resets the flags to `Unchecked`.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.aggregates = AggregateStatus::default();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
