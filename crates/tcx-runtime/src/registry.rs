//! Child processes of the host controller.
//!
//! Every forked MTC or PTC is recorded under both its pid and its
//! component reference, so that `KillProcess` can find it by reference
//! and the reaper can find it by pid.
//!
//! ```text
//!   by_pid                      by_component
//!   ┌──────┬──────────────┐     ┌──────┬─────────────┐
//!   │ 4711 │ (ref 3, ...) │ ◄── │ 3    │ [4711]      │
//!   │ 4712 │ (ref 1, ...) │ ◄── │ 1    │ [4712, 4690]│  most recent first
//!   └──────┴──────────────┘     └──────┴─────────────┘
//! ```
//!
//! Only the MTC reference may be shared by several live processes: a new
//! MTC can be created while the previous one is still being reaped.

use crate::error::ExecutorError;
use nix::unistd::Pid;
use std::collections::HashMap;
use tcx_types::ComponentRef;

/// One forked child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessEntry {
    pub component: ComponentRef,
    pub pid: Pid,
    /// `SIGKILL` has already been sent.
    pub killed: bool,
}

/// Index of the host controller's children.
#[derive(Debug, Default)]
pub struct Registry {
    by_pid: HashMap<Pid, ProcessEntry>,
    by_component: HashMap<ComponentRef, Vec<Pid>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly forked child.
    ///
    /// # Errors
    ///
    /// Internal error for a pid that is already registered, or for a
    /// PTC reference that already has a process.
    pub fn add(&mut self, component: ComponentRef, pid: Pid) -> Result<(), ExecutorError> {
        if component != ComponentRef::MTC && self.by_component.contains_key(&component) {
            return Err(ExecutorError::internal(format!(
                "Registering process: duplicated component reference ({component})."
            )));
        }
        if self.by_pid.contains_key(&pid) {
            return Err(ExecutorError::internal(format!(
                "Registering process: duplicated pid ({pid})."
            )));
        }
        self.by_pid.insert(
            pid,
            ProcessEntry {
                component,
                pid,
                killed: false,
            },
        );
        self.by_component.entry(component).or_default().insert(0, pid);
        Ok(())
    }

    #[must_use]
    pub fn get_by_pid(&self, pid: Pid) -> Option<&ProcessEntry> {
        self.by_pid.get(&pid)
    }

    /// Most recently created process of `component`.
    #[must_use]
    pub fn get_by_component(&self, component: ComponentRef) -> Option<&ProcessEntry> {
        self.by_component
            .get(&component)
            .and_then(|pids| pids.first())
            .and_then(|pid| self.by_pid.get(pid))
    }

    /// Flags the process as killed; returns whether it already was.
    pub fn mark_killed(&mut self, pid: Pid) -> Option<bool> {
        self.by_pid
            .get_mut(&pid)
            .map(|entry| std::mem::replace(&mut entry.killed, true))
    }

    /// Removes a reaped child from both indices.
    pub fn remove(&mut self, pid: Pid) -> Option<ProcessEntry> {
        let entry = self.by_pid.remove(&pid)?;
        if let Some(pids) = self.by_component.get_mut(&entry.component) {
            pids.retain(|p| *p != pid);
            if pids.is_empty() {
                self.by_component.remove(&entry.component);
            }
        }
        Some(entry)
    }

    /// Forgets every child; used in a freshly forked process.
    pub fn clear(&mut self) {
        self.by_pid.clear();
        self.by_component.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PTC: ComponentRef = ComponentRef::new(3);

    #[test]
    fn add_indexes_both_ways() {
        let mut registry = Registry::new();
        registry.add(PTC, Pid::from_raw(100)).unwrap();
        assert_eq!(registry.get_by_pid(Pid::from_raw(100)).unwrap().component, PTC);
        assert_eq!(registry.get_by_component(PTC).unwrap().pid, Pid::from_raw(100));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut registry = Registry::new();
        registry.add(PTC, Pid::from_raw(100)).unwrap();
        assert!(matches!(
            registry.add(PTC, Pid::from_raw(101)),
            Err(ExecutorError::Internal(_))
        ));
        assert!(matches!(
            registry.add(ComponentRef::new(4), Pid::from_raw(100)),
            Err(ExecutorError::Internal(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn mtc_may_be_registered_twice() {
        let mut registry = Registry::new();
        registry.add(ComponentRef::MTC, Pid::from_raw(10)).unwrap();
        registry.add(ComponentRef::MTC, Pid::from_raw(11)).unwrap();
        assert_eq!(
            registry.get_by_component(ComponentRef::MTC).unwrap().pid,
            Pid::from_raw(11)
        );
        registry.remove(Pid::from_raw(11));
        assert_eq!(
            registry.get_by_component(ComponentRef::MTC).unwrap().pid,
            Pid::from_raw(10)
        );
    }

    #[test]
    fn remove_happens_once() {
        let mut registry = Registry::new();
        registry.add(PTC, Pid::from_raw(100)).unwrap();
        assert!(registry.remove(Pid::from_raw(100)).is_some());
        assert!(registry.remove(Pid::from_raw(100)).is_none());
        assert!(registry.get_by_component(PTC).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn mark_killed_reports_previous_flag() {
        let mut registry = Registry::new();
        registry.add(PTC, Pid::from_raw(100)).unwrap();
        assert_eq!(registry.mark_killed(Pid::from_raw(100)), Some(false));
        assert_eq!(registry.mark_killed(Pid::from_raw(100)), Some(true));
        assert_eq!(registry.mark_killed(Pid::from_raw(999)), None);
    }
}
