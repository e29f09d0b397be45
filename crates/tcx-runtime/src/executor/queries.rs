//! `done`, `killed`, `running` and `alive`.
//!
//! The answers come from the status cache whenever it already knows
//! them; only an unknown status costs a coordinator round trip.
//!
//! | Target | done / killed | running / alive |
//! |--------|---------------|-----------------|
//! | PTC | cache, else `DoneReq`/`KilledReq` and `Repeat` | cache, else `IsRunning`/`IsAlive` |
//! | `any component` | entries and flags, else query and `Repeat` | flags, else query |
//! | `all component` | flags, else query and `Repeat` | flags, else query |
//!
//! A query that had to ask the coordinator returns
//! [`Readiness::Repeat`]: the alt statement takes a new snapshot and
//! evaluates the alternative again, now against the updated cache.

use super::state::Awaiting;
use super::Executor;
use crate::error::ExecutorError;
use crate::status::CheckStatus;
use tcx_event::{Outgoing, ReturnValue};
use tcx_types::{ComponentRef, Readiness};
use tracing::{debug, warn};

/// Rejects the pseudo-references no query accepts.
fn check_target(operation: &str, component: ComponentRef) -> Result<(), ExecutorError> {
    let target = match component {
        ComponentRef::NULL => "the null component reference",
        ComponentRef::MTC => "the component reference of MTC",
        ComponentRef::SYSTEM => "the component reference of system",
        _ => return Ok(()),
    };
    Err(ExecutorError::test_case(format!(
        "{operation} operation cannot be performed on {target}."
    )))
}

impl Executor {
    fn check_query_context(&self, context_error: &str) -> Result<(), ExecutorError> {
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(format!(
                "{context_error} cannot be performed in the control part."
            )));
        }
        Ok(())
    }

    fn check_single_ptc_query(&self, operation: &str) -> Result<(), ExecutorError> {
        if self.state.is_single() {
            return Err(ExecutorError::test_case(format!(
                "{operation} operation on a component reference cannot be performed in single mode."
            )));
        }
        Ok(())
    }

    fn check_mtc_only(&self, operation: &str) -> Result<(), ExecutorError> {
        if !self.state.is_mtc() {
            return Err(ExecutorError::test_case(format!(
                "Operation '{operation}' can only be performed on the MTC."
            )));
        }
        Ok(())
    }

    // === done ===

    /// `component.done`.
    ///
    /// # Errors
    ///
    /// Test case error in the control part or on a reserved reference;
    /// coordinator failures while asking.
    pub fn component_done(&mut self, component: ComponentRef) -> Result<Readiness, ExecutorError> {
        self.check_query_context("Done operation")?;
        check_target("Done", component)?;
        match component {
            ComponentRef::ANY => self.any_component_done(),
            ComponentRef::ALL => self.all_component_done(),
            ptc => self.ptc_done(ptc),
        }
    }

    fn ptc_done(&mut self, component: ComponentRef) -> Result<Readiness, ExecutorError> {
        self.check_single_ptc_query("Done")?;
        if component == self.self_ref {
            warn!("Done operation on the component reference of self will never succeed.");
            return Ok(Readiness::No);
        }
        // A killed component is done as well.
        if self.status.killed(component).is_yes() {
            debug!(%component, "PTC is done");
            return Ok(Readiness::Yes);
        }
        match self.status.done(component) {
            CheckStatus::Unchecked => {
                self.ask_done(component)?;
                Ok(Readiness::Repeat)
            }
            CheckStatus::Yes => {
                debug!(%component, "PTC is done");
                Ok(Readiness::Yes)
            }
            CheckStatus::Pending | CheckStatus::No => Ok(Readiness::Maybe),
        }
    }

    fn ask_done(&mut self, component: ComponentRef) -> Result<(), ExecutorError> {
        self.enter_awaiting(Awaiting::Done)?;
        self.send_to_mc(Outgoing::DoneReq { component })?;
        self.status.entry(component).done = CheckStatus::Pending;
        self.pending_ref = component;
        self.wait_for_state_change()
    }

    fn any_component_done(&mut self) -> Result<Readiness, ExecutorError> {
        if self.state.is_single() {
            return Ok(Readiness::No);
        }
        self.check_mtc_only("any component.done")?;
        if self.status.any_entry_done() || self.status.aggregates().any_killed.is_yes() {
            return Ok(Readiness::Yes);
        }
        match self.status.aggregates().any_done {
            CheckStatus::Unchecked => {
                self.enter_awaiting_aggregate(Awaiting::Done, "any component.done")?;
                self.send_to_mc(Outgoing::DoneReq {
                    component: ComponentRef::ANY,
                })?;
                self.status.aggregates_mut().any_done = CheckStatus::Pending;
                self.pending_ref = ComponentRef::ANY;
                self.wait_for_state_change()?;
                Ok(Readiness::Repeat)
            }
            CheckStatus::Yes => Ok(Readiness::Yes),
            CheckStatus::No => Ok(Readiness::No),
            CheckStatus::Pending => Ok(Readiness::Maybe),
        }
    }

    fn all_component_done(&mut self) -> Result<Readiness, ExecutorError> {
        if self.state.is_single() {
            return Ok(Readiness::Yes);
        }
        self.check_mtc_only("all component.done")?;
        if self.status.aggregates().all_killed.is_yes() {
            return Ok(Readiness::Yes);
        }
        match self.status.aggregates().all_done {
            CheckStatus::Unchecked => {
                self.enter_awaiting_aggregate(Awaiting::Done, "all component.done")?;
                self.send_to_mc(Outgoing::DoneReq {
                    component: ComponentRef::ALL,
                })?;
                self.status.aggregates_mut().all_done = CheckStatus::Pending;
                self.pending_ref = ComponentRef::ALL;
                self.wait_for_state_change()?;
                Ok(Readiness::Repeat)
            }
            CheckStatus::Yes => Ok(Readiness::Yes),
            CheckStatus::No | CheckStatus::Pending => Ok(Readiness::Maybe),
        }
    }

    /// `component.done -> value`: like [`Executor::component_done`],
    /// but succeeds only if the PTC returned a value of `expected_type`.
    ///
    /// The killed status is not consulted; only a done report carries
    /// the return value.
    ///
    /// # Errors
    ///
    /// Test case error in the control part, in single mode, or on a
    /// reserved or aggregate reference.
    pub fn component_done_with_value(
        &mut self,
        component: ComponentRef,
        expected_type: &str,
    ) -> Result<(Readiness, Option<ReturnValue>), ExecutorError> {
        self.check_query_context("Done operation")?;
        check_target("Done", component)?;
        if component.is_aggregate() {
            return Err(ExecutorError::test_case(format!(
                "Done operation with return value cannot be performed on '{component}'."
            )));
        }
        self.check_single_ptc_query("Done")?;
        if component == self.self_ref {
            warn!("Done operation on the component reference of self will never succeed.");
            return Ok((Readiness::No, None));
        }
        let entry = self.status.get(component);
        match entry.done {
            CheckStatus::Unchecked => {
                self.ask_done(component)?;
                Ok((Readiness::Repeat, None))
            }
            CheckStatus::Yes => match entry.return_value {
                Some(value) if value.type_name == expected_type => Ok((Readiness::Yes, Some(value))),
                Some(value) => {
                    debug!(
                        %component,
                        expected = expected_type,
                        actual = %value.type_name,
                        "Done operation with type {expected_type} on component {component} failed: \
                         the return value has a different type."
                    );
                    Ok((Readiness::No, None))
                }
                None => {
                    debug!(
                        %component,
                        expected = expected_type,
                        "Done operation with type {expected_type} on component {component} failed: \
                         no return value."
                    );
                    Ok((Readiness::No, None))
                }
            },
            CheckStatus::Pending | CheckStatus::No => Ok((Readiness::Maybe, None)),
        }
    }

    // === killed ===

    /// `component.killed`.
    ///
    /// # Errors
    ///
    /// As for [`Executor::component_done`].
    pub fn component_killed(&mut self, component: ComponentRef) -> Result<Readiness, ExecutorError> {
        self.check_query_context("Killed operation")?;
        check_target("Killed", component)?;
        match component {
            ComponentRef::ANY => self.any_component_killed(),
            ComponentRef::ALL => self.all_component_killed(),
            ptc => self.ptc_killed(ptc),
        }
    }

    fn ptc_killed(&mut self, component: ComponentRef) -> Result<Readiness, ExecutorError> {
        self.check_single_ptc_query("Killed")?;
        if component == self.self_ref {
            warn!("Killed operation on the component reference of self will never succeed.");
            return Ok(Readiness::No);
        }
        match self.status.killed(component) {
            CheckStatus::Unchecked => {
                self.enter_awaiting(Awaiting::Killed)?;
                self.send_to_mc(Outgoing::KilledReq { component })?;
                self.status.entry(component).killed = CheckStatus::Pending;
                self.pending_ref = component;
                self.wait_for_state_change()?;
                Ok(Readiness::Repeat)
            }
            CheckStatus::Yes => {
                debug!(%component, "PTC is killed");
                Ok(Readiness::Yes)
            }
            CheckStatus::Pending | CheckStatus::No => Ok(Readiness::Maybe),
        }
    }

    fn any_component_killed(&mut self) -> Result<Readiness, ExecutorError> {
        if self.state.is_single() {
            return Ok(Readiness::No);
        }
        self.check_mtc_only("any component.killed")?;
        if self.status.any_entry_killed() {
            return Ok(Readiness::Yes);
        }
        match self.status.aggregates().any_killed {
            CheckStatus::Unchecked => {
                self.enter_awaiting_aggregate(Awaiting::Killed, "any component.killed")?;
                self.send_to_mc(Outgoing::KilledReq {
                    component: ComponentRef::ANY,
                })?;
                self.status.aggregates_mut().any_killed = CheckStatus::Pending;
                self.pending_ref = ComponentRef::ANY;
                self.wait_for_state_change()?;
                Ok(Readiness::Repeat)
            }
            CheckStatus::Yes => Ok(Readiness::Yes),
            CheckStatus::No => Ok(Readiness::No),
            CheckStatus::Pending => Ok(Readiness::Maybe),
        }
    }

    fn all_component_killed(&mut self) -> Result<Readiness, ExecutorError> {
        if self.state.is_single() {
            return Ok(Readiness::Yes);
        }
        self.check_mtc_only("all component.killed")?;
        match self.status.aggregates().all_killed {
            CheckStatus::Unchecked => {
                self.enter_awaiting_aggregate(Awaiting::Killed, "all component.killed")?;
                self.send_to_mc(Outgoing::KilledReq {
                    component: ComponentRef::ALL,
                })?;
                self.status.aggregates_mut().all_killed = CheckStatus::Pending;
                self.pending_ref = ComponentRef::ALL;
                self.wait_for_state_change()?;
                Ok(Readiness::Repeat)
            }
            CheckStatus::Yes => Ok(Readiness::Yes),
            CheckStatus::No | CheckStatus::Pending => Ok(Readiness::Maybe),
        }
    }

    // === running ===

    /// `component.running`.
    ///
    /// # Errors
    ///
    /// As for [`Executor::component_done`].
    pub fn component_running(&mut self, component: ComponentRef) -> Result<bool, ExecutorError> {
        self.check_query_context("Component running operation")?;
        check_target("Running", component)?;
        match component {
            ComponentRef::ANY => self.any_component_running(),
            ComponentRef::ALL => self.all_component_running(),
            ptc => self.ptc_running(ptc),
        }
    }

    fn ptc_running(&mut self, component: ComponentRef) -> Result<bool, ExecutorError> {
        self.check_single_ptc_query("Running")?;
        if component == self.self_ref {
            warn!("Running operation on the component reference of self always returns true.");
            return Ok(true);
        }
        let cached = self.status.get(component);
        if cached.done.is_yes() || cached.killed.is_yes() {
            return Ok(false);
        }
        self.request(Awaiting::Running, Outgoing::IsRunning { component })?;
        Ok(self.running_alive_result)
    }

    fn any_component_running(&mut self) -> Result<bool, ExecutorError> {
        if self.state.is_single() {
            return Ok(false);
        }
        self.check_mtc_only("any component.running")?;
        let flags = self.status.aggregates();
        if flags.all_done.is_yes() || flags.all_killed.is_yes() {
            return Ok(false);
        }
        self.enter_awaiting_aggregate(Awaiting::Running, "any component.running")?;
        self.send_to_mc(Outgoing::IsRunning {
            component: ComponentRef::ANY,
        })?;
        self.wait_for_state_change()?;
        if !self.running_alive_result {
            self.status.aggregates_mut().all_done = CheckStatus::Yes;
        }
        Ok(self.running_alive_result)
    }

    fn all_component_running(&mut self) -> Result<bool, ExecutorError> {
        if self.state.is_single() {
            return Ok(true);
        }
        self.check_mtc_only("all component.running")?;
        // No PTC has been created yet.
        if self.status.aggregates().any_done == CheckStatus::No {
            return Ok(true);
        }
        self.enter_awaiting_aggregate(Awaiting::Running, "all component.running")?;
        self.send_to_mc(Outgoing::IsRunning {
            component: ComponentRef::ALL,
        })?;
        self.wait_for_state_change()?;
        Ok(self.running_alive_result)
    }

    // === alive ===

    /// `component.alive`.
    ///
    /// # Errors
    ///
    /// As for [`Executor::component_done`].
    pub fn component_alive(&mut self, component: ComponentRef) -> Result<bool, ExecutorError> {
        self.check_query_context("Alive operation")?;
        check_target("Alive", component)?;
        match component {
            ComponentRef::ANY => self.any_component_alive(),
            ComponentRef::ALL => self.all_component_alive(),
            ptc => self.ptc_alive(ptc),
        }
    }

    fn ptc_alive(&mut self, component: ComponentRef) -> Result<bool, ExecutorError> {
        self.check_single_ptc_query("Alive")?;
        if component == self.self_ref {
            warn!("Alive operation on the component reference of self always returns true.");
            return Ok(true);
        }
        if self.status.killed(component).is_yes() {
            return Ok(false);
        }
        self.request(Awaiting::Alive, Outgoing::IsAlive { component })?;
        Ok(self.running_alive_result)
    }

    fn any_component_alive(&mut self) -> Result<bool, ExecutorError> {
        if self.state.is_single() {
            return Ok(false);
        }
        self.check_mtc_only("any component.alive")?;
        if self.status.aggregates().all_killed.is_yes() {
            return Ok(false);
        }
        self.enter_awaiting_aggregate(Awaiting::Alive, "any component.alive")?;
        self.send_to_mc(Outgoing::IsAlive {
            component: ComponentRef::ANY,
        })?;
        self.wait_for_state_change()?;
        if !self.running_alive_result {
            self.status.aggregates_mut().all_killed = CheckStatus::Yes;
        }
        Ok(self.running_alive_result)
    }

    /// Answers locally whenever it can. The first check only proves that
    /// no PTC was ever killed, yet it answers `true` even if one is
    /// merely stopped.
    fn all_component_alive(&mut self) -> Result<bool, ExecutorError> {
        if self.state.is_single() {
            return Ok(true);
        }
        self.check_mtc_only("all component.alive")?;
        let flags = self.status.aggregates();
        if flags.any_killed == CheckStatus::No {
            return Ok(true);
        }
        if flags.all_killed.is_yes() || self.status.any_entry_killed() {
            return Ok(false);
        }
        self.enter_awaiting_aggregate(Awaiting::Alive, "all component.alive")?;
        self.send_to_mc(Outgoing::IsAlive {
            component: ComponentRef::ALL,
        })?;
        self.wait_for_state_change()?;
        Ok(self.running_alive_result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::ExecutorState;
    use super::*;
    use crate::config::TcxConfig;
    use crate::status::AggregateStatus;
    use crate::testing::ScriptedCoordinator;
    use tcx_event::Incoming;

    const PTC: ComponentRef = ComponentRef::new(3);

    fn mtc(coordinator: ScriptedCoordinator) -> Executor {
        let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
        exec.state = ExecutorState::MtcTestcase;
        *exec.status.aggregates_mut() = AggregateStatus::at_testcase_start();
        exec
    }

    #[test]
    fn reserved_targets_are_rejected() {
        let mut exec = mtc(ScriptedCoordinator::new());
        let err = exec.component_done(ComponentRef::NULL).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Done operation cannot be performed on the null component reference."
        );
        let err = exec.component_alive(ComponentRef::SYSTEM).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Alive operation cannot be performed on the component reference of system."
        );
    }

    #[test]
    fn queries_are_rejected_in_control_part() {
        let mut exec = mtc(ScriptedCoordinator::new());
        exec.state = ExecutorState::MtcControlpart;
        let err = exec.component_running(PTC).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Component running operation cannot be performed in the control part."
        );
    }

    #[test]
    fn cached_done_needs_no_request() {
        let coordinator = ScriptedCoordinator::new();
        let sent = coordinator.sent();
        let mut exec = mtc(coordinator);
        exec.status.set_done(PTC, None);

        assert_eq!(exec.component_done(PTC).unwrap(), Readiness::Yes);
        assert!(!exec.component_running(PTC).unwrap());
        assert_eq!(exec.component_done(ComponentRef::ANY).unwrap(), Readiness::Yes);
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn killed_implies_done() {
        let coordinator = ScriptedCoordinator::new();
        let sent = coordinator.sent();
        let mut exec = mtc(coordinator);
        exec.status.set_killed(PTC);
        assert_eq!(exec.component_done(PTC).unwrap(), Readiness::Yes);
        assert!(!exec.component_alive(PTC).unwrap());
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn unanswered_done_stays_maybe() {
        let coordinator = ScriptedCoordinator::new().with_responder(|msg| match msg {
            Outgoing::DoneReq { .. } => vec![Incoming::DoneAck {
                answer: false,
                return_value: None,
            }],
            _ => Vec::new(),
        });
        let sent = coordinator.sent();
        let mut exec = mtc(coordinator);

        assert_eq!(exec.component_done(PTC).unwrap(), Readiness::Repeat);
        assert_eq!(exec.component_done(PTC).unwrap(), Readiness::Maybe);
        assert_eq!(sent.lock().len(), 1);
    }

    #[test]
    fn fresh_testcase_answers_aggregates_locally() {
        let coordinator = ScriptedCoordinator::new();
        let sent = coordinator.sent();
        let mut exec = mtc(coordinator);

        assert_eq!(exec.component_done(ComponentRef::ANY).unwrap(), Readiness::No);
        assert_eq!(exec.component_done(ComponentRef::ALL).unwrap(), Readiness::Yes);
        assert_eq!(exec.component_killed(ComponentRef::ALL).unwrap(), Readiness::Yes);
        assert!(!exec.component_running(ComponentRef::ANY).unwrap());
        assert!(exec.component_running(ComponentRef::ALL).unwrap());
        assert!(!exec.component_alive(ComponentRef::ANY).unwrap());
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn aggregates_are_mtc_only() {
        let mut exec = mtc(ScriptedCoordinator::new());
        exec.state = ExecutorState::PtcFunction;
        let err = exec.component_done(ComponentRef::ANY).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Operation 'any component.done' can only be performed on the MTC."
        );
    }

    #[test]
    fn single_mode_answers() {
        let mut exec = Executor::single(TcxConfig::default());
        exec.state = ExecutorState::SingleTestcase;
        assert_eq!(exec.component_done(ComponentRef::ANY).unwrap(), Readiness::No);
        assert_eq!(exec.component_killed(ComponentRef::ALL).unwrap(), Readiness::Yes);
        assert!(exec.component_alive(ComponentRef::ALL).unwrap());
        assert!(exec.component_done(PTC).is_err());
    }

    #[test]
    fn self_queries() {
        let mut exec = mtc(ScriptedCoordinator::new());
        exec.state = ExecutorState::PtcFunction;
        exec.self_ref = PTC;
        assert_eq!(exec.component_done(PTC).unwrap(), Readiness::No);
        assert_eq!(exec.component_killed(PTC).unwrap(), Readiness::No);
        assert!(exec.component_running(PTC).unwrap());
        assert!(exec.component_alive(PTC).unwrap());
    }

    #[test]
    fn done_with_value_checks_type() {
        let mut exec = mtc(ScriptedCoordinator::new());
        exec.status.set_done(PTC, Some(ReturnValue::new("integer", vec![42])));
        let (readiness, value) = exec.component_done_with_value(PTC, "integer").unwrap();
        assert_eq!(readiness, Readiness::Yes);
        assert_eq!(value.unwrap().payload, vec![42]);

        let (readiness, value) = exec.component_done_with_value(PTC, "charstring").unwrap();
        assert_eq!(readiness, Readiness::No);
        assert!(value.is_none());

        assert!(exec
            .component_done_with_value(ComponentRef::ANY, "integer")
            .is_err());
    }

    #[test]
    fn negative_any_running_settles_all_done() {
        let coordinator = ScriptedCoordinator::new().with_responder(|msg| match msg {
            Outgoing::IsRunning { .. } => vec![Incoming::Running { answer: false }],
            _ => Vec::new(),
        });
        let mut exec = mtc(coordinator);
        exec.status.aggregates_mut().component_created();
        exec.status.aggregates_mut().all_done = CheckStatus::Unchecked;

        assert!(!exec.component_running(ComponentRef::ANY).unwrap());
        assert!(exec.status().aggregates().all_done.is_yes());
    }
}
