//! Component lifecycle: create, start, stop, kill, and the PTC side of
//! running a behaviour function.

use super::state::Awaiting;
use super::{Executor, ExecutorState};
use crate::behaviours::Behaviours;
use crate::error::ExecutorError;
use crate::status::CheckStatus;
use tcx_event::{Outgoing, ReturnValue};
use tcx_types::{ComponentRef, QualifiedName};
use tracing::{debug, info, warn};

/// Drops an empty name or location with a warning.
fn non_empty<'a>(value: Option<&'a str>, what: &str) -> Option<&'a str> {
    match value {
        Some("") => {
            warn!("Empty charstring value was ignored as component {what} in create operation.");
            None
        }
        other => other,
    }
}

impl Executor {
    /// Creates a PTC of `component_type` and returns its reference.
    ///
    /// # Errors
    ///
    /// Test case error in the control part or in single mode; internal
    /// error outside a test case or behaviour function; coordinator
    /// failures.
    pub fn create_component(
        &mut self,
        component_type: &QualifiedName,
        name: Option<&str>,
        location: Option<&str>,
        alive: bool,
    ) -> Result<ComponentRef, ExecutorError> {
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(
                "Create operation cannot be performed in the control part.",
            ));
        }
        if self.state.is_single() {
            return Err(ExecutorError::test_case(
                "Create operation cannot be performed in single mode.",
            ));
        }
        let name = non_empty(name, "name");
        let location = non_empty(location, "location");
        info!(
            component_type = %component_type,
            name,
            location,
            alive,
            "Creating new {}PTC.",
            if alive { "alive " } else { "" }
        );

        if self.state.is_mtc() {
            // The new PTC may terminate by itself from now on.
            self.status.aggregates_mut().component_created();
        }
        self.request(
            Awaiting::Create,
            Outgoing::CreateReq {
                component_type: component_type.clone(),
                name: name.map(str::to_owned),
                location: location.map(str::to_owned),
                alive,
            },
        )?;

        let created = self.create_result;
        self.names.register(created, name);
        info!(component = %self.names.describe(created), "PTC was created.");
        Ok(created)
    }

    /// Starts `function` on the PTC `component`.
    ///
    /// `args` is the encoded argument list; the engine forwards it
    /// untouched.
    ///
    /// # Errors
    ///
    /// Test case error in the control part, in single mode, on a
    /// reserved or own reference, or on a PTC known to be killed.
    pub fn start_component(
        &mut self,
        component: ComponentRef,
        function: &QualifiedName,
        args: Vec<u8>,
    ) -> Result<(), ExecutorError> {
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(
                "Start test component operation cannot be performed in the control part.",
            ));
        }
        if self.state.is_single() {
            return Err(ExecutorError::test_case(
                "Start test component operation cannot be performed in single mode.",
            ));
        }
        match component {
            ComponentRef::NULL => {
                return Err(ExecutorError::test_case(
                    "Start operation cannot be performed on the null component reference.",
                ))
            }
            ComponentRef::MTC => {
                return Err(ExecutorError::test_case(
                    "Start operation cannot be performed on the component reference of MTC.",
                ))
            }
            ComponentRef::SYSTEM => {
                return Err(ExecutorError::test_case(
                    "Start operation cannot be performed on the component reference of system.",
                ))
            }
            ComponentRef::ANY | ComponentRef::ALL => {
                return Err(ExecutorError::internal(format!(
                    "'{component}' cannot be started."
                )))
            }
            ComponentRef::UNBOUND => {
                return Err(ExecutorError::test_case(
                    "Performing a start operation on an unbound component reference.",
                ))
            }
            _ => {}
        }
        if component == self.self_ref {
            return Err(ExecutorError::test_case(
                "Start operation cannot be performed on the own component reference of the \
                 initiating component (i.e. 'self.start' is not allowed).",
            ));
        }
        if self.status.killed(component).is_yes() {
            return Err(ExecutorError::test_case(format!(
                "PTC with component reference {component} is not alive anymore. \
                 Start operation cannot be performed on it."
            )));
        }
        self.status.cancel_done(component);

        if self.state.is_mtc() {
            // 'all component.done' has to be re-evaluated.
            self.status.aggregates_mut().all_done = CheckStatus::Unchecked;
        }
        self.request(
            Awaiting::Start,
            Outgoing::StartReq {
                component,
                function: function.clone(),
                args,
            },
        )?;
        info!(
            component = %self.names.describe(component),
            function = %function,
            "Function was started on PTC."
        );
        Ok(())
    }

    /// Stops `component`.
    ///
    /// Stopping `self` or the MTC unwinds the caller with
    /// [`ExecutorError::Terminated`].
    ///
    /// # Errors
    ///
    /// Test case error in the control part or on an invalid reference;
    /// `Terminated` as above.
    pub fn stop_component(&mut self, component: ComponentRef) -> Result<(), ExecutorError> {
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(
                "Component stop operation cannot be performed in the control part.",
            ));
        }
        if component == self.self_ref {
            return Err(self.stop_execution());
        }
        match component {
            ComponentRef::NULL => Err(ExecutorError::test_case(
                "Stop operation cannot be performed on the null component reference.",
            )),
            ComponentRef::MTC => self.stop_mtc(),
            ComponentRef::SYSTEM => Err(ExecutorError::test_case(
                "Stop operation cannot be performed on the component reference of system.",
            )),
            ComponentRef::ANY => Err(ExecutorError::internal(
                "'any component' cannot be stopped.",
            )),
            ComponentRef::ALL => self.stop_all_components(),
            ptc => self.stop_ptc(ptc),
        }
    }

    fn stop_mtc(&mut self) -> Result<(), ExecutorError> {
        info!("Stopping MTC. The current test case will be terminated.");
        self.send_to_mc(Outgoing::StopReq {
            component: ComponentRef::MTC,
        })?;
        Err(self.stop_execution())
    }

    fn stop_ptc(&mut self, component: ComponentRef) -> Result<(), ExecutorError> {
        if self.state.is_single() {
            return Err(ExecutorError::test_case(
                "Stop operation on a component reference cannot be performed in single mode.",
            ));
        }
        let cached = self.status.get(component);
        if cached.done.is_yes() || cached.killed.is_yes() {
            info!("PTC with component reference {component} is not running. Stop operation had no effect.");
            return Ok(());
        }
        info!("Stopping PTC with component reference {component}.");
        self.request(Awaiting::Stop, Outgoing::StopReq { component })?;
        info!(component = %self.names.describe(component), "PTC was stopped.");
        Ok(())
    }

    fn stop_all_components(&mut self) -> Result<(), ExecutorError> {
        let flags = self.status.aggregates();
        if self.state.is_single() {
            info!("No PTCs are running. Operation 'all component.stop' had no effect.");
            return Ok(());
        }
        if !self.state.is_mtc() {
            return Err(ExecutorError::test_case(
                "Operation 'all component.stop' can only be performed on the MTC.",
            ));
        }
        if flags.all_done.is_yes() || flags.all_killed.is_yes() {
            info!("No PTCs are running. Operation 'all component.stop' had no effect.");
            return Ok(());
        }
        if self.state != ExecutorState::MtcTestcase {
            return Err(ExecutorError::internal(
                "Executing 'all component.stop' in invalid state.",
            ));
        }
        info!("Stopping all components.");
        self.request(
            Awaiting::Stop,
            Outgoing::StopReq {
                component: ComponentRef::ALL,
            },
        )?;
        self.status.aggregates_mut().all_done = CheckStatus::Yes;
        info!("All PTCs were stopped.");
        Ok(())
    }

    /// Kills `component`.
    ///
    /// Killing `self` unwinds the caller with
    /// [`ExecutorError::Terminated`]; killing the MTC means stopping it.
    ///
    /// # Errors
    ///
    /// Test case error in the control part or on an invalid reference;
    /// `Terminated` as above.
    pub fn kill_component(&mut self, component: ComponentRef) -> Result<(), ExecutorError> {
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(
                "Kill operation cannot be performed in the control part.",
            ));
        }
        if component == self.self_ref {
            return Err(self.kill_execution());
        }
        match component {
            ComponentRef::NULL => Err(ExecutorError::test_case(
                "Kill operation cannot be performed on the null component reference.",
            )),
            ComponentRef::MTC => self.stop_mtc(),
            ComponentRef::SYSTEM => Err(ExecutorError::test_case(
                "Kill operation cannot be performed on the component reference of system.",
            )),
            ComponentRef::ANY => Err(ExecutorError::internal(
                "'any component' cannot be killed.",
            )),
            ComponentRef::ALL => self.kill_all_components(),
            ptc => self.kill_ptc(ptc),
        }
    }

    fn kill_ptc(&mut self, component: ComponentRef) -> Result<(), ExecutorError> {
        if self.state.is_single() {
            return Err(ExecutorError::test_case(
                "Kill operation on a component reference cannot be performed in single mode.",
            ));
        }
        if self.status.killed(component).is_yes() {
            info!("PTC with component reference {component} is not alive anymore. Kill operation had no effect.");
            return Ok(());
        }
        info!("Killing PTC with component reference {component}.");
        self.request(Awaiting::Kill, Outgoing::KillReq { component })?;
        self.status.set_killed(component);
        info!(component = %self.names.describe(component), "PTC was killed.");
        Ok(())
    }

    fn kill_all_components(&mut self) -> Result<(), ExecutorError> {
        if self.state.is_single() {
            info!("There are no alive PTCs. Operation 'all component.kill' had no effect.");
            return Ok(());
        }
        if !self.state.is_mtc() {
            return Err(ExecutorError::test_case(
                "Operation 'all component.kill' can only be performed on the MTC.",
            ));
        }
        if self.status.aggregates().all_killed.is_yes() {
            info!("There are no alive PTCs. Operation 'all component.kill' had no effect.");
            return Ok(());
        }
        if self.state != ExecutorState::MtcTestcase {
            return Err(ExecutorError::internal(
                "Executing 'all component.kill' in invalid state.",
            ));
        }
        info!("Killing all components.");
        self.request(
            Awaiting::Kill,
            Outgoing::KillReq {
                component: ComponentRef::ALL,
            },
        )?;
        let flags = self.status.aggregates_mut();
        flags.all_done = CheckStatus::Yes;
        flags.all_killed = CheckStatus::Yes;
        info!("All PTCs were killed.");
        Ok(())
    }

    /// Ends the running behaviour; the caller returns the error.
    ///
    /// A PTC moves to `PtcStopped` if it is alive and to `PtcExit`
    /// otherwise.
    pub(crate) fn stop_execution(&mut self) -> ExecutorError {
        if self.state.in_controlpart() {
            info!("Stopping control part execution.");
        } else {
            info!("Stopping test component execution.");
            if self.state.is_ptc() {
                self.state = if self.alive {
                    ExecutorState::PtcStopped
                } else {
                    ExecutorState::PtcExit
                };
            }
        }
        ExecutorError::Terminated
    }

    /// Ends the running behaviour for good; the caller returns the
    /// error.
    pub(crate) fn kill_execution(&mut self) -> ExecutorError {
        info!("Terminating test component execution.");
        if self.state.is_ptc() {
            self.state = ExecutorState::PtcExit;
        }
        ExecutorError::Terminated
    }

    /// Runs a behaviour function requested by `Start` and reports how
    /// it ended.
    pub(crate) fn run_function(
        &mut self,
        behaviours: &mut dyn Behaviours,
        function: &QualifiedName,
        args: &[u8],
    ) -> Result<(), ExecutorError> {
        self.state = ExecutorState::PtcFunction;
        info!(function = %function, "Function {function} was started.");

        match behaviours.start_function(self, function, args) {
            Ok(return_value) => self.function_finished(function, return_value),
            Err(ExecutorError::Terminated) => match self.state {
                ExecutorState::PtcStopped => {
                    info!("Function {function} was stopped. PTC remains alive and is waiting for next start.");
                    self.send_to_mc(Outgoing::Stopped { return_value: None })
                }
                ExecutorState::PtcExit => {
                    info!("Function {function} was stopped. PTC terminates.");
                    self.finish_ptc(None)
                }
                _ => Err(ExecutorError::internal(
                    "PTC was stopped in invalid state.",
                )),
            },
            Err(e) => {
                warn!(error = %e, "Function {function} finished with an error. PTC terminates.");
                self.set_error_verdict();
                self.state = ExecutorState::PtcExit;
                self.finish_ptc(None)
            }
        }
    }

    fn function_finished(
        &mut self,
        function: &QualifiedName,
        return_value: Option<ReturnValue>,
    ) -> Result<(), ExecutorError> {
        if self.state != ExecutorState::PtcFunction {
            return Err(ExecutorError::internal(
                "PTC behaviour function finished in invalid state.",
            ));
        }
        info!(function = %function, alive = self.alive, "Function {function} finished.");
        if self.alive {
            self.send_to_mc(Outgoing::Stopped { return_value })?;
            self.state = ExecutorState::PtcStopped;
            Ok(())
        } else {
            self.state = ExecutorState::PtcExit;
            self.finish_ptc(return_value)
        }
    }

    /// Tears down a terminating PTC and sends its final verdict.
    fn finish_ptc(&mut self, return_value: Option<ReturnValue>) -> Result<(), ExecutorError> {
        self.terminate_component_type();
        let (verdict, reason) = self.verdict_and_reason();
        self.send_to_mc(Outgoing::StoppedKilled {
            verdict,
            reason,
            return_value,
        })?;
        info!(%verdict, "Final verdict of PTC: {verdict}");
        debug!(state = %self.state, "PTC finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcxConfig;
    use crate::testing::ScriptedCoordinator;
    use tcx_event::Incoming;

    const PTC: ComponentRef = ComponentRef::new(3);

    fn mtc_in_testcase(coordinator: ScriptedCoordinator) -> Executor {
        let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
        exec.state = ExecutorState::MtcTestcase;
        *exec.status.aggregates_mut() = crate::status::AggregateStatus::at_testcase_start();
        exec
    }

    #[test]
    fn create_waits_for_ack_and_invalidates_flags() {
        let coordinator = ScriptedCoordinator::new().with_responder(|msg| match msg {
            Outgoing::CreateReq { .. } => vec![Incoming::CreateAck { component: PTC }],
            _ => Vec::new(),
        });
        let sent = coordinator.sent();
        let mut exec = mtc_in_testcase(coordinator);

        let created = exec
            .create_component(&QualifiedName::new("M", "CT"), Some("peer"), Some(""), false)
            .unwrap();

        assert_eq!(created, PTC);
        assert_eq!(exec.state(), ExecutorState::MtcTestcase);
        assert_eq!(exec.names().get(PTC), Some("peer"));
        let flags = exec.status().aggregates();
        assert_eq!(flags.any_done, CheckStatus::Unchecked);
        assert_eq!(flags.all_killed, CheckStatus::Unchecked);
        assert_eq!(flags.all_done, CheckStatus::Yes);
        assert!(matches!(
            &sent.lock()[0],
            Outgoing::CreateReq { location: None, .. }
        ));
    }

    #[test]
    fn create_in_single_mode_is_rejected() {
        let mut exec = Executor::single(TcxConfig::default());
        exec.state = ExecutorState::SingleTestcase;
        let err = exec
            .create_component(&QualifiedName::new("M", "CT"), None, None, false)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Create operation cannot be performed in single mode."
        );
    }

    #[test]
    fn start_rejects_reserved_and_killed_references() {
        let mut exec = mtc_in_testcase(ScriptedCoordinator::new());
        let f = QualifiedName::new("M", "f");
        assert!(exec.start_component(ComponentRef::NULL, &f, vec![]).is_err());
        assert!(exec.start_component(ComponentRef::MTC, &f, vec![]).is_err());
        assert!(matches!(
            exec.start_component(ComponentRef::ALL, &f, vec![]),
            Err(ExecutorError::Internal(_))
        ));
        exec.status.set_killed(PTC);
        let err = exec.start_component(PTC, &f, vec![]).unwrap_err();
        assert!(err.to_string().contains("is not alive anymore"));
    }

    #[test]
    fn start_cancels_done_status() {
        let coordinator = ScriptedCoordinator::new().with_responder(|msg| match msg {
            Outgoing::StartReq { .. } => vec![Incoming::StartAck],
            _ => Vec::new(),
        });
        let mut exec = mtc_in_testcase(coordinator);
        exec.status.set_done(PTC, Some(ReturnValue::new("int", vec![1])));
        exec.start_component(PTC, &QualifiedName::new("M", "f"), vec![9])
            .unwrap();
        assert_eq!(exec.status().done(PTC), CheckStatus::Unchecked);
        assert_eq!(exec.status().aggregates().all_done, CheckStatus::Unchecked);
    }

    #[test]
    fn stop_of_finished_ptc_sends_nothing() {
        let coordinator = ScriptedCoordinator::new();
        let sent = coordinator.sent();
        let mut exec = mtc_in_testcase(coordinator);
        exec.status.set_done(PTC, None);
        exec.stop_component(PTC).unwrap();
        exec.stop_component(PTC).unwrap();
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn stop_all_is_idempotent() {
        let coordinator = ScriptedCoordinator::new().with_responder(|msg| match msg {
            Outgoing::StopReq { .. } => vec![Incoming::StopAck],
            _ => Vec::new(),
        });
        let sent = coordinator.sent();
        let mut exec = mtc_in_testcase(coordinator);
        exec.status.aggregates_mut().all_done = CheckStatus::Unchecked;
        exec.status.aggregates_mut().all_killed = CheckStatus::Unchecked;

        exec.stop_component(ComponentRef::ALL).unwrap();
        exec.stop_component(ComponentRef::ALL).unwrap();

        assert_eq!(sent.lock().len(), 1);
        assert!(exec.status().aggregates().all_done.is_yes());
    }

    #[test]
    fn kill_ptc_records_killed() {
        let coordinator = ScriptedCoordinator::new().with_responder(|msg| match msg {
            Outgoing::KillReq { .. } => vec![Incoming::KillAck],
            _ => Vec::new(),
        });
        let sent = coordinator.sent();
        let mut exec = mtc_in_testcase(coordinator);
        exec.kill_component(PTC).unwrap();
        exec.kill_component(PTC).unwrap();
        assert!(exec.status().killed(PTC).is_yes());
        assert_eq!(sent.lock().len(), 1);
    }

    #[test]
    fn stop_self_on_alive_ptc_keeps_it() {
        let mut exec = Executor::mtc(Box::new(ScriptedCoordinator::new()), TcxConfig::default());
        exec.state = ExecutorState::PtcFunction;
        exec.self_ref = PTC;
        exec.alive = true;
        assert!(exec.stop_component(PTC).unwrap_err().is_terminated());
        assert_eq!(exec.state(), ExecutorState::PtcStopped);

        exec.state = ExecutorState::PtcFunction;
        assert!(exec.kill_component(PTC).unwrap_err().is_terminated());
        assert_eq!(exec.state(), ExecutorState::PtcExit);
    }

    #[test]
    fn stop_mtc_sends_request_and_terminates() {
        let coordinator = ScriptedCoordinator::new();
        let sent = coordinator.sent();
        let mut exec = mtc_in_testcase(coordinator);
        exec.self_ref = PTC;
        exec.state = ExecutorState::PtcFunction;
        assert!(exec
            .kill_component(ComponentRef::MTC)
            .unwrap_err()
            .is_terminated());
        assert_eq!(
            sent.lock()[0],
            Outgoing::StopReq {
                component: ComponentRef::MTC
            }
        );
    }
}
