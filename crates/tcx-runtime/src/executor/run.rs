//! Main loop of each role.
//!
//! | Role | Announces | Loops until | Work |
//! |------|-----------|-------------|------|
//! | HC | `HcReady` | `HcExit`, or a fork made this process a child | process control only |
//! | MTC | `MtcCreated` | `MtcExit` | control parts and test cases |
//! | PTC | `PtcCreated` | `PtcExit` | behaviour functions |
//!
//! Between work items every loop just takes blocking snapshots.

use super::{Executor, ExecutorState, PendingWork, Role, VerdictStatistics};
use crate::behaviours::Behaviours;
use crate::error::ExecutorError;
use tcx_event::Outgoing;
use tracing::{debug, error, info, warn};

/// How [`Executor::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The role's loop reached its exit state.
    Finished,
    /// The host controller forked and this is the child. Attach a
    /// coordinator link and call `run` again for the new role.
    Child,
}

impl Executor {
    /// Runs the main loop of this process's role.
    ///
    /// # Errors
    ///
    /// Internal error in single mode or without a role; fatal errors of
    /// the loop.
    pub fn run(&mut self, behaviours: &mut dyn Behaviours) -> Result<RunOutcome, ExecutorError> {
        match self.state.role() {
            Role::Hc => self.run_host(),
            Role::Mtc => self.run_mtc(behaviours).map(|()| RunOutcome::Finished),
            Role::Ptc => self.run_ptc(behaviours).map(|()| RunOutcome::Finished),
            Role::Single | Role::Undefined => Err(ExecutorError::internal(format!(
                "Main loop cannot be run in state {}.",
                self.state
            ))),
        }
    }

    fn run_host(&mut self) -> Result<RunOutcome, ExecutorError> {
        if self.state == ExecutorState::HcInitial {
            self.send_to_mc(Outgoing::HcReady)?;
            self.state = ExecutorState::HcActive;
            info!("Host controller is ready.");
        }
        while self.state.is_hc() && self.state != ExecutorState::HcExit {
            self.snapshot(true)?;
        }
        if self.state.is_hc() {
            info!("Host controller finished.");
            Ok(RunOutcome::Finished)
        } else {
            Ok(RunOutcome::Child)
        }
    }

    fn run_mtc(&mut self, behaviours: &mut dyn Behaviours) -> Result<(), ExecutorError> {
        if self.state == ExecutorState::MtcInitial {
            self.send_to_mc(Outgoing::MtcCreated)?;
            self.state = ExecutorState::MtcIdle;
            info!("MTC was created.");
        }
        let result = self.mtc_loop(behaviours);
        if let Err(e) = &result {
            error!(error = %e, "MTC terminates after a fatal error.");
            self.terminate_component_type();
        }
        result
    }

    fn mtc_loop(&mut self, behaviours: &mut dyn Behaviours) -> Result<(), ExecutorError> {
        while self.state != ExecutorState::MtcExit {
            match self.pending_work.take() {
                Some(work) => self.run_mtc_work(behaviours, work)?,
                None => match self.snapshot(true) {
                    Ok(()) => {}
                    Err(e) if e.is_terminated() => {
                        debug!("stop request outside of a control part");
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        info!("MTC finished.");
        Ok(())
    }

    fn run_mtc_work(
        &mut self,
        behaviours: &mut dyn Behaviours,
        work: PendingWork,
    ) -> Result<(), ExecutorError> {
        let result = match work {
            PendingWork::Control(module) => {
                self.begin_controlpart(&module);
                let result = behaviours.execute_control(self, &module);
                self.end_controlpart();
                result
            }
            PendingWork::Testcase(testcase) => {
                self.begin_controlpart(&testcase.module);
                let result = behaviours.execute_testcase(self, &testcase);
                self.end_controlpart();
                result
            }
            PendingWork::Function { function, .. } => Err(ExecutorError::internal(format!(
                "Function {function} cannot be started on the MTC."
            ))),
        };
        match result {
            Ok(()) | Err(ExecutorError::Terminated) => {}
            Err(ExecutorError::TestCase(message)) => {
                warn!("Dynamic error in the control part: {message}");
                self.set_error_verdict();
            }
            Err(fatal) => return Err(fatal),
        }
        if self.state != ExecutorState::MtcExit {
            self.state = ExecutorState::MtcIdle;
            self.send_to_mc(Outgoing::MtcReady)?;
        }
        Ok(())
    }

    fn run_ptc(&mut self, behaviours: &mut dyn Behaviours) -> Result<(), ExecutorError> {
        let result = self.ptc_loop(behaviours);
        if let Err(e) = &result {
            error!(error = %e, component = %self.self_ref, "PTC terminates after an error.");
            self.set_error_verdict();
            self.terminate_component_type();
            if self.state != ExecutorState::PtcExit {
                let (verdict, reason) = self.verdict_and_reason();
                self.send_to_mc_quietly(Outgoing::Killed { verdict, reason });
                self.state = ExecutorState::PtcExit;
            }
        }
        result
    }

    fn ptc_loop(&mut self, behaviours: &mut dyn Behaviours) -> Result<(), ExecutorError> {
        if self.state == ExecutorState::PtcInitial {
            let component_type = self.component_type.clone();
            behaviours.init_component(self, &component_type)?;
            self.send_to_mc(Outgoing::PtcCreated {
                component: self.self_ref,
            })?;
            self.state = ExecutorState::PtcIdle;
            info!(
                component = %self.self_ref,
                component_type = %component_type,
                "PTC was created. Component type: {component_type}."
            );
        }
        while self.state != ExecutorState::PtcExit {
            match self.pending_work.take() {
                Some(PendingWork::Function { function, args }) => {
                    self.run_function(behaviours, &function, &args)?;
                }
                Some(_) => {
                    return Err(ExecutorError::internal(
                        "Control part or test case cannot be executed on a PTC.",
                    ))
                }
                None => self.snapshot(true)?,
            }
        }
        info!(component = %self.self_ref, "PTC finished.");
        Ok(())
    }

    /// Runs the control part of `module` in single mode and returns the
    /// verdict statistics of the test cases it executed.
    ///
    /// # Errors
    ///
    /// Internal error outside `SingleControlpart`; fatal errors of the
    /// test code.
    pub fn execute_single(
        &mut self,
        behaviours: &mut dyn Behaviours,
        module: &str,
    ) -> Result<VerdictStatistics, ExecutorError> {
        if self.state != ExecutorState::SingleControlpart {
            return Err(ExecutorError::internal(format!(
                "Single mode execution cannot be started in state {}.",
                self.state
            )));
        }
        self.begin_controlpart(module);
        let result = behaviours.execute_control(self, module);
        self.end_controlpart();
        match result {
            Ok(()) | Err(ExecutorError::Terminated) => {}
            Err(ExecutorError::TestCase(message)) => {
                warn!("Dynamic error in the control part: {message}");
                self.set_error_verdict();
            }
            Err(fatal) => {
                self.terminate_component_type();
                return Err(fatal);
            }
        }
        Ok(self.log_verdict_statistics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcxConfig;
    use crate::executor::PtcIdentity;
    use crate::testing::{RecordingBehaviours, ScriptedCoordinator};
    use tcx_event::{Incoming, ReturnValue};
    use tcx_types::{ComponentRef, QualifiedName, Verdict};

    const PTC: ComponentRef = ComponentRef::new(3);

    fn ptc_identity(alive: bool) -> PtcIdentity {
        PtcIdentity {
            component: PTC,
            component_type: QualifiedName::new("M", "PT"),
            name: None,
            testcase: QualifiedName::new("M", "tc"),
            alive,
        }
    }

    #[test]
    fn single_mode_cannot_run_main_loop() {
        let mut exec = Executor::single(TcxConfig::default());
        let mut behaviours = RecordingBehaviours::new();
        assert!(exec.run(&mut behaviours).unwrap_err().is_fatal());
    }

    #[test]
    fn mtc_runs_control_part_and_exits() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::ExecuteControl { module: "M".into() });
        coordinator.push(Incoming::ExitMtc);
        let sent = coordinator.sent();
        let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
        let mut behaviours = RecordingBehaviours::new();

        assert_eq!(exec.run(&mut behaviours).unwrap(), RunOutcome::Finished);
        assert_eq!(behaviours.calls(), vec!["control M".to_owned()]);
        assert_eq!(
            *sent.lock(),
            vec![Outgoing::MtcCreated, Outgoing::MtcReady]
        );
        assert_eq!(exec.state(), ExecutorState::MtcExit);
    }

    #[test]
    fn control_part_error_is_counted() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::ExecuteControl { module: "M".into() });
        let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
        let mut behaviours =
            RecordingBehaviours::new().with_control_result(|| Err(ExecutorError::test_case("boom")));

        // the scripted link reports itself closed once it runs dry
        let err = exec.run(&mut behaviours).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(exec.verdict_statistics().control_errors, 1);
        assert_eq!(exec.state(), ExecutorState::MtcIdle);
    }

    #[test]
    fn non_alive_ptc_runs_one_function() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::Start {
            function: QualifiedName::new("M", "f"),
            args: vec![1, 2],
        });
        let sent = coordinator.sent();
        let mut exec = Executor::ptc(Box::new(coordinator), ptc_identity(false), TcxConfig::default());
        let mut behaviours = RecordingBehaviours::new()
            .with_function_result(|| Ok(Some(ReturnValue::new("integer", vec![7]))));

        exec.run(&mut behaviours).unwrap();
        assert_eq!(
            behaviours.calls(),
            vec!["init M.PT".to_owned(), "function M.f [1, 2]".to_owned()]
        );
        let sent = sent.lock();
        assert_eq!(sent[0], Outgoing::PtcCreated { component: PTC });
        assert_eq!(
            sent[1],
            Outgoing::StoppedKilled {
                verdict: Verdict::None,
                reason: String::new(),
                return_value: Some(ReturnValue::new("integer", vec![7])),
            }
        );
        assert_eq!(exec.state(), ExecutorState::PtcExit);
    }

    #[test]
    fn alive_ptc_waits_for_next_start_until_killed() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::Start {
            function: QualifiedName::new("M", "f"),
            args: Vec::new(),
        });
        coordinator.push(Incoming::Kill);
        let sent = coordinator.sent();
        let mut exec = Executor::ptc(Box::new(coordinator), ptc_identity(true), TcxConfig::default());
        let mut behaviours = RecordingBehaviours::new();

        exec.run(&mut behaviours).unwrap();
        let sent = sent.lock();
        assert_eq!(sent[1], Outgoing::Stopped { return_value: None });
        assert!(matches!(sent[2], Outgoing::Killed { .. }));
    }

    #[test]
    fn failing_function_gives_error_verdict() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::Start {
            function: QualifiedName::new("M", "f"),
            args: Vec::new(),
        });
        let sent = coordinator.sent();
        let mut exec = Executor::ptc(Box::new(coordinator), ptc_identity(true), TcxConfig::default());
        let mut behaviours =
            RecordingBehaviours::new().with_function_result(|| Err(ExecutorError::test_case("bad")));

        exec.run(&mut behaviours).unwrap();
        assert!(matches!(
            sent.lock().last(),
            Some(Outgoing::StoppedKilled { verdict: Verdict::Error, .. })
        ));
    }

    #[test]
    fn host_announces_itself_and_exits() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::ExitHc);
        let sent = coordinator.sent();
        let mut exec = Executor::host(
            Box::new(coordinator),
            Box::new(crate::testing::FakeProcesses::new()),
            TcxConfig::default(),
        );
        let mut behaviours = RecordingBehaviours::new();
        assert_eq!(exec.run(&mut behaviours).unwrap(), RunOutcome::Finished);
        assert_eq!(*sent.lock(), vec![Outgoing::HcReady]);
    }

    #[test]
    fn forked_child_leaves_host_loop() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::CreateMtc);
        let processes = crate::testing::FakeProcesses::new();
        processes.push_fork(Ok(crate::process::ForkOutcome::Child));
        let mut exec = Executor::host(
            Box::new(coordinator),
            Box::new(processes),
            TcxConfig::default(),
        );
        let mut behaviours = RecordingBehaviours::new();
        assert_eq!(exec.run(&mut behaviours).unwrap(), RunOutcome::Child);
        assert_eq!(exec.state(), ExecutorState::MtcInitial);
        assert_eq!(exec.self_ref(), ComponentRef::MTC);
    }

    #[test]
    fn single_mode_runs_control_part() {
        let mut exec = Executor::single(TcxConfig::default());
        let mut behaviours = RecordingBehaviours::new();
        let stats = exec.execute_single(&mut behaviours, "M").unwrap();
        assert_eq!(stats.total(), 0);
        assert_eq!(behaviours.calls(), vec!["control M".to_owned()]);
    }
}
