//! Coordinator message handlers.
//!
//! | Receiver | Messages |
//! |----------|----------|
//! | HC | `CreateMtc`, `CreatePtc`, `KillProcess`, `ExitHc`, `Error` |
//! | MTC, PTC | replies, status pushes, connection work, `Stop`, `Error` |
//! | MTC | `ExecuteControl`, `ExecuteTestcase`, `PtcVerdict`, `Continue`, `ExitMtc` |
//! | PTC | `Start`, `Kill` |

use super::state::Awaiting;
use super::{Executor, ExecutorState, PendingWork, PtcIdentity};
use crate::error::ExecutorError;
use crate::status::CheckStatus;
use tcx_event::{Incoming, Outgoing, PtcVerdict, ReturnValue};
use tcx_types::{ComponentRef, QualifiedName};
use tracing::{debug, info, warn};

fn wire_name(message: &Incoming) -> String {
    message.kind().to_ascii_uppercase()
}

fn invalid_state(message: &Incoming) -> ExecutorError {
    ExecutorError::internal(format!(
        "Message {} arrived in invalid state.",
        wire_name(message)
    ))
}

impl Executor {
    /// Handles one coordinator message.
    ///
    /// # Errors
    ///
    /// Internal error for a malformed message or one that is not valid
    /// in the current state; `Terminated` when a `Stop` or `Kill`
    /// interrupts a running behaviour; whatever the handler returns.
    pub(crate) fn dispatch(&mut self, message: Incoming) -> Result<(), ExecutorError> {
        message
            .validate()
            .map_err(|e| ExecutorError::internal(e.to_string()))?;
        debug!(kind = message.kind(), state = %self.state, "message from MC");

        if self.state.is_hc() {
            return self.dispatch_host(message);
        }

        match message {
            Incoming::CreateAck { component } => {
                self.accept_reply(Awaiting::Create, "CREATE_ACK")?;
                self.create_result = component;
            }
            Incoming::StartAck => self.accept_reply(Awaiting::Start, "START_ACK")?,
            Incoming::StopAck => self.accept_reply(Awaiting::Stop, "STOP_ACK")?,
            Incoming::KillAck => self.accept_reply(Awaiting::Kill, "KILL_ACK")?,
            Incoming::Running { answer } => {
                self.accept_reply(Awaiting::Running, "RUNNING")?;
                self.running_alive_result = answer;
            }
            Incoming::Alive { answer } => {
                self.accept_reply(Awaiting::Alive, "ALIVE")?;
                self.running_alive_result = answer;
            }
            Incoming::DoneAck {
                answer,
                return_value,
            } => {
                self.accept_reply(Awaiting::Done, "DONE_ACK")?;
                if answer {
                    self.set_component_done(self.pending_ref, return_value)?;
                }
                self.pending_ref = ComponentRef::NULL;
            }
            Incoming::KilledAck { answer } => {
                self.accept_reply(Awaiting::Killed, "KILLED_ACK")?;
                if answer {
                    self.set_component_killed(self.pending_ref)?;
                }
                self.pending_ref = ComponentRef::NULL;
            }
            Incoming::ConnectAck => self.accept_reply(Awaiting::Connect, "CONNECT_ACK")?,
            Incoming::DisconnectAck => {
                self.accept_reply(Awaiting::Disconnect, "DISCONNECT_ACK")?;
            }
            Incoming::MapAck => self.accept_reply(Awaiting::Map, "MAP_ACK")?,
            Incoming::UnmapAck => self.accept_reply(Awaiting::Unmap, "UNMAP_ACK")?,

            Incoming::ComponentStatus(report) => {
                let keeps_aggregates = self.state.is_mtc();
                self.status.apply_report(&report, keeps_aggregates)?;
            }
            Incoming::CancelDone {
                component,
                cancel_any,
            } => {
                self.cancel_component_done(component)?;
                if cancel_any && self.state.is_mtc() {
                    self.cancel_component_done(ComponentRef::ANY)?;
                }
                self.send_to_mc(Outgoing::CancelDoneAck { component })?;
            }

            Incoming::ConnectListen {
                local_port,
                remote_component,
                remote_component_name,
                remote_port,
                transport,
            } => {
                self.names
                    .register(remote_component, remote_component_name.as_deref());
                let (ports, mut env) = self.ports_and_env();
                ports.process_connect_listen(
                    &mut env,
                    &local_port,
                    remote_component,
                    &remote_port,
                    transport,
                )?;
            }
            Incoming::Connect {
                local_port,
                remote_component,
                remote_component_name,
                remote_port,
                transport,
                address,
            } => {
                self.names
                    .register(remote_component, remote_component_name.as_deref());
                let (ports, mut env) = self.ports_and_env();
                ports.process_connect(
                    &mut env,
                    &local_port,
                    remote_component,
                    &remote_port,
                    transport,
                    address.as_ref(),
                )?;
            }
            Incoming::Disconnect {
                local_port,
                remote_component,
                remote_port,
            } => {
                let (ports, mut env) = self.ports_and_env();
                ports.process_disconnect(&mut env, &local_port, remote_component, &remote_port)?;
            }
            Incoming::Map {
                local_port,
                system_port,
            } => {
                let (ports, mut env) = self.ports_and_env();
                ports.map_port(&mut env, &local_port, &system_port)?;
            }
            Incoming::Unmap {
                local_port,
                system_port,
            } => {
                let (ports, mut env) = self.ports_and_env();
                ports.unmap_port(&mut env, &local_port, &system_port)?;
            }

            Incoming::ExecuteControl { ref module } => {
                if self.state != ExecutorState::MtcIdle {
                    return Err(invalid_state(&message));
                }
                info!(module = %module, "Executing control part of module {module}.");
                self.state = ExecutorState::MtcControlpart;
                self.pending_work = Some(PendingWork::Control(module.clone()));
            }
            Incoming::ExecuteTestcase { ref testcase } => {
                if self.state != ExecutorState::MtcIdle {
                    return Err(invalid_state(&message));
                }
                info!(testcase = %testcase, "Executing test case {testcase}.");
                self.state = ExecutorState::MtcControlpart;
                self.pending_work = Some(PendingWork::Testcase(testcase.clone()));
            }
            Incoming::Start { function, args } => self.process_start(function, args)?,
            Incoming::Stop => self.process_stop()?,
            Incoming::Kill => self.process_kill()?,
            Incoming::PtcVerdict {
                verdicts,
                continue_execution,
            } => self.process_ptc_verdict(&verdicts, continue_execution)?,
            Incoming::Continue => {
                if self.state != ExecutorState::MtcPaused {
                    return Err(invalid_state(&message));
                }
                self.state = ExecutorState::MtcControlpart;
            }
            Incoming::ExitMtc => {
                if !self.state.is_mtc() {
                    return Err(invalid_state(&message));
                }
                self.log_verdict_statistics();
                info!("Exit was requested from MC. Terminating MTC.");
                self.state = ExecutorState::MtcExit;
            }
            Incoming::KillProcess { component } => self.kill_process(component)?,
            Incoming::Error { message } => {
                return Err(ExecutorError::internal(format!(
                    "Error message was received from MC: {message}"
                )));
            }
            other @ (Incoming::CreateMtc | Incoming::CreatePtc { .. } | Incoming::ExitHc) => {
                warn!(kind = other.kind(), "Unsupported message was received from MC.");
            }
        }
        Ok(())
    }

    fn dispatch_host(&mut self, message: Incoming) -> Result<(), ExecutorError> {
        match message {
            Incoming::CreateMtc => self.create_mtc(),
            Incoming::CreatePtc {
                component,
                component_type,
                name,
                testcase,
                alive,
            } => self.create_ptc(PtcIdentity {
                component,
                component_type,
                name,
                testcase,
                alive,
            }),
            Incoming::KillProcess { component } => self.kill_process(component),
            Incoming::ExitHc => {
                info!("Exit was requested from MC. Terminating HC.");
                self.state = ExecutorState::HcExit;
                Ok(())
            }
            Incoming::Error { message } => Err(ExecutorError::internal(format!(
                "Error message was received from MC: {message}"
            ))),
            other => {
                warn!(kind = other.kind(), "Unsupported message was received from MC.");
                Ok(())
            }
        }
    }

    /// Leaves the awaiting state of `op`.
    ///
    /// A reply that overtakes the end of a test case changes nothing.
    fn accept_reply(&mut self, op: Awaiting, message: &str) -> Result<(), ExecutorError> {
        let state = self.state;
        if state == ExecutorState::MtcTerminatingTestcase {
            return Ok(());
        }
        match state.after_reply() {
            Some(next) if state.awaiting(op) == Some(state) => {
                self.state = next;
                Ok(())
            }
            _ => Err(ExecutorError::internal(format!(
                "Message {message} arrived in invalid state."
            ))),
        }
    }

    pub(crate) fn set_component_done(
        &mut self,
        component: ComponentRef,
        return_value: Option<ReturnValue>,
    ) -> Result<(), ExecutorError> {
        match component {
            ComponentRef::ANY | ComponentRef::ALL if !self.state.is_mtc() => {
                Err(ExecutorError::internal(format!(
                    "Done status of {component} can be set only on the MTC."
                )))
            }
            ComponentRef::ANY => {
                self.status.aggregates_mut().any_done = CheckStatus::Yes;
                Ok(())
            }
            ComponentRef::ALL => {
                self.status.aggregates_mut().all_done = CheckStatus::Yes;
                Ok(())
            }
            c if c.is_ptc() => {
                self.status.set_done(c, return_value);
                Ok(())
            }
            c => Err(ExecutorError::internal(format!(
                "Setting done status: invalid component reference: {}.",
                c.raw()
            ))),
        }
    }

    pub(crate) fn set_component_killed(
        &mut self,
        component: ComponentRef,
    ) -> Result<(), ExecutorError> {
        match component {
            ComponentRef::ANY | ComponentRef::ALL if !self.state.is_mtc() => {
                Err(ExecutorError::internal(format!(
                    "Killed status of {component} can be set only on the MTC."
                )))
            }
            ComponentRef::ANY => {
                self.status.aggregates_mut().any_killed = CheckStatus::Yes;
                Ok(())
            }
            ComponentRef::ALL => {
                self.status.aggregates_mut().all_killed = CheckStatus::Yes;
                Ok(())
            }
            c if c.is_ptc() => {
                self.status.set_killed(c);
                Ok(())
            }
            c => Err(ExecutorError::internal(format!(
                "Setting killed status: invalid component reference: {}.",
                c.raw()
            ))),
        }
    }

    pub(crate) fn cancel_component_done(
        &mut self,
        component: ComponentRef,
    ) -> Result<(), ExecutorError> {
        match component {
            ComponentRef::ANY if self.state.is_mtc() => {
                self.status.aggregates_mut().any_done = CheckStatus::Unchecked;
                Ok(())
            }
            c if c.is_ptc() => {
                self.status.cancel_done(c);
                Ok(())
            }
            c => Err(ExecutorError::internal(format!(
                "Cancelling done status: invalid component reference: {}.",
                c.raw()
            ))),
        }
    }

    fn process_start(&mut self, function: QualifiedName, args: Vec<u8>) -> Result<(), ExecutorError> {
        if !matches!(
            self.state,
            ExecutorState::PtcIdle | ExecutorState::PtcStopped
        ) {
            return Err(ExecutorError::internal(
                "Message START arrived in invalid state.",
            ));
        }
        if function.is_empty() {
            return Err(ExecutorError::internal(
                "Message START contains an invalid function name.",
            ));
        }
        self.pending_work = Some(PendingWork::Function { function, args });
        Ok(())
    }

    fn process_stop(&mut self) -> Result<(), ExecutorError> {
        match self.state {
            ExecutorState::MtcIdle => {
                info!("Stop was requested from MC. Ignored on idle MTC.");
            }
            ExecutorState::MtcPaused => {
                info!("Stop was requested from MC.");
                self.state = ExecutorState::MtcTerminatingExecution;
            }
            ExecutorState::PtcIdle | ExecutorState::PtcStopped => {
                info!("Stop was requested from MC. Ignored on idle PTC.");
            }
            ExecutorState::PtcExit => {}
            _ => {
                info!("Stop was requested from MC.");
                return Err(self.stop_execution());
            }
        }
        Ok(())
    }

    fn process_kill(&mut self) -> Result<(), ExecutorError> {
        if !self.state.is_ptc() {
            return Err(ExecutorError::internal(
                "Message KILL arrived in invalid state.",
            ));
        }
        match self.state {
            ExecutorState::PtcIdle | ExecutorState::PtcStopped => {
                info!("Kill was requested from MC. Terminating idle PTC.");
                self.terminate_component_type();
                let (verdict, reason) = self.verdict_and_reason();
                self.send_to_mc(Outgoing::Killed { verdict, reason })?;
                info!(%verdict, "Final verdict of PTC: {verdict}");
                self.state = ExecutorState::PtcExit;
                Ok(())
            }
            ExecutorState::PtcExit => Ok(()),
            _ => {
                info!("Kill was requested from MC.");
                Err(self.kill_execution())
            }
        }
    }

    fn process_ptc_verdict(
        &mut self,
        verdicts: &[PtcVerdict],
        continue_execution: bool,
    ) -> Result<(), ExecutorError> {
        if self.state != ExecutorState::MtcTerminatingTestcase {
            return Err(ExecutorError::internal(
                "Message PTC_VERDICT arrived in invalid state.",
            ));
        }
        if verdicts.is_empty() {
            info!(verdict = %self.verdict.local, "No PTCs were created.");
        }
        for ptc in verdicts {
            let before = self.verdict.local;
            self.verdict.fold(ptc.verdict, &ptc.reason);
            info!(
                ptc = %self.names.describe(ptc.component),
                ptc_verdict = %ptc.verdict,
                local = %before,
                new = %self.verdict.local,
                "Final verdict of PTC"
            );
        }
        self.state = if continue_execution {
            ExecutorState::MtcControlpart
        } else {
            ExecutorState::MtcPaused
        };
        Ok(())
    }
}
