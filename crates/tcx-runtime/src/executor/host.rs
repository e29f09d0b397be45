//! Host controller: forking, killing and reaping component processes.
//!
//! # Overload handling
//!
//! ```text
//!              fork() fails
//!  HcActive ──────────────────► HcOverloaded ◄────────────┐
//!     ▲                              │ retry timer due     │ dummy fork fails,
//!     │                              ▼                     │ interval doubles
//!     │  any fork succeeds   HcOverloadedTimeout ──────────┘
//!     └──────────────────────────────┘
//!          (HcReady is sent again)
//! ```
//!
//! While overloaded the HC keeps answering `CreateMtc`/`CreatePtc`; a
//! successful fork ends the overload just like a successful dummy fork.

use super::{Executor, ExecutorState, PtcIdentity};
use crate::coordinator::DetachedCoordinator;
use crate::error::ExecutorError;
use crate::port::PortSet;
use crate::process::{ExitKind, ForkOutcome};
use nix::errno::Errno;
use nix::unistd::Pid;
use std::time::Instant;
use tcx_event::Outgoing;
use tcx_types::ComponentRef;
use tracing::{debug, info, warn};

/// What a forked child becomes.
enum Spawn {
    Mtc,
    Ptc(PtcIdentity),
}

impl Spawn {
    fn component(&self) -> ComponentRef {
        match self {
            Self::Mtc => ComponentRef::MTC,
            Self::Ptc(identity) => identity.component,
        }
    }

    fn wire_name(&self) -> &'static str {
        match self {
            Self::Mtc => "CREATE_MTC",
            Self::Ptc(_) => "CREATE_PTC",
        }
    }
}

impl Executor {
    /// Handles `CreateMtc`.
    pub(crate) fn create_mtc(&mut self) -> Result<(), ExecutorError> {
        self.spawn_component(Spawn::Mtc)
    }

    /// Handles `CreatePtc`.
    pub(crate) fn create_ptc(&mut self, identity: PtcIdentity) -> Result<(), ExecutorError> {
        self.spawn_component(Spawn::Ptc(identity))
    }

    fn spawn_component(&mut self, spawn: Spawn) -> Result<(), ExecutorError> {
        if !matches!(
            self.state,
            ExecutorState::HcActive | ExecutorState::HcOverloaded
        ) {
            return self.send_to_mc(Outgoing::Error {
                message: format!("Message {} arrived in invalid state.", spawn.wire_name()),
            });
        }

        let component = spawn.component();
        match self.processes.fork() {
            Err(errno) => {
                warn!(%component, %errno, "fork() failed while creating component");
                self.send_to_mc(Outgoing::CreateNak {
                    component,
                    reason: format!("system call fork() failed ({errno})"),
                })?;
                self.failed_process_creation();
                Ok(())
            }
            Ok(ForkOutcome::Parent(pid)) => {
                let name = match &spawn {
                    Spawn::Mtc => None,
                    Spawn::Ptc(identity) => identity.name.clone(),
                };
                self.registry.add(component, pid)?;
                self.names.register(component, name.as_deref());
                match &spawn {
                    Spawn::Mtc => info!(%pid, "MTC was created. Process id: {pid}."),
                    Spawn::Ptc(identity) => info!(
                        %component,
                        %pid,
                        component_type = %identity.component_type,
                        "PTC was created. Component reference: {component}, process id: {pid}."
                    ),
                }
                self.successful_process_creation()
            }
            Ok(ForkOutcome::Child) => {
                self.become_child(spawn);
                Ok(())
            }
        }
    }

    /// Drops everything that belongs to the HC; the caller attaches the
    /// child's own coordinator link once `run` returns.
    fn become_child(&mut self, spawn: Spawn) {
        self.coordinator.close();
        self.coordinator = Box::new(DetachedCoordinator);
        self.ports = PortSet::new();
        self.registry.clear();
        self.names.clear();
        self.status.clear();
        self.pending_work = None;
        match spawn {
            Spawn::Mtc => {
                self.self_ref = ComponentRef::MTC;
                self.state = ExecutorState::MtcInitial;
                debug!("forked child becomes the MTC");
            }
            Spawn::Ptc(identity) => {
                self.adopt_ptc_identity(identity);
                self.state = ExecutorState::PtcInitial;
                debug!(component = %self.self_ref, "forked child becomes a PTC");
            }
        }
    }

    fn failed_process_creation(&mut self) {
        if self.state == ExecutorState::HcActive {
            warn!("Maximum number of processes on this host was reached. HC is overloaded.");
            self.state = ExecutorState::HcOverloaded;
        }
        if self.overload.next_check.is_none() {
            self.overload.next_check = Some(Instant::now() + self.overload.interval);
        }
    }

    fn successful_process_creation(&mut self) -> Result<(), ExecutorError> {
        if self.state.is_overloaded() {
            info!("HC is no longer overloaded.");
            self.send_to_mc(Outgoing::HcReady)?;
            self.state = ExecutorState::HcActive;
            self.overload.interval = self.config.executor.overload_retry();
            self.overload.next_check = None;
        }
        Ok(())
    }

    /// Handles `KillProcess`.
    pub(crate) fn kill_process(&mut self, component: ComponentRef) -> Result<(), ExecutorError> {
        if !self.state.is_hc() {
            return Err(ExecutorError::internal(
                "Killing a process is possible on the host controller only.",
            ));
        }
        let Some(pid) = self.registry.get_by_component(component).map(|entry| entry.pid) else {
            warn!(
                %component,
                "Component with component reference {component} does not exist. \
                 Request for killing was ignored."
            );
            return Ok(());
        };
        info!(%component, %pid, "Killing component with component reference {component}, process id: {pid}.");
        if self.registry.mark_killed(pid) == Some(true) {
            warn!(
                %pid,
                "Process with process id {pid} has been already killed. Killing it again."
            );
        }
        match self.processes.kill(pid) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                info!(%pid, "Process with process id {pid} has already terminated.");
                Ok(())
            }
            Err(errno) => Err(ExecutorError::system(
                format!("kill() system call failed on process id {pid}"),
                errno,
            )),
        }
    }

    /// Collects every terminated child.
    pub(crate) fn reap_children(&mut self) -> Result<(), ExecutorError> {
        loop {
            let exit = self
                .processes
                .reap()
                .map_err(|errno| ExecutorError::system("wait3() system call failed", errno))?;
            let Some(exit) = exit else {
                return Ok(());
            };
            let pid = exit.pid;
            let Some(entry) = self.registry.remove(pid) else {
                warn!(%pid, "wait3() system call returned unknown process id {pid}.");
                continue;
            };
            let component = entry.component;
            let who = if component == ComponentRef::MTC {
                "MTC".to_owned()
            } else {
                format!("PTC {}", self.names.describe(component))
            };
            match exit.exit {
                ExitKind::Exited(0) => info!(%pid, %component, "{who} with process id {pid} finished."),
                kind if entry.killed => {
                    info!(%pid, %component, "{who} with process id {pid} was killed ({kind}).");
                }
                kind => warn!(%pid, %component, "{who} with process id {pid} terminated abnormally ({kind})."),
            }
            debug!(%pid, usage = %exit.usage, "resource usage of children");
        }
    }

    /// Retries process creation while the HC is overloaded.
    pub(crate) fn check_overload(&mut self) -> Result<(), ExecutorError> {
        if !self.state.is_overloaded() {
            return Ok(());
        }
        if self
            .overload
            .next_check
            .is_some_and(|due| due > Instant::now())
        {
            return Ok(());
        }

        self.state = ExecutorState::HcOverloadedTimeout;
        debug!(interval = ?self.overload.interval, "checking whether the HC is still overloaded");
        match self.processes.spawn_dummy() {
            Err(errno) => {
                debug!(%errno, "HC is still overloaded");
                let doubled = self.overload.interval.saturating_mul(2);
                self.overload.interval = doubled.min(self.config.executor.overload_retry_max());
                self.overload.next_check = Some(Instant::now() + self.overload.interval);
                self.state = ExecutorState::HcOverloaded;
                Ok(())
            }
            Ok(pid) => {
                self.wait_for_dummy(pid)?;
                self.successful_process_creation()
            }
        }
    }

    fn wait_for_dummy(&mut self, pid: Pid) -> Result<(), ExecutorError> {
        let exit = self.processes.wait(pid).map_err(|errno| {
            ExecutorError::system(
                format!("waitpid() system call failed on process id {pid}"),
                errno,
            )
        })?;
        match exit {
            ExitKind::Exited(0) => {}
            ExitKind::Exited(code) => warn!(
                %pid,
                "Dummy child process with PID {pid} returned unsuccessful exit status ({code})."
            ),
            ExitKind::Signaled(signal) => warn!(
                %pid,
                "Dummy child process with PID {pid} was terminated by signal {} ({signal}).",
                signal as i32
            ),
            ExitKind::Unknown => warn!(
                %pid,
                "Dummy child process with PID {pid} was terminated by an unknown reason."
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcxConfig;
    use crate::process::{ChildExit, ResourceUsage};
    use crate::testing::{FakeProcesses, ScriptedCoordinator};
    use std::sync::Arc;
    use tcx_types::QualifiedName;

    const PTC: ComponentRef = ComponentRef::new(5);

    fn active_host() -> (
        Executor,
        FakeProcesses,
        Arc<parking_lot::Mutex<Vec<Outgoing>>>,
    ) {
        let coordinator = ScriptedCoordinator::new();
        let sent = coordinator.sent();
        let processes = FakeProcesses::new();
        let mut exec = Executor::host(
            Box::new(coordinator),
            Box::new(processes.clone()),
            TcxConfig::default(),
        );
        exec.state = ExecutorState::HcActive;
        (exec, processes, sent)
    }

    fn identity() -> PtcIdentity {
        PtcIdentity {
            component: PTC,
            component_type: QualifiedName::new("M", "PT"),
            name: Some("worker".into()),
            testcase: QualifiedName::new("M", "tc"),
            alive: false,
        }
    }

    #[test]
    fn parent_registers_child() {
        let (mut exec, processes, _) = active_host();
        processes.push_fork(Ok(ForkOutcome::Parent(Pid::from_raw(4711))));
        exec.create_ptc(identity()).unwrap();

        let entry = exec.registry().get_by_component(PTC).unwrap();
        assert_eq!(entry.pid, Pid::from_raw(4711));
        assert_eq!(exec.names().get(PTC), Some("worker"));
        assert_eq!(exec.state(), ExecutorState::HcActive);
    }

    #[test]
    fn child_takes_ptc_identity() {
        let (mut exec, processes, _) = active_host();
        processes.push_fork(Ok(ForkOutcome::Child));
        exec.create_ptc(identity()).unwrap();

        assert_eq!(exec.state(), ExecutorState::PtcInitial);
        assert_eq!(exec.self_ref(), PTC);
        assert_eq!(exec.component_name(), Some("worker"));
        assert!(exec.registry().is_empty());
    }

    #[test]
    fn failed_fork_overloads_and_recovers() {
        let (mut exec, processes, sent) = active_host();
        processes.push_fork(Err(Errno::EAGAIN));
        exec.create_mtc().unwrap();

        assert_eq!(exec.state(), ExecutorState::HcOverloaded);
        assert!(matches!(
            sent.lock().last(),
            Some(Outgoing::CreateNak { component, reason })
                if *component == ComponentRef::MTC && reason.starts_with("system call fork() failed")
        ));

        processes.push_fork(Ok(ForkOutcome::Parent(Pid::from_raw(100))));
        exec.create_mtc().unwrap();
        assert_eq!(exec.state(), ExecutorState::HcActive);
        assert_eq!(sent.lock().last(), Some(&Outgoing::HcReady));
    }

    #[test]
    fn overload_check_retries_with_dummy_child() {
        let (mut exec, processes, sent) = active_host();
        exec.state = ExecutorState::HcOverloaded;

        processes.push_dummy(Err(Errno::EAGAIN));
        exec.check_overload().unwrap();
        assert_eq!(exec.state(), ExecutorState::HcOverloaded);
        assert_eq!(exec.overload.interval, exec.config.executor.overload_retry() * 2);

        exec.overload.next_check = None;
        processes.push_dummy(Ok(Pid::from_raw(200)));
        exec.check_overload().unwrap();
        assert_eq!(exec.state(), ExecutorState::HcActive);
        assert_eq!(sent.lock().last(), Some(&Outgoing::HcReady));
        assert_eq!(processes.waited(), vec![Pid::from_raw(200)]);
    }

    #[test]
    fn create_outside_active_state_reports_error() {
        let (mut exec, _, sent) = active_host();
        exec.state = ExecutorState::HcInitial;
        exec.create_mtc().unwrap();
        assert_eq!(
            sent.lock().last(),
            Some(&Outgoing::Error {
                message: "Message CREATE_MTC arrived in invalid state.".into()
            })
        );
    }

    #[test]
    fn kill_process_handles_unknown_and_gone_processes() {
        let (mut exec, processes, _) = active_host();
        exec.kill_process(PTC).unwrap();
        assert!(processes.killed().is_empty());

        exec.registry.add(PTC, Pid::from_raw(300)).unwrap();
        processes.push_kill(Err(Errno::ESRCH));
        exec.kill_process(PTC).unwrap();
        exec.kill_process(PTC).unwrap();
        assert_eq!(processes.killed(), vec![Pid::from_raw(300); 2]);
        assert!(exec.registry().get_by_component(PTC).unwrap().killed);

        processes.push_kill(Err(Errno::EPERM));
        assert!(exec.kill_process(PTC).unwrap_err().is_fatal());
    }

    #[test]
    fn reaping_removes_children_once() {
        let (mut exec, processes, _) = active_host();
        exec.registry.add(PTC, Pid::from_raw(400)).unwrap();
        for pid in [400, 401] {
            processes.push_exit(ChildExit {
                pid: Pid::from_raw(pid),
                exit: ExitKind::Exited(0),
                usage: ResourceUsage::default(),
            });
        }
        exec.reap_children().unwrap();
        assert!(exec.registry().is_empty());
        exec.reap_children().unwrap();
    }
}
