//! The per-process executor.
//!
//! [`Executor`] owns everything a test process knows: its role and
//! [`ExecutorState`], its ports, the component status cache, the name
//! table, the child registry (host controller only) and the link to the
//! coordinator. Every operation takes `&mut self`; the process is
//! single-threaded.
//!
//! # Blocking requests
//!
//! Component operations that need an answer from the coordinator all
//! follow one pattern:
//!
//! ```text
//!  MtcTestcase ──(1) set awaiting state──► MtcDone
//!                (2) send DoneReq              │
//!                (3) snapshot() ... snapshot() │ DoneAck arrives,
//!                                              │ reply handler runs
//!  MtcTestcase ◄─────────────────────────────  ┘
//!                (4) read the cached answer
//! ```
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | `state` | [`ExecutorState`], [`Role`] |
//! | `snapshot` | one iteration of the event loop |
//! | `dispatch` | coordinator message handlers |
//! | `lifecycle` | create, start, stop, kill; PTC function runner |
//! | `queries` | done, killed, running, alive |
//! | `connect` | connect, disconnect, map, unmap, send |
//! | `host` | process creation, killing and reaping on the HC |
//! | `testcase` | control part, test case and verdict handling |
//! | `run` | the main loop of each role |

mod connect;
mod dispatch;
mod host;
mod lifecycle;
mod queries;
mod run;
mod snapshot;
mod state;
mod testcase;

pub use run::RunOutcome;
pub use state::{ExecutorState, Role};
pub use testcase::VerdictStatistics;

use crate::config::TcxConfig;
use crate::coordinator::{Coordinator, DetachedCoordinator};
use crate::error::ExecutorError;
use crate::names::ComponentNames;
use crate::port::{Port, PortEnv, PortSet};
use crate::process::{ProcessControl, SystemProcesses};
use crate::registry::Registry;
use crate::status::StatusCache;
use state::Awaiting;
use std::time::{Duration, Instant};
use tcx_event::Outgoing;
use tcx_types::{ComponentRef, QualifiedName};
use testcase::VerdictState;
use tracing::debug;

/// Identity handed to a freshly created PTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtcIdentity {
    pub component: ComponentRef,
    pub component_type: QualifiedName,
    pub name: Option<String>,
    pub testcase: QualifiedName,
    pub alive: bool,
}

/// Work the main loop runs once the message that requested it has been
/// handled.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingWork {
    Control(String),
    Testcase(QualifiedName),
    Function { function: QualifiedName, args: Vec<u8> },
}

/// Retry schedule of the host controller's overload check.
#[derive(Debug)]
struct OverloadTimer {
    interval: Duration,
    next_check: Option<Instant>,
}

/// State and collaborators of one test process.
pub struct Executor {
    state: ExecutorState,
    self_ref: ComponentRef,
    component_type: QualifiedName,
    component_name: Option<String>,
    alive: bool,
    testcase: QualifiedName,
    control_module: Option<String>,
    verdict: VerdictState,

    /// Target of the outstanding create/done/killed request.
    pending_ref: ComponentRef,
    create_result: ComponentRef,
    running_alive_result: bool,

    status: StatusCache,
    names: ComponentNames,
    registry: Registry,
    ports: PortSet,

    coordinator: Box<dyn Coordinator>,
    processes: Box<dyn ProcessControl>,
    config: TcxConfig,
    overload: OverloadTimer,
    pending_work: Option<PendingWork>,
}

impl Executor {
    fn with_parts(
        state: ExecutorState,
        self_ref: ComponentRef,
        coordinator: Box<dyn Coordinator>,
        processes: Box<dyn ProcessControl>,
        config: TcxConfig,
    ) -> Self {
        let overload = OverloadTimer {
            interval: config.executor.overload_retry(),
            next_check: None,
        };
        Self {
            state,
            self_ref,
            component_type: QualifiedName::default(),
            component_name: None,
            alive: false,
            testcase: QualifiedName::default(),
            control_module: None,
            verdict: VerdictState::default(),
            pending_ref: ComponentRef::NULL,
            create_result: ComponentRef::NULL,
            running_alive_result: false,
            status: StatusCache::new(),
            names: ComponentNames::new(),
            registry: Registry::new(),
            ports: PortSet::new(),
            coordinator,
            processes,
            config,
            overload,
            pending_work: None,
        }
    }

    /// A host controller that has not yet announced itself.
    #[must_use]
    pub fn host(
        coordinator: Box<dyn Coordinator>,
        processes: Box<dyn ProcessControl>,
        config: TcxConfig,
    ) -> Self {
        Self::with_parts(
            ExecutorState::HcInitial,
            ComponentRef::NULL,
            coordinator,
            processes,
            config,
        )
    }

    /// A single-mode process: MTC and control part in one, no
    /// coordinator.
    #[must_use]
    pub fn single(config: TcxConfig) -> Self {
        Self::with_parts(
            ExecutorState::SingleControlpart,
            ComponentRef::MTC,
            Box::new(DetachedCoordinator),
            Box::new(SystemProcesses::new()),
            config,
        )
    }

    /// A main test component connected to the coordinator.
    #[must_use]
    pub fn mtc(coordinator: Box<dyn Coordinator>, config: TcxConfig) -> Self {
        Self::with_parts(
            ExecutorState::MtcInitial,
            ComponentRef::MTC,
            coordinator,
            Box::new(SystemProcesses::new()),
            config,
        )
    }

    /// A parallel test component connected to the coordinator.
    #[must_use]
    pub fn ptc(coordinator: Box<dyn Coordinator>, identity: PtcIdentity, config: TcxConfig) -> Self {
        let mut executor = Self::with_parts(
            ExecutorState::PtcInitial,
            identity.component,
            coordinator,
            Box::new(SystemProcesses::new()),
            config,
        );
        executor.adopt_ptc_identity(identity);
        executor
    }

    fn adopt_ptc_identity(&mut self, identity: PtcIdentity) {
        self.self_ref = identity.component;
        self.names
            .register(identity.component, identity.name.as_deref());
        self.component_type = identity.component_type;
        self.component_name = identity.name;
        self.testcase = identity.testcase;
        self.alive = identity.alive;
    }

    /// Gives a freshly forked child its own coordinator link.
    pub fn attach(&mut self, coordinator: Box<dyn Coordinator>) {
        self.coordinator.close();
        self.coordinator = coordinator;
    }

    // === Accessors ===

    #[must_use]
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    #[must_use]
    pub fn self_ref(&self) -> ComponentRef {
        self.self_ref
    }

    #[must_use]
    pub fn component_type(&self) -> &QualifiedName {
        &self.component_type
    }

    #[must_use]
    pub fn component_name(&self) -> Option<&str> {
        self.component_name.as_deref()
    }

    /// Returns `true` for an alive-type PTC.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Name of the running test case (MTC) or of the test case the PTC
    /// was created in.
    #[must_use]
    pub fn testcase_name(&self) -> &QualifiedName {
        &self.testcase
    }

    #[must_use]
    pub fn control_module(&self) -> Option<&str> {
        self.control_module.as_deref()
    }

    #[must_use]
    pub fn status(&self) -> &StatusCache {
        &self.status
    }

    #[must_use]
    pub fn names(&self) -> &ComponentNames {
        &self.names
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    /// Direct port access for receive and port-state operations.
    pub fn ports_mut(&mut self) -> &mut PortSet {
        &mut self.ports
    }

    #[must_use]
    pub fn config(&self) -> &TcxConfig {
        &self.config
    }

    /// Adds a port to this component and starts it.
    ///
    /// # Errors
    ///
    /// Internal error for a duplicate port name.
    pub fn add_port(&mut self, port: Port) -> Result<(), ExecutorError> {
        let name = port.name().to_owned();
        self.ports.add(port)?;
        self.ports.require(&name)?.start()
    }

    // === Internals shared by the submodules ===

    /// Splits the port set from what port operations need.
    pub(crate) fn ports_and_env(&mut self) -> (&mut PortSet, PortEnv<'_>) {
        let env = PortEnv {
            coordinator: self.coordinator.as_mut(),
            self_ref: self.self_ref,
            parallel: !self.state.is_single(),
            config: &self.config.connection,
        };
        (&mut self.ports, env)
    }

    /// Deactivates every port; used whenever a component type ends.
    pub(crate) fn terminate_component_type(&mut self) {
        let (ports, mut env) = self.ports_and_env();
        ports.deactivate_all(&mut env);
    }

    pub(crate) fn send_to_mc(&mut self, message: Outgoing) -> Result<(), ExecutorError> {
        debug!(kind = message.kind(), state = %self.state, "sending to MC");
        self.coordinator.send(message)?;
        Ok(())
    }

    /// Notification sent on a path that is already failing.
    pub(crate) fn send_to_mc_quietly(&mut self, message: Outgoing) {
        let kind = message.kind();
        if let Err(e) = self.coordinator.send(message) {
            debug!(kind, error = %e, "notification to MC dropped");
        }
    }

    /// Enters the awaiting state of `op`, sends `request` and blocks
    /// until a reply handler leaves that state.
    pub(crate) fn request(&mut self, op: Awaiting, request: Outgoing) -> Result<(), ExecutorError> {
        self.enter_awaiting(op)?;
        self.send_to_mc(request)?;
        self.wait_for_state_change()
    }

    /// Moves from `MtcTestcase` or `PtcFunction` to the awaiting state
    /// of `op`.
    pub(crate) fn enter_awaiting(&mut self, op: Awaiting) -> Result<(), ExecutorError> {
        let awaiting = match self.state {
            ExecutorState::MtcTestcase | ExecutorState::PtcFunction => self.state.awaiting(op),
            _ => None,
        }
        .ok_or_else(|| {
            ExecutorError::internal(format!(
                "Executing {} operation in invalid state.",
                op.describe()
            ))
        })?;
        self.state = awaiting;
        Ok(())
    }

    /// Like [`Executor::enter_awaiting`] for the MTC-only `any`/`all`
    /// forms, which name the operation in their error.
    pub(crate) fn enter_awaiting_aggregate(
        &mut self,
        op: Awaiting,
        operation: &str,
    ) -> Result<(), ExecutorError> {
        if self.state != ExecutorState::MtcTestcase {
            return Err(ExecutorError::internal(format!(
                "Executing '{operation}' in invalid state."
            )));
        }
        self.enter_awaiting(op)
    }

    /// Takes snapshots until the state changes.
    pub(crate) fn wait_for_state_change(&mut self) -> Result<(), ExecutorError> {
        let before = self.state;
        while self.state == before {
            self.snapshot(true)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("state", &self.state)
            .field("self_ref", &self.self_ref)
            .field("component_type", &self.component_type)
            .field("alive", &self.alive)
            .field("ports", &self.ports.len())
            .field("children", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::QueueingBehaviour;
    use crate::testing::ScriptedCoordinator;

    #[test]
    fn constructors_pick_initial_state() {
        let config = TcxConfig::default();
        assert_eq!(
            Executor::single(config.clone()).state(),
            ExecutorState::SingleControlpart
        );
        assert_eq!(
            Executor::mtc(Box::new(ScriptedCoordinator::new()), config.clone()).state(),
            ExecutorState::MtcInitial
        );
        let ptc = Executor::ptc(
            Box::new(ScriptedCoordinator::new()),
            PtcIdentity {
                component: ComponentRef::new(5),
                component_type: QualifiedName::new("M", "CT"),
                name: Some("peer".into()),
                testcase: QualifiedName::new("M", "tc"),
                alive: true,
            },
            config,
        );
        assert_eq!(ptc.state(), ExecutorState::PtcInitial);
        assert_eq!(ptc.self_ref(), ComponentRef::new(5));
        assert!(ptc.is_alive());
        assert_eq!(ptc.names().get(ComponentRef::new(5)), Some("peer"));
    }

    #[test]
    fn added_port_is_started() {
        let mut exec = Executor::single(TcxConfig::default());
        exec.add_port(Port::new("p", QueueingBehaviour::new().with_message("T")))
            .unwrap();
        assert!(exec.ports().get("p").unwrap().is_started());
        assert!(exec.add_port(Port::new("p", QueueingBehaviour::new())).is_err());
    }

    #[test]
    fn request_outside_testcase_is_internal_error() {
        let mut exec = Executor::single(TcxConfig::default());
        let err = exec
            .request(
                Awaiting::Create,
                Outgoing::KillReq {
                    component: ComponentRef::ALL,
                },
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "internal error: Executing create operation in invalid state."
        );
    }
}
