//! Test doubles for the executor's collaborators.
//!
//! | Double | Stands in for | Inspect with |
//! |--------|---------------|--------------|
//! | [`ScriptedCoordinator`] | the MC link | [`ScriptedCoordinator::sent`] |
//! | [`FakeProcesses`] | `fork`/`waitpid`/`kill` | [`FakeProcesses::killed`], [`FakeProcesses::waited`] |
//! | [`RecordingBehaviours`] | compiled test code | [`RecordingBehaviours::calls`] |
//!
//! # Example
//!
//! ```
//! use tcx_event::{Incoming, Outgoing};
//! use tcx_runtime::config::TcxConfig;
//! use tcx_runtime::executor::{Executor, RunOutcome};
//! use tcx_runtime::testing::{RecordingBehaviours, ScriptedCoordinator};
//!
//! let mut coordinator = ScriptedCoordinator::new();
//! coordinator.push(Incoming::ExecuteControl { module: "Demo".into() });
//! coordinator.push(Incoming::ExitMtc);
//! let sent = coordinator.sent();
//!
//! let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
//! let mut behaviours = RecordingBehaviours::new();
//! assert_eq!(exec.run(&mut behaviours).unwrap(), RunOutcome::Finished);
//! assert_eq!(*sent.lock(), vec![Outgoing::MtcCreated, Outgoing::MtcReady]);
//! ```

use crate::behaviours::Behaviours;
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::process::{ChildExit, ExitKind, ForkOutcome, ProcessControl};
use nix::errno::Errno;
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use tcx_event::{Incoming, Outgoing, ReturnValue};
use tcx_types::QualifiedName;

/// Empty polls after which [`ScriptedCoordinator`] reports the link as
/// closed, so a test waiting for a reply that never comes fails instead
/// of hanging.
const IDLE_LIMIT: u32 = 10_000;

type Responder = Box<dyn FnMut(&Outgoing) -> Vec<Incoming>>;

/// In-memory coordinator link.
///
/// Messages queued with [`ScriptedCoordinator::push`] are delivered in
/// order; a responder can answer each sent message with more messages.
pub struct ScriptedCoordinator {
    inbound: Arc<Mutex<VecDeque<Incoming>>>,
    sent: Arc<Mutex<Vec<Outgoing>>>,
    responder: Option<Responder>,
    idle_polls: u32,
    closed: Arc<Mutex<bool>>,
}

impl ScriptedCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inbound: Arc::default(),
            sent: Arc::default(),
            responder: None,
            idle_polls: 0,
            closed: Arc::default(),
        }
    }

    /// Answers every sent message with what `responder` returns.
    #[must_use]
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&Outgoing) -> Vec<Incoming> + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Queues a message for delivery.
    pub fn push(&mut self, message: Incoming) {
        self.inbound.lock().push_back(message);
    }

    /// Queue shared with the link, for pushing after it was boxed.
    #[must_use]
    pub fn inbox(&self) -> Arc<Mutex<VecDeque<Incoming>>> {
        Arc::clone(&self.inbound)
    }

    /// Everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Arc<Mutex<Vec<Outgoing>>> {
        Arc::clone(&self.sent)
    }

    /// Set once [`Coordinator::close`] was called.
    #[must_use]
    pub fn closed_flag(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.closed)
    }
}

impl Default for ScriptedCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptedCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedCoordinator")
            .field("inbound", &self.inbound.lock().len())
            .field("sent", &self.sent.lock().len())
            .field("responder", &self.responder.is_some())
            .finish_non_exhaustive()
    }
}

impl Coordinator for ScriptedCoordinator {
    fn send(&mut self, message: Outgoing) -> Result<(), CoordinatorError> {
        if *self.closed.lock() {
            return Err(CoordinatorError::Closed);
        }
        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(&message);
            self.inbound.lock().extend(replies);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Incoming>, CoordinatorError> {
        if let Some(message) = self.inbound.lock().pop_front() {
            self.idle_polls = 0;
            return Ok(Some(message));
        }
        self.idle_polls += 1;
        if self.idle_polls > IDLE_LIMIT {
            return Err(CoordinatorError::Closed);
        }
        Ok(None)
    }

    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn close(&mut self) {
        *self.closed.lock() = true;
    }
}

/// Scripted results for [`FakeProcesses`].
#[derive(Debug, Default)]
struct FakeState {
    forks: VecDeque<Result<ForkOutcome, Errno>>,
    exits: VecDeque<ChildExit>,
    kill_results: VecDeque<Result<(), Errno>>,
    killed: Vec<Pid>,
    dummies: VecDeque<Result<Pid, Errno>>,
    waits: VecDeque<ExitKind>,
    waited: Vec<Pid>,
}

/// [`ProcessControl`] that never touches real processes.
///
/// Clones share their script, so a test keeps one clone for setup and
/// inspection and boxes another into the executor.
///
/// Unscripted calls behave like an overloaded host with no children:
/// `fork` and `spawn_dummy` fail with `EAGAIN`, `reap` finds nothing,
/// `kill` succeeds and `wait` reports a clean exit.
#[derive(Debug, Clone, Default)]
pub struct FakeProcesses {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProcesses {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fork(&self, outcome: Result<ForkOutcome, Errno>) {
        self.state.lock().forks.push_back(outcome);
    }

    /// Makes `exit` the next child collected by `reap`.
    pub fn push_exit(&self, exit: ChildExit) {
        self.state.lock().exits.push_back(exit);
    }

    pub fn push_kill(&self, result: Result<(), Errno>) {
        self.state.lock().kill_results.push_back(result);
    }

    pub fn push_dummy(&self, result: Result<Pid, Errno>) {
        self.state.lock().dummies.push_back(result);
    }

    pub fn push_wait(&self, exit: ExitKind) {
        self.state.lock().waits.push_back(exit);
    }

    /// Pids `kill` was called with, in order.
    #[must_use]
    pub fn killed(&self) -> Vec<Pid> {
        self.state.lock().killed.clone()
    }

    /// Pids `wait` was called with, in order.
    #[must_use]
    pub fn waited(&self) -> Vec<Pid> {
        self.state.lock().waited.clone()
    }
}

impl ProcessControl for FakeProcesses {
    fn fork(&mut self) -> Result<ForkOutcome, Errno> {
        self.state.lock().forks.pop_front().unwrap_or(Err(Errno::EAGAIN))
    }

    fn reap(&mut self) -> Result<Option<ChildExit>, Errno> {
        Ok(self.state.lock().exits.pop_front())
    }

    fn kill(&mut self, pid: Pid) -> Result<(), Errno> {
        let mut state = self.state.lock();
        state.killed.push(pid);
        state.kill_results.pop_front().unwrap_or(Ok(()))
    }

    fn spawn_dummy(&mut self) -> Result<Pid, Errno> {
        self.state.lock().dummies.pop_front().unwrap_or(Err(Errno::EAGAIN))
    }

    fn wait(&mut self, pid: Pid) -> Result<ExitKind, Errno> {
        let mut state = self.state.lock();
        state.waited.push(pid);
        Ok(state.waits.pop_front().unwrap_or(ExitKind::Exited(0)))
    }
}

type Outcome<T> = Box<dyn FnMut() -> Result<T, ExecutorError>>;
type FunctionBody = Box<dyn FnMut(&mut Executor) -> Result<Option<ReturnValue>, ExecutorError>>;

/// [`Behaviours`] that records every call.
///
/// Calls are recorded as `"control M"`, `"testcase M.tc"`,
/// `"init M.PT"` and `"function M.f [1, 2]"`. Unless configured, every
/// call succeeds and functions return no value.
#[derive(Default)]
pub struct RecordingBehaviours {
    calls: Vec<String>,
    control: Option<Outcome<()>>,
    testcase: Option<Outcome<()>>,
    function: Option<FunctionBody>,
}

impl RecordingBehaviours {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_control_result<F>(mut self, result: F) -> Self
    where
        F: FnMut() -> Result<(), ExecutorError> + 'static,
    {
        self.control = Some(Box::new(result));
        self
    }

    #[must_use]
    pub fn with_testcase_result<F>(mut self, result: F) -> Self
    where
        F: FnMut() -> Result<(), ExecutorError> + 'static,
    {
        self.testcase = Some(Box::new(result));
        self
    }

    #[must_use]
    pub fn with_function_result<F>(self, mut result: F) -> Self
    where
        F: FnMut() -> Result<Option<ReturnValue>, ExecutorError> + 'static,
    {
        self.with_function(move |_| result())
    }

    /// Runs `body` as every behaviour function, with access to the
    /// executor.
    #[must_use]
    pub fn with_function<F>(mut self, body: F) -> Self
    where
        F: FnMut(&mut Executor) -> Result<Option<ReturnValue>, ExecutorError> + 'static,
    {
        self.function = Some(Box::new(body));
        self
    }

    /// Calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.clone()
    }
}

impl std::fmt::Debug for RecordingBehaviours {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingBehaviours")
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl Behaviours for RecordingBehaviours {
    fn execute_control(&mut self, _exec: &mut Executor, module: &str) -> Result<(), ExecutorError> {
        self.calls.push(format!("control {module}"));
        self.control.as_mut().map_or(Ok(()), |result| result())
    }

    fn execute_testcase(
        &mut self,
        _exec: &mut Executor,
        testcase: &QualifiedName,
    ) -> Result<(), ExecutorError> {
        self.calls.push(format!("testcase {testcase}"));
        self.testcase.as_mut().map_or(Ok(()), |result| result())
    }

    fn start_function(
        &mut self,
        exec: &mut Executor,
        function: &QualifiedName,
        args: &[u8],
    ) -> Result<Option<ReturnValue>, ExecutorError> {
        self.calls.push(format!("function {function} {args:?}"));
        self.function.as_mut().map_or(Ok(None), |body| body(exec))
    }

    fn init_component(
        &mut self,
        _exec: &mut Executor,
        component_type: &QualifiedName,
    ) -> Result<(), ExecutorError> {
        self.calls.push(format!("init {component_type}"));
        Ok(())
    }
}
