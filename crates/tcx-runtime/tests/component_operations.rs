//! Integration tests for component operations on the MTC.
//!
//! Each test runs a real MTC main loop against a scripted coordinator:
//! - create, done and return values
//! - status cache hits and invalidation
//! - stop and alive edge cases

use parking_lot::Mutex;
use std::sync::Arc;
use tcx_event::{ComponentStatusReport, Incoming, Outgoing, ReturnValue};
use tcx_runtime::config::TcxConfig;
use tcx_runtime::testing::ScriptedCoordinator;
use tcx_runtime::{Behaviours, Executor, ExecutorError, RunOutcome};
use tcx_types::{ComponentRef, QualifiedName, Readiness, Verdict};

// =============================================================================
// Test Fixtures
// =============================================================================

const PTC: ComponentRef = ComponentRef::new(3);

type Body = Box<dyn FnMut(&mut Executor) -> Result<(), ExecutorError>>;

/// Runs one test case with `body` as the control part of module `M`.
struct OneTestcase {
    body: Body,
    verdict: Arc<Mutex<Option<Verdict>>>,
}

impl OneTestcase {
    fn new(body: impl FnMut(&mut Executor) -> Result<(), ExecutorError> + 'static) -> Self {
        Self {
            body: Box::new(body),
            verdict: Arc::default(),
        }
    }
}

impl Behaviours for OneTestcase {
    fn execute_control(&mut self, exec: &mut Executor, module: &str) -> Result<(), ExecutorError> {
        let body = &mut self.body;
        let verdict = exec.run_testcase(
            &QualifiedName::new(module, "tc"),
            &QualifiedName::new(module, "MtcType"),
            &QualifiedName::new(module, "SystemType"),
            None,
            |exec| (*body)(exec),
        )?;
        *self.verdict.lock() = Some(verdict);
        Ok(())
    }

    fn execute_testcase(
        &mut self,
        _exec: &mut Executor,
        _testcase: &QualifiedName,
    ) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn start_function(
        &mut self,
        _exec: &mut Executor,
        _function: &QualifiedName,
        _args: &[u8],
    ) -> Result<Option<ReturnValue>, ExecutorError> {
        Ok(None)
    }
}

/// Plays the MC for one control part; `answer` handles requests made
/// inside the test case.
fn coordinator<F>(mut answer: F) -> ScriptedCoordinator
where
    F: FnMut(&Outgoing) -> Vec<Incoming> + 'static,
{
    let mut coordinator = ScriptedCoordinator::new().with_responder(move |message| match message {
        Outgoing::CreateReq { .. } => vec![Incoming::CreateAck { component: PTC }],
        Outgoing::TestcaseFinished { .. } => vec![Incoming::PtcVerdict {
            verdicts: Vec::new(),
            continue_execution: true,
        }],
        Outgoing::MtcReady => vec![Incoming::ExitMtc],
        other => answer(other),
    });
    coordinator.push(Incoming::ExecuteControl { module: "M".into() });
    coordinator
}

fn run_mtc(coordinator: ScriptedCoordinator, behaviours: &mut OneTestcase) -> Vec<Outgoing> {
    let sent = coordinator.sent();
    let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
    assert_eq!(exec.run(behaviours).unwrap(), RunOutcome::Finished);
    let messages = sent.lock().clone();
    messages
}

fn count(sent: &[Outgoing], wanted: impl Fn(&Outgoing) -> bool) -> usize {
    sent.iter().filter(|m| wanted(m)).count()
}

fn ptc_type() -> QualifiedName {
    QualifiedName::new("M", "PT")
}

// =============================================================================
// done and return values
// =============================================================================

#[test]
fn done_asks_once_then_reads_the_cache() {
    let coordinator = coordinator(|message| match message {
        Outgoing::DoneReq { component } if *component == PTC => vec![Incoming::DoneAck {
            answer: true,
            return_value: Some(ReturnValue::new("integer", vec![42])),
        }],
        _ => Vec::new(),
    });
    let mut behaviours = OneTestcase::new(|exec| {
        let ptc = exec.create_component(&ptc_type(), None, None, false)?;
        assert_eq!(ptc, PTC);

        // First evaluation asks the MC; the alternative is re-evaluated.
        assert_eq!(exec.component_done(ptc)?, Readiness::Repeat);
        assert_eq!(exec.component_done(ptc)?, Readiness::Yes);
        assert_eq!(
            exec.component_done_with_value(ptc, "integer")?,
            (Readiness::Yes, Some(ReturnValue::new("integer", vec![42])))
        );
        assert_eq!(
            exec.component_done_with_value(ptc, "charstring")?,
            (Readiness::No, None)
        );
        exec.setverdict(Verdict::Pass, "")
    });
    let verdict = Arc::clone(&behaviours.verdict);

    let sent = run_mtc(coordinator, &mut behaviours);
    assert_eq!(count(&sent, |m| matches!(m, Outgoing::DoneReq { .. })), 1);
    assert_eq!(*verdict.lock(), Some(Verdict::Pass));
    assert_eq!(sent.last(), Some(&Outgoing::MtcReady));
}

#[test]
fn negative_done_answer_keeps_waiting() {
    let coordinator = coordinator(|message| match message {
        Outgoing::DoneReq { .. } => vec![Incoming::DoneAck {
            answer: false,
            return_value: None,
        }],
        _ => Vec::new(),
    });
    let mut behaviours = OneTestcase::new(|exec| {
        let ptc = exec.create_component(&ptc_type(), None, None, false)?;
        assert_eq!(exec.component_done(ptc)?, Readiness::Repeat);
        // The MC pushes the status once the PTC finishes.
        assert_eq!(exec.component_done(ptc)?, Readiness::Maybe);
        Ok(())
    });

    let sent = run_mtc(coordinator, &mut behaviours);
    assert_eq!(count(&sent, |m| matches!(m, Outgoing::DoneReq { .. })), 1);
}

#[test]
fn status_push_answers_running_locally() {
    let scripted = ScriptedCoordinator::new();
    let inbox = scripted.inbox();
    let mut coordinator = scripted.with_responder(move |message| {
        match message {
            Outgoing::CreateReq { .. } => {
                // The PTC terminates right after it was created.
                inbox.lock().push_back(Incoming::ComponentStatus(ComponentStatusReport {
                    component: PTC,
                    done: true,
                    ..ComponentStatusReport::default()
                }));
                vec![Incoming::CreateAck { component: PTC }]
            }
            Outgoing::TestcaseFinished { .. } => vec![Incoming::PtcVerdict {
                verdicts: Vec::new(),
                continue_execution: true,
            }],
            Outgoing::MtcReady => vec![Incoming::ExitMtc],
            _ => Vec::new(),
        }
    });
    coordinator.push(Incoming::ExecuteControl { module: "M".into() });
    let mut behaviours = OneTestcase::new(|exec| {
        let ptc = exec.create_component(&ptc_type(), None, None, false)?;
        assert!(!exec.component_running(ptc)?);
        assert_eq!(exec.component_done(ptc)?, Readiness::Yes);
        Ok(())
    });

    let sent = run_mtc(coordinator, &mut behaviours);
    assert_eq!(count(&sent, |m| matches!(m, Outgoing::IsRunning { .. })), 0);
    assert_eq!(count(&sent, |m| matches!(m, Outgoing::DoneReq { .. })), 0);
}

// =============================================================================
// Aggregates
// =============================================================================

#[test]
fn create_invalidates_aggregate_answers() {
    let coordinator = coordinator(|message| match message {
        Outgoing::DoneReq { .. } => vec![Incoming::DoneAck {
            answer: false,
            return_value: None,
        }],
        Outgoing::KilledReq { .. } => vec![Incoming::KilledAck { answer: false }],
        _ => Vec::new(),
    });
    let mut behaviours = OneTestcase::new(|exec| {
        // Nothing was created yet: every answer is local.
        assert_eq!(exec.component_done(ComponentRef::ANY)?, Readiness::No);
        assert_eq!(exec.component_done(ComponentRef::ALL)?, Readiness::Yes);
        assert_eq!(exec.component_killed(ComponentRef::ALL)?, Readiness::Yes);

        exec.create_component(&ptc_type(), None, None, false)?;

        assert_eq!(exec.component_done(ComponentRef::ANY)?, Readiness::Repeat);
        assert_eq!(exec.component_killed(ComponentRef::ALL)?, Readiness::Repeat);
        // A fresh PTC is not running yet.
        assert_eq!(exec.component_done(ComponentRef::ALL)?, Readiness::Yes);
        Ok(())
    });

    let sent = run_mtc(coordinator, &mut behaviours);
    assert_eq!(
        count(&sent, |m| matches!(m, Outgoing::DoneReq { component } if *component == ComponentRef::ANY)),
        1
    );
    assert_eq!(
        count(&sent, |m| matches!(m, Outgoing::KilledReq { component } if *component == ComponentRef::ALL)),
        1
    );
}

#[test]
fn all_alive_is_true_before_any_kill_was_possible() {
    let coordinator = coordinator(|message| match message {
        Outgoing::IsAlive { .. } => vec![Incoming::Alive { answer: false }],
        _ => Vec::new(),
    });
    let mut behaviours = OneTestcase::new(|exec| {
        assert!(exec.component_alive(ComponentRef::ALL)?);
        assert!(!exec.component_alive(ComponentRef::ANY)?);

        exec.create_component(&ptc_type(), None, None, true)?;
        assert!(!exec.component_alive(ComponentRef::ALL)?);
        Ok(())
    });

    let sent = run_mtc(coordinator, &mut behaviours);
    assert_eq!(
        count(&sent, |m| matches!(m, Outgoing::IsAlive { component } if *component == ComponentRef::ALL)),
        1
    );
}

// =============================================================================
// stop
// =============================================================================

#[test]
fn stopping_a_done_component_sends_nothing() {
    let coordinator = coordinator(|message| match message {
        Outgoing::DoneReq { .. } => vec![Incoming::DoneAck {
            answer: true,
            return_value: None,
        }],
        Outgoing::StopReq { .. } => vec![Incoming::StopAck],
        _ => Vec::new(),
    });
    let mut behaviours = OneTestcase::new(|exec| {
        let ptc = exec.create_component(&ptc_type(), None, None, false)?;
        assert_eq!(exec.component_done(ptc)?, Readiness::Repeat);
        exec.stop_component(ptc)?;
        exec.stop_component(ptc)?;
        Ok(())
    });

    let sent = run_mtc(coordinator, &mut behaviours);
    assert_eq!(count(&sent, |m| matches!(m, Outgoing::StopReq { .. })), 0);
}

#[test]
fn stopping_a_running_component_waits_for_the_ack() {
    let coordinator = coordinator(|message| match message {
        Outgoing::StopReq { .. } => vec![Incoming::StopAck],
        _ => Vec::new(),
    });
    let mut behaviours = OneTestcase::new(|exec| {
        let ptc = exec.create_component(&ptc_type(), None, None, false)?;
        exec.stop_component(ptc)
    });

    let sent = run_mtc(coordinator, &mut behaviours);
    assert_eq!(
        count(&sent, |m| matches!(m, Outgoing::StopReq { component } if *component == PTC)),
        1
    );
}

#[test]
fn dynamic_error_in_testcase_gives_error_verdict() {
    let coordinator = coordinator(|_| Vec::new());
    let mut behaviours = OneTestcase::new(|exec| {
        exec.setverdict(Verdict::Pass, "")?;
        Err(ExecutorError::test_case("index overflow"))
    });
    let verdict = Arc::clone(&behaviours.verdict);

    let sent = run_mtc(coordinator, &mut behaviours);
    assert_eq!(*verdict.lock(), Some(Verdict::Error));
    assert!(sent.iter().any(|m| matches!(
        m,
        Outgoing::TestcaseFinished { verdict: Verdict::Error, .. }
    )));
}
