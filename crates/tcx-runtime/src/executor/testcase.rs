//! Control part, test cases and verdicts.
//!
//! ```text
//!  MtcControlpart ── begin_testcase ──► MtcTestcase
//!        ▲                                   │ end_testcase
//!        │                                   ▼ TestcaseFinished
//!        ├──────── PtcVerdict ───── MtcTerminatingTestcase
//!        │         (continue)                │ PtcVerdict (pause)
//!        │                                   ▼
//!        └──────── Continue ─────────── MtcPaused
//! ```
//!
//! Single mode has no coordinator: `SingleControlpart` and
//! `SingleTestcase` swap directly.

use super::{Executor, ExecutorState};
use crate::error::ExecutorError;
use crate::status::AggregateStatus;
use std::fmt;
use tcx_event::Outgoing;
use tcx_types::{QualifiedName, Verdict};
use tracing::{debug, info, warn};

/// Local verdict and the counters behind the final statistics.
#[derive(Debug, Default)]
pub(crate) struct VerdictState {
    pub(crate) local: Verdict,
    pub(crate) reason: String,
    counts: [u32; 5],
    control_errors: u32,
}

impl VerdictState {
    /// Keeps the stricter verdict; an equal one does not replace the
    /// reason.
    pub(crate) fn fold(&mut self, verdict: Verdict, reason: &str) {
        if verdict > self.local {
            self.local = verdict;
            self.reason = reason.to_owned();
        }
    }

    fn reset_local(&mut self) {
        self.local = Verdict::None;
        self.reason.clear();
    }

    fn count(&mut self, verdict: Verdict) {
        self.counts[verdict as usize] += 1;
    }
}

/// Verdicts of every test case run by this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictStatistics {
    /// Test cases per verdict, indexed in [`Verdict::ALL`] order.
    pub counts: [u32; 5],
    /// Dynamic errors outside test cases.
    pub control_errors: u32,
}

impl VerdictStatistics {
    #[must_use]
    pub fn count(&self, verdict: Verdict) -> u32 {
        self.counts[verdict as usize]
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Worst verdict seen; any control-part error makes it `Error`.
    #[must_use]
    pub fn overall(&self) -> Verdict {
        if self.control_errors > 0 {
            return Verdict::Error;
        }
        Verdict::ALL
            .into_iter()
            .filter(|v| self.count(*v) > 0)
            .fold(Verdict::None, Verdict::worst)
    }
}

impl fmt::Display for VerdictStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total();
        let parts: Vec<String> = Verdict::ALL
            .into_iter()
            .map(|v| {
                let n = self.count(v);
                if total > 0 {
                    format!("{n} {v} ({:.2} %)", f64::from(n) * 100.0 / f64::from(total))
                } else {
                    format!("{n} {v}")
                }
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl Executor {
    // === Control part ===

    /// Marks the start of the control part of `module`.
    pub fn begin_controlpart(&mut self, module: &str) {
        info!(module, "Execution of control part in module {module} started.");
        self.control_module = Some(module.to_owned());
    }

    /// Marks the end of the running control part.
    pub fn end_controlpart(&mut self) {
        if let Some(module) = self.control_module.take() {
            info!(module = %module, "Execution of control part in module {module} finished.");
        }
    }

    // === Test cases ===

    /// Checks that a test case may start here.
    ///
    /// # Errors
    ///
    /// Test case error outside the control part or for a negative
    /// supervisor timer.
    pub fn check_begin_testcase(&self, timer: Option<f64>) -> Result<(), ExecutorError> {
        if !self.state.in_controlpart() {
            return Err(if self.state.is_single() || self.state.is_mtc() {
                ExecutorError::test_case(format!(
                    "Test case cannot be executed while another one ({}) is running.",
                    self.testcase
                ))
            } else if self.state.is_ptc() {
                ExecutorError::test_case("Test case cannot be executed on a PTC.")
            } else {
                ExecutorError::internal("Executing a test case in an invalid state.")
            });
        }
        match timer {
            Some(duration) if duration < 0.0 => Err(ExecutorError::test_case(format!(
                "The test case supervisor timer has negative duration ({duration} s)."
            ))),
            _ => Ok(()),
        }
    }

    /// Enters a test case.
    ///
    /// # Errors
    ///
    /// Internal error outside the control part; coordinator failures.
    pub fn begin_testcase(
        &mut self,
        testcase: &QualifiedName,
        mtc_type: &QualifiedName,
        system_type: &QualifiedName,
    ) -> Result<(), ExecutorError> {
        let parallel = match self.state {
            ExecutorState::SingleControlpart => false,
            ExecutorState::MtcControlpart => true,
            _ => return Err(ExecutorError::internal("Entering a testcase in invalid state.")),
        };
        self.testcase = testcase.clone();
        self.component_type = mtc_type.clone();
        self.verdict.reset_local();
        *self.status.aggregates_mut() = AggregateStatus::at_testcase_start();
        info!(testcase = %testcase, "Test case {testcase} started.");

        if parallel {
            self.send_to_mc(Outgoing::TestcaseStarted {
                testcase: testcase.clone(),
                mtc_type: mtc_type.clone(),
                system_type: system_type.clone(),
            })?;
            self.state = ExecutorState::MtcTestcase;
        } else {
            self.state = ExecutorState::SingleTestcase;
        }
        Ok(())
    }

    /// Leaves the running test case and returns its final verdict.
    ///
    /// In parallel mode this waits for the coordinator's `PtcVerdict`
    /// and, if the user paused execution, for `Continue`.
    ///
    /// # Errors
    ///
    /// `Terminated` if execution was stopped while paused; internal
    /// error outside a test case; coordinator failures.
    pub fn end_testcase(&mut self) -> Result<Verdict, ExecutorError> {
        if self.state.is_mtc() {
            if let Some(back) = self.state.after_reply() {
                self.state = back;
            }
        }
        let parallel = match self.state {
            ExecutorState::MtcTestcase => true,
            ExecutorState::SingleTestcase => false,
            _ => return Err(ExecutorError::internal("Ending a testcase in invalid state.")),
        };
        self.terminate_component_type();

        if parallel {
            info!("Waiting for PTCs to finish.");
            let (verdict, reason) = self.verdict_and_reason();
            self.send_to_mc(Outgoing::TestcaseFinished { verdict, reason })?;
            self.state = ExecutorState::MtcTerminatingTestcase;
            self.wait_for_state_change()?;
        } else {
            self.state = ExecutorState::SingleControlpart;
        }

        let verdict = self.verdict.local;
        let testcase = std::mem::take(&mut self.testcase);
        if self.verdict.reason.is_empty() {
            info!(testcase = %testcase, %verdict, "Test case {testcase} finished. Verdict: {verdict}");
        } else {
            info!(
                testcase = %testcase,
                %verdict,
                reason = %self.verdict.reason,
                "Test case {testcase} finished. Verdict: {verdict} reason: {}",
                self.verdict.reason
            );
        }
        self.verdict.count(verdict);
        self.status.clear();
        *self.status.aggregates_mut() = AggregateStatus::default();

        if self.state == ExecutorState::MtcPaused {
            info!("User paused execution. Waiting for continue or exit.");
            self.wait_for_state_change()?;
            if self.state != ExecutorState::MtcTerminatingExecution {
                info!("Resuming execution.");
            }
        }
        if self.state == ExecutorState::MtcTerminatingExecution {
            self.state = ExecutorState::MtcControlpart;
            info!("Terminating execution.");
            return Err(ExecutorError::Terminated);
        }
        Ok(verdict)
    }

    /// Runs `body` as test case `testcase` between
    /// [`Executor::begin_testcase`] and [`Executor::end_testcase`].
    ///
    /// A dynamic error in `body` sets the error verdict; a stop ends the
    /// body early. Fatal errors propagate without ending the test case.
    ///
    /// # Errors
    ///
    /// As for `check_begin_testcase`, `begin_testcase` and
    /// `end_testcase`, plus fatal errors from `body`.
    pub fn run_testcase<F>(
        &mut self,
        testcase: &QualifiedName,
        mtc_type: &QualifiedName,
        system_type: &QualifiedName,
        timer: Option<f64>,
        body: F,
    ) -> Result<Verdict, ExecutorError>
    where
        F: FnOnce(&mut Self) -> Result<(), ExecutorError>,
    {
        self.check_begin_testcase(timer)?;
        self.begin_testcase(testcase, mtc_type, system_type)?;
        match body(self) {
            Ok(()) | Err(ExecutorError::Terminated) => {}
            Err(ExecutorError::TestCase(message)) => {
                warn!(testcase = %testcase, "Dynamic test case error: {message}");
                self.set_error_verdict();
            }
            Err(fatal) => return Err(fatal),
        }
        self.end_testcase()
    }

    // === Verdicts ===

    /// `setverdict(verdict, reason)`.
    ///
    /// # Errors
    ///
    /// Test case error for an explicit `Error` verdict or in the control
    /// part.
    pub fn setverdict(&mut self, verdict: Verdict, reason: &str) -> Result<(), ExecutorError> {
        if self.state.verdict_enabled() {
            if verdict == Verdict::Error {
                return Err(ExecutorError::test_case("Error verdict cannot be set explicitly."));
            }
            self.set_verdict_internal(verdict, reason);
            Ok(())
        } else if self.state.in_controlpart() {
            Err(ExecutorError::test_case("Verdict cannot be set in the control part."))
        } else {
            Err(ExecutorError::internal("Setting the verdict in invalid state."))
        }
    }

    /// `getverdict`.
    ///
    /// # Errors
    ///
    /// Test case error in the control part.
    pub fn getverdict(&self) -> Result<Verdict, ExecutorError> {
        if self.state.verdict_enabled() {
            debug!(verdict = %self.verdict.local, "getverdict");
            Ok(self.verdict.local)
        } else if self.state.in_controlpart() {
            Err(ExecutorError::test_case(
                "Getverdict operation cannot be performed in the control part.",
            ))
        } else {
            Err(ExecutorError::internal("Getting the verdict in invalid state."))
        }
    }

    /// Records a dynamic error: an `Error` verdict inside a test case,
    /// a control error in the control part.
    pub(crate) fn set_error_verdict(&mut self) {
        if self.state.verdict_enabled() {
            self.set_verdict_internal(Verdict::Error, "");
        } else if self.state.in_controlpart() {
            self.verdict.control_errors += 1;
        }
    }

    fn set_verdict_internal(&mut self, verdict: Verdict, reason: &str) {
        let old = self.verdict.local;
        self.verdict.fold(verdict, reason);
        info!(
            old = %old,
            requested = %verdict,
            new = %self.verdict.local,
            reason,
            "setverdict({verdict}): {old} -> {}",
            self.verdict.local
        );
    }

    pub(crate) fn verdict_and_reason(&self) -> (Verdict, String) {
        (self.verdict.local, self.verdict.reason.clone())
    }

    /// Counts of the test cases run so far.
    #[must_use]
    pub fn verdict_statistics(&self) -> VerdictStatistics {
        VerdictStatistics {
            counts: self.verdict.counts,
            control_errors: self.verdict.control_errors,
        }
    }

    /// Logs the execution summary and starts counting afresh.
    pub(crate) fn log_verdict_statistics(&mut self) -> VerdictStatistics {
        let stats = self.verdict_statistics();
        info!("Verdict statistics: {stats}.");
        if stats.control_errors > 0 {
            warn!(
                control_errors = stats.control_errors,
                "Number of errors outside test cases: {}", stats.control_errors
            );
        }
        let total = stats.total();
        let plural = if total == 1 { "" } else { "s" };
        info!(
            total,
            overall = %stats.overall(),
            "Test execution summary: {total} test case{plural} executed. Overall verdict: {}",
            stats.overall()
        );
        self.verdict.counts = [0; 5];
        self.verdict.control_errors = 0;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcxConfig;
    use crate::status::CheckStatus;
    use crate::testing::ScriptedCoordinator;
    use tcx_event::Incoming;
    use tcx_types::ComponentRef;

    fn names() -> (QualifiedName, QualifiedName, QualifiedName) {
        (
            QualifiedName::new("M", "tc_ok"),
            QualifiedName::new("M", "MtcType"),
            QualifiedName::new("M", "SystemType"),
        )
    }

    #[test]
    fn fold_keeps_first_reason_per_level() {
        let mut state = VerdictState::default();
        state.fold(Verdict::Fail, "first");
        state.fold(Verdict::Fail, "second");
        state.fold(Verdict::Pass, "third");
        assert_eq!(state.local, Verdict::Fail);
        assert_eq!(state.reason, "first");
    }

    #[test]
    fn statistics_overall_and_display() {
        let mut stats = VerdictStatistics::default();
        assert_eq!(stats.overall(), Verdict::None);
        assert_eq!(stats.to_string(), "0 none, 0 pass, 0 inconc, 0 fail, 0 error");

        stats.counts[Verdict::Pass as usize] = 3;
        stats.counts[Verdict::Inconc as usize] = 1;
        assert_eq!(stats.overall(), Verdict::Inconc);
        assert!(stats.to_string().contains("3 pass (75.00 %)"));

        stats.control_errors = 1;
        assert_eq!(stats.overall(), Verdict::Error);
    }

    #[test]
    fn single_mode_testcase() {
        let (tc, mtc, system) = names();
        let mut exec = Executor::single(TcxConfig::default());
        let verdict = exec
            .run_testcase(&tc, &mtc, &system, None, |exec| {
                assert_eq!(exec.state(), ExecutorState::SingleTestcase);
                assert_eq!(exec.status().aggregates().all_done, CheckStatus::Yes);
                exec.setverdict(Verdict::Pass, "")?;
                exec.setverdict(Verdict::Inconc, "flaky")
            })
            .unwrap();

        assert_eq!(verdict, Verdict::Inconc);
        assert_eq!(exec.state(), ExecutorState::SingleControlpart);
        assert_eq!(exec.status().aggregates(), AggregateStatus::default());
        assert_eq!(exec.verdict_statistics().count(Verdict::Inconc), 1);
    }

    #[test]
    fn dynamic_error_gives_error_verdict() {
        let (tc, mtc, system) = names();
        let mut exec = Executor::single(TcxConfig::default());
        let verdict = exec
            .run_testcase(&tc, &mtc, &system, None, |_| {
                Err(ExecutorError::test_case("index overflow"))
            })
            .unwrap();
        assert_eq!(verdict, Verdict::Error);
    }

    #[test]
    fn nested_testcase_and_negative_timer_are_rejected() {
        let (tc, mtc, system) = names();
        let mut exec = Executor::single(TcxConfig::default());
        assert!(exec.check_begin_testcase(Some(-1.0)).is_err());
        exec.begin_testcase(&tc, &mtc, &system).unwrap();
        let err = exec.check_begin_testcase(None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Test case cannot be executed while another one (M.tc_ok) is running."
        );
    }

    #[test]
    fn verdict_rules() {
        let mut exec = Executor::single(TcxConfig::default());
        assert_eq!(
            exec.setverdict(Verdict::Pass, "").unwrap_err().to_string(),
            "Verdict cannot be set in the control part."
        );
        assert!(exec.getverdict().is_err());

        exec.set_error_verdict();
        assert_eq!(exec.verdict_statistics().control_errors, 1);

        exec.state = ExecutorState::SingleTestcase;
        assert_eq!(
            exec.setverdict(Verdict::Error, "").unwrap_err().to_string(),
            "Error verdict cannot be set explicitly."
        );
        assert_eq!(exec.getverdict().unwrap(), Verdict::None);
    }

    #[test]
    fn parallel_testcase_waits_for_ptc_verdicts() {
        let (tc, mtc, system) = names();
        let coordinator = ScriptedCoordinator::new().with_responder(|msg| match msg {
            Outgoing::TestcaseFinished { .. } => vec![Incoming::PtcVerdict {
                verdicts: vec![tcx_event::PtcVerdict {
                    component: ComponentRef::new(3),
                    name: None,
                    verdict: Verdict::Fail,
                    reason: "late".into(),
                }],
                continue_execution: true,
            }],
            _ => Vec::new(),
        });
        let sent = coordinator.sent();
        let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
        exec.state = ExecutorState::MtcControlpart;

        let verdict = exec
            .run_testcase(&tc, &mtc, &system, None, |exec| {
                exec.setverdict(Verdict::Pass, "")
            })
            .unwrap();

        assert_eq!(verdict, Verdict::Fail);
        assert_eq!(exec.state(), ExecutorState::MtcControlpart);
        let sent = sent.lock();
        assert!(matches!(sent[0], Outgoing::TestcaseStarted { .. }));
        assert_eq!(
            sent[1],
            Outgoing::TestcaseFinished {
                verdict: Verdict::Pass,
                reason: String::new(),
            }
        );
    }

    #[test]
    fn stop_while_paused_terminates_execution() {
        let (tc, mtc, system) = names();
        let coordinator = ScriptedCoordinator::new().with_responder(|msg| match msg {
            Outgoing::TestcaseFinished { .. } => vec![
                Incoming::PtcVerdict {
                    verdicts: Vec::new(),
                    continue_execution: false,
                },
                Incoming::Stop,
            ],
            _ => Vec::new(),
        });
        let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
        exec.state = ExecutorState::MtcControlpart;

        let err = exec
            .run_testcase(&tc, &mtc, &system, None, |_| Ok(()))
            .unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(exec.state(), ExecutorState::MtcControlpart);
    }
}
