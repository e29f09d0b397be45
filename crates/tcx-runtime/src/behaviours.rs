//! Test code entry points.
//!
//! The executor does not know the compiled test suite; whatever owns the
//! process hands it a [`Behaviours`] implementation, and the main loop
//! calls it when the coordinator asks for work:
//!
//! | Coordinator message | Role | Call |
//! |---------------------|------|------|
//! | `ExecuteControl` | MTC | [`Behaviours::execute_control`] |
//! | `ExecuteTestcase` | MTC | [`Behaviours::execute_testcase`] |
//! | (process start) | PTC | [`Behaviours::init_component`] |
//! | `Start` | PTC | [`Behaviours::start_function`] |
//!
//! Every call gets the executor back as `&mut Executor`, so test code
//! drives component, port and verdict operations through it.
//!
//! # Example
//!
//! ```
//! use tcx_runtime::behaviours::Behaviours;
//! use tcx_runtime::error::ExecutorError;
//! use tcx_runtime::executor::Executor;
//! use tcx_event::ReturnValue;
//! use tcx_types::{QualifiedName, Verdict};
//!
//! struct Suite;
//!
//! impl Behaviours for Suite {
//!     fn execute_control(&mut self, exec: &mut Executor, module: &str) -> Result<(), ExecutorError> {
//!         self.execute_testcase(exec, &QualifiedName::new(module, "tc_pass"))
//!     }
//!
//!     fn execute_testcase(
//!         &mut self,
//!         exec: &mut Executor,
//!         testcase: &QualifiedName,
//!     ) -> Result<(), ExecutorError> {
//!         let mtc_type = QualifiedName::new(testcase.module.clone(), "MtcType");
//!         exec.run_testcase(testcase, &mtc_type, &mtc_type, None, |exec| {
//!             exec.setverdict(Verdict::Pass, "")
//!         })?;
//!         Ok(())
//!     }
//!
//!     fn start_function(
//!         &mut self,
//!         _exec: &mut Executor,
//!         _function: &QualifiedName,
//!         _args: &[u8],
//!     ) -> Result<Option<ReturnValue>, ExecutorError> {
//!         Ok(None)
//!     }
//! }
//!
//! let mut exec = Executor::single(Default::default());
//! let stats = exec.execute_single(&mut Suite, "Demo").unwrap();
//! assert_eq!(stats.count(Verdict::Pass), 1);
//! ```

use crate::error::ExecutorError;
use crate::executor::Executor;
use tcx_event::ReturnValue;
use tcx_types::QualifiedName;

/// Test code the executor runs on behalf of the coordinator.
pub trait Behaviours {
    /// Runs the control part of `module`.
    ///
    /// # Errors
    ///
    /// Dynamic errors count as control-part errors; fatal errors end the
    /// MTC.
    fn execute_control(&mut self, exec: &mut Executor, module: &str) -> Result<(), ExecutorError>;

    /// Runs one test case, or every test case of `testcase.module` when
    /// `testcase.definition` is empty.
    ///
    /// # Errors
    ///
    /// As for [`Behaviours::execute_control`].
    fn execute_testcase(
        &mut self,
        exec: &mut Executor,
        testcase: &QualifiedName,
    ) -> Result<(), ExecutorError>;

    /// Runs a PTC behaviour function. `args` is the encoded argument
    /// list from `StartReq`.
    ///
    /// # Errors
    ///
    /// `Terminated` when the function was stopped or killed; any other
    /// error gives the PTC an error verdict and ends it.
    fn start_function(
        &mut self,
        exec: &mut Executor,
        function: &QualifiedName,
        args: &[u8],
    ) -> Result<Option<ReturnValue>, ExecutorError>;

    /// Prepares a fresh PTC of `component_type`, e.g. adds its ports.
    ///
    /// # Errors
    ///
    /// Any error ends the PTC before it reports itself created.
    fn init_component(
        &mut self,
        exec: &mut Executor,
        component_type: &QualifiedName,
    ) -> Result<(), ExecutorError> {
        let _ = (exec, component_type);
        Ok(())
    }
}
