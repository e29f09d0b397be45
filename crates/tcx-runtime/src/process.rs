//! OS process control used by the host controller.
//!
//! The executor never calls `fork(2)` or `waitpid(2)` directly; it goes
//! through [`ProcessControl`] so that the HC logic can be exercised in
//! tests with `testing::FakeProcesses`.
//!
//! | Operation | System call |
//! |-----------|-------------|
//! | [`ProcessControl::fork`] | `fork(2)` |
//! | [`ProcessControl::reap`] | `waitpid(-1, WNOHANG)` + `getrusage(RUSAGE_CHILDREN)` |
//! | [`ProcessControl::kill`] | `kill(pid, SIGKILL)` |
//! | [`ProcessControl::spawn_dummy`] | `fork(2)`, the child calls `_exit(0)` |
//! | [`ProcessControl::wait`] | `waitpid(pid, 0)` |

use nix::errno::Errno;
use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::fmt;
use std::time::Duration;

/// Which side of a fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    Parent(Pid),
    Child,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(Signal),
    Unknown,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {code}"),
            Self::Signaled(signal) => write!(f, "terminated by signal {} ({signal})", *signal as i32),
            Self::Unknown => f.write_str("terminated by an unknown reason"),
        }
    }
}

/// Resource usage reported alongside a reaped child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
    pub max_rss: i64,
    pub minor_faults: i64,
    pub major_faults: i64,
    pub block_reads: i64,
    pub block_writes: i64,
    pub voluntary_switches: i64,
    pub involuntary_switches: i64,
}

impl fmt::Display for ResourceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user time: {:.6} s, system time: {:.6} s, maximum resident set size: {}, \
             page faults not requiring physical I/O: {}, page faults requiring physical I/O: {}, \
             block input operations: {}, block output operations: {}, \
             voluntary context switches: {}, involuntary context switches: {}",
            self.user_time.as_secs_f64(),
            self.system_time.as_secs_f64(),
            self.max_rss,
            self.minor_faults,
            self.major_faults,
            self.block_reads,
            self.block_writes,
            self.voluntary_switches,
            self.involuntary_switches,
        )
    }
}

/// One terminated child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: Pid,
    pub exit: ExitKind,
    pub usage: ResourceUsage,
}

/// Process primitives the host controller needs.
pub trait ProcessControl {
    /// Forks the current process.
    ///
    /// # Errors
    ///
    /// The errno of a failed `fork(2)`, typically `EAGAIN` or `ENOMEM`
    /// on an overloaded host.
    fn fork(&mut self) -> Result<ForkOutcome, Errno>;

    /// Collects one terminated child without blocking.
    ///
    /// Returns `Ok(None)` when no child has terminated or no child is
    /// left.
    ///
    /// # Errors
    ///
    /// Any errno other than `ECHILD`.
    fn reap(&mut self) -> Result<Option<ChildExit>, Errno>;

    /// Sends `SIGKILL` to `pid`.
    ///
    /// # Errors
    ///
    /// `ESRCH` if the process is already gone, or any other errno.
    fn kill(&mut self, pid: Pid) -> Result<(), Errno>;

    /// Forks a child that exits at once. Succeeds only when the host
    /// can create processes again.
    ///
    /// # Errors
    ///
    /// The errno of the failed `fork(2)`.
    fn spawn_dummy(&mut self) -> Result<Pid, Errno>;

    /// Blocks until `pid` terminates.
    ///
    /// # Errors
    ///
    /// The errno of the failed `waitpid(2)`.
    fn wait(&mut self, pid: Pid) -> Result<ExitKind, Errno>;
}

/// [`ProcessControl`] backed by the real system calls.
#[derive(Debug, Default)]
pub struct SystemProcesses;

impl SystemProcesses {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn children_usage() -> ResourceUsage {
    let Ok(usage) = getrusage(UsageWho::RUSAGE_CHILDREN) else {
        return ResourceUsage::default();
    };
    let to_duration = |tv: nix::sys::time::TimeVal| {
        Duration::new(
            u64::try_from(tv.tv_sec()).unwrap_or_default(),
            u32::try_from(tv.tv_usec()).unwrap_or_default() * 1_000,
        )
    };
    ResourceUsage {
        user_time: to_duration(usage.user_time()),
        system_time: to_duration(usage.system_time()),
        max_rss: usage.max_rss(),
        minor_faults: usage.minor_page_faults(),
        major_faults: usage.major_page_faults(),
        block_reads: usage.block_reads(),
        block_writes: usage.block_writes(),
        voluntary_switches: usage.voluntary_context_switches(),
        involuntary_switches: usage.involuntary_context_switches(),
    }
}

fn exit_kind(status: WaitStatus) -> ExitKind {
    match status {
        WaitStatus::Exited(_, code) => ExitKind::Exited(code),
        WaitStatus::Signaled(_, signal, _) => ExitKind::Signaled(signal),
        _ => ExitKind::Unknown,
    }
}

impl ProcessControl for SystemProcesses {
    fn fork(&mut self) -> Result<ForkOutcome, Errno> {
        // SAFETY: the executor is single-threaded; the child only touches
        // state it owns before continuing in its new role.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(ForkOutcome::Parent(child)),
            ForkResult::Child => Ok(ForkOutcome::Child),
        }
    }

    fn reap(&mut self) -> Result<Option<ChildExit>, Errno> {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return Ok(None),
                Ok(status) => {
                    let Some(pid) = status.pid() else {
                        continue;
                    };
                    return Ok(Some(ChildExit {
                        pid,
                        exit: exit_kind(status),
                        usage: children_usage(),
                    }));
                }
                Err(Errno::EINTR) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn kill(&mut self, pid: Pid) -> Result<(), Errno> {
        kill(pid, Signal::SIGKILL)
    }

    fn spawn_dummy(&mut self) -> Result<Pid, Errno> {
        // SAFETY: the child calls only the async-signal-safe `_exit`.
        match unsafe { fork() }? {
            ForkResult::Child => unsafe { nix::libc::_exit(0) },
            ForkResult::Parent { child } => Ok(child),
        }
    }

    fn wait(&mut self, pid: Pid) -> Result<ExitKind, Errno> {
        loop {
            match waitpid(pid, None) {
                Ok(status) => return Ok(exit_kind(status)),
                Err(Errno::EINTR) => {}
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_kind_display() {
        assert_eq!(ExitKind::Exited(3).to_string(), "exit status 3");
        assert_eq!(
            ExitKind::Signaled(Signal::SIGKILL).to_string(),
            "terminated by signal 9 (SIGKILL)"
        );
    }

    #[test]
    fn usage_display_mentions_times() {
        let usage = ResourceUsage {
            user_time: Duration::from_millis(1500),
            ..Default::default()
        };
        assert!(usage.to_string().starts_with("user time: 1.500000 s"));
    }

    #[test]
    fn dummy_child_exits_cleanly() {
        let mut processes = SystemProcesses::new();
        let pid = processes.spawn_dummy().unwrap();
        assert_eq!(processes.wait(pid).unwrap(), ExitKind::Exited(0));
    }
}
