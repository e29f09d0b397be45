//! Process-wide signal dispositions.
//!
//! | Signal | Disposition |
//! |--------|-------------|
//! | `SIGPIPE` | ignored; a vanished peer surfaces as `EPIPE` on the socket |
//! | `SIGSEGV`, `SIGABRT`, `SIGBUS`, `SIGFPE` | one line on stderr, then the default action |
//!
//! The fatal handlers are one-shot (`SA_RESETHAND`): after reporting, the
//! signal is raised again and kills the process with its usual status,
//! which the host controller then logs when it reaps the child.

use crate::error::ExecutorError;
use nix::libc;
use nix::sys::signal::{raise, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

const FATAL_SIGNALS: [Signal; 4] = [
    Signal::SIGSEGV,
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
];

extern "C" fn report_fatal_signal(signum: libc::c_int) {
    const MESSAGE: &[u8] = b"tcx: fatal signal received, terminating\n";
    // SAFETY: write(2) on stderr is async-signal-safe; the buffer is static.
    unsafe {
        libc::write(libc::STDERR_FILENO, MESSAGE.as_ptr().cast(), MESSAGE.len());
    }
    if let Ok(signal) = Signal::try_from(signum) {
        // The handler was reset on entry, so this runs the default action.
        let _ = raise(signal);
    }
}

/// Ignores `SIGPIPE` and installs the fatal-signal reporter.
///
/// # Errors
///
/// [`ExecutorError::System`] if `sigaction(2)` fails.
pub fn install_fatal_handlers() -> Result<(), ExecutorError> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_IGN involves no handler code.
    unsafe { sigaction(Signal::SIGPIPE, &ignore) }
        .map_err(|e| ExecutorError::system("sigaction() system call failed for SIGPIPE", e))?;

    let fatal = SigAction::new(
        SigHandler::Handler(report_fatal_signal),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    for signal in FATAL_SIGNALS {
        // SAFETY: the handler only calls async-signal-safe functions.
        unsafe { sigaction(signal, &fatal) }.map_err(|e| {
            ExecutorError::system(format!("sigaction() system call failed for {signal}"), e)
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_install_and_sigpipe_is_ignored() {
        install_fatal_handlers().unwrap();
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        // SAFETY: re-installing SIG_IGN returns the current disposition.
        let previous = unsafe { sigaction(Signal::SIGPIPE, &ignore) }.unwrap();
        assert_eq!(previous.handler(), SigHandler::SigIgn);
    }
}
