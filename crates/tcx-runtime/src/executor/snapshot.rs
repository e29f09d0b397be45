//! One iteration of the event loop.

use super::Executor;
use crate::connection::ConnectionKey;
use crate::error::ExecutorError;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

impl Executor {
    /// Processes every pending event once.
    ///
    /// 1. Frames already sitting in connection buffers.
    /// 2. `poll(2)` over the coordinator link and every listening or
    ///    connected port socket.
    /// 3. Accept and read events on port sockets.
    /// 4. Every coordinator message that is available.
    /// 5. On the host controller: terminated children and the overload
    ///    check.
    ///
    /// With `block` set, the poll waits up to
    /// `executor.snapshot_timeout_ms`, but only if the coordinator link
    /// is pollable and holds no complete message in its own buffer;
    /// otherwise nothing could wake it in time.
    ///
    /// # Errors
    ///
    /// `poll()` failures, and whatever the event handlers return.
    pub fn snapshot(&mut self, block: bool) -> Result<(), ExecutorError> {
        {
            let (ports, mut env) = self.ports_and_env();
            ports.dispatch_buffered(&mut env)?;
        }

        for key in self.poll_ready(block)? {
            let (ports, mut env) = self.ports_and_env();
            ports.handle_ready(&mut env, &key)?;
        }

        self.drain_coordinator()?;

        if self.state.is_hc() {
            self.reap_children()?;
            self.check_overload()?;
        }
        Ok(())
    }

    fn poll_timeout(&self, block: bool) -> PollTimeout {
        if !block || self.coordinator.as_fd().is_none() || self.coordinator.has_buffered() {
            return PollTimeout::ZERO;
        }
        let millis = self.config.executor.snapshot_timeout().as_millis();
        PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
    }

    /// Port connections with pending events.
    fn poll_ready(&mut self, block: bool) -> Result<Vec<ConnectionKey>, ExecutorError> {
        let timeout = self.poll_timeout(block);
        let watched = self.ports.watched();
        let coordinator_fd = self.coordinator.as_fd();
        if watched.is_empty() && coordinator_fd.is_none() {
            return Ok(Vec::new());
        }

        let mut fds: Vec<PollFd<'_>> = watched
            .iter()
            .map(|(_, fd)| PollFd::new(*fd, PollFlags::POLLIN))
            .collect();
        if let Some(fd) = coordinator_fd {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
        }

        loop {
            match poll(&mut fds, timeout) {
                Ok(_) => break,
                Err(Errno::EINTR) => {}
                Err(e) => return Err(ExecutorError::system("poll() system call failed", e)),
            }
        }

        Ok(watched
            .iter()
            .zip(&fds)
            .filter(|(_, fd)| fd.revents().is_some_and(|r| !r.is_empty()))
            .map(|((key, _), _)| key.clone())
            .collect())
    }

    /// Feeds available coordinator messages to the dispatcher.
    ///
    /// Stops early once a message has queued work for the main loop, so
    /// that later messages are seen in the state that work creates.
    fn drain_coordinator(&mut self) -> Result<(), ExecutorError> {
        while self.pending_work.is_none() {
            let Some(message) = self.coordinator.try_recv()? else {
                break;
            };
            self.dispatch(message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::ExecutorState;
    use super::*;
    use crate::config::TcxConfig;
    use crate::connection::{StreamChannel, StreamListener};
    use crate::coordinator::StreamCoordinator;
    use crate::testing::ScriptedCoordinator;
    use std::time::{Duration, Instant};
    use tcx_event::Incoming;

    #[test]
    fn snapshot_drains_every_message() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::ExecuteControl {
            module: "M".into(),
        });
        let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
        exec.state = ExecutorState::MtcIdle;
        exec.snapshot(false).unwrap();
        assert_eq!(exec.state(), ExecutorState::MtcControlpart);
    }

    #[test]
    fn buffered_coordinator_message_skips_the_poll_wait() {
        let listener = StreamListener::bind_inet("127.0.0.1".parse().unwrap()).unwrap();
        let link = StreamChannel::connect(&listener.address().unwrap()).unwrap();
        let mut mc = listener.accept().unwrap();

        let mut bytes = Vec::new();
        for message in [
            Incoming::ExecuteControl {
                module: "M".into(),
            },
            Incoming::ExitMtc,
        ] {
            let body = serde_json::to_vec(&message).unwrap();
            bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
            bytes.extend_from_slice(&body);
        }
        mc.write_all_blocking(&bytes).unwrap();

        let mut config = TcxConfig::default();
        config.executor.snapshot_timeout_ms = 5_000;
        let coordinator = StreamCoordinator::new(link, 1 << 20);
        let mut exec = Executor::mtc(Box::new(coordinator), config);
        exec.state = ExecutorState::MtcIdle;
        for _ in 0..100 {
            exec.snapshot(false).unwrap();
            if exec.state() == ExecutorState::MtcControlpart {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(exec.state(), ExecutorState::MtcControlpart);
        assert!(exec.coordinator.has_buffered());

        // The socket has nothing new; the held-back message is handled
        // without waiting for the snapshot timeout.
        exec.pending_work = None;
        let started = Instant::now();
        exec.snapshot(true).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(exec.state(), ExecutorState::MtcExit);
    }

    #[test]
    fn queued_work_holds_back_later_messages() {
        let mut coordinator = ScriptedCoordinator::new();
        coordinator.push(Incoming::ExecuteControl {
            module: "M".into(),
        });
        coordinator.push(Incoming::ExitMtc);
        let mut exec = Executor::mtc(Box::new(coordinator), TcxConfig::default());
        exec.state = ExecutorState::MtcIdle;
        exec.snapshot(false).unwrap();
        assert_eq!(exec.state(), ExecutorState::MtcControlpart);
        exec.pending_work = None;
        exec.snapshot(false).unwrap();
        assert_eq!(exec.state(), ExecutorState::MtcExit);
    }
}
