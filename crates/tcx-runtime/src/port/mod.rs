//! Test ports.
//!
//! A [`Port`] is a named endpoint of a test component. It can be
//! connected to ports of other components, mapped to ports of the
//! system under test, and queues what arrives while it is started.
//!
//! # Port state
//!
//! ```text
//!            start                halt
//!  Stopped ─────────► Started ──────────► Halted
//!     ▲                  │                  │
//!     └──── stop ────────┴────── stop ──────┘
//! ```
//!
//! | State | Inbound items | Queue |
//! |-------|---------------|-------|
//! | Started | queued | readable |
//! | Halted | discarded | kept until stop/start |
//! | Stopped | discarded | cleared |
//!
//! # Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | `queue` | [`PortQueue`], [`QueuedItem`] |
//! | `behaviour` | [`PortBehaviour`] hooks and [`QueueingBehaviour`] |
//! | `set` | [`PortSet`]: the component's ports and `any`/`all` fan-out |
//! | `link` | Connection protocol, sending, mapping, deactivation |

mod behaviour;
mod link;
mod queue;
mod set;

pub use behaviour::{
    PortBehaviour, QueueingBehaviour, ReceiveContext, ReceiveFilter, ReceiveOp, ReceiveOutcome,
};
pub use link::PortEnv;
pub use queue::{PortQueue, QueuedItem};
pub use set::PortSet;

use crate::connection::{MessageKind, PortConnection};
use crate::error::ExecutorError;
use bytes::Bytes;
use std::fmt;
use tcx_types::{ComponentRef, Readiness};
use tracing::{debug, info, warn};

/// A test port.
pub struct Port {
    name: String,
    active: bool,
    started: bool,
    halted: bool,
    connections: Vec<PortConnection>,
    mappings: Vec<String>,
    queue: PortQueue,
    behaviour: Box<dyn PortBehaviour>,
}

impl Port {
    /// Creates an inactive, stopped port.
    #[must_use]
    pub fn new(name: impl Into<String>, behaviour: impl PortBehaviour + 'static) -> Self {
        Self {
            name: name.into(),
            active: false,
            started: false,
            halted: false,
            connections: Vec::new(),
            mappings: Vec::new(),
            queue: PortQueue::new(),
            behaviour: Box::new(behaviour),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub fn connections(&self) -> &[PortConnection] {
        &self.connections
    }

    #[must_use]
    pub fn mappings(&self) -> &[String] {
        &self.mappings
    }

    #[must_use]
    pub fn queue(&self) -> &PortQueue {
        &self.queue
    }

    /// Marks the port active. Idempotent.
    pub fn activate(&mut self) {
        if !self.active {
            self.active = true;
            self.queue.clear();
            debug!(port = %self.name, "port activated");
        }
    }

    fn require_active(&self, operation: &str) -> Result<(), ExecutorError> {
        if self.active {
            Ok(())
        } else {
            Err(ExecutorError::internal(format!(
                "Inactive port {} cannot be {operation}.",
                self.name
            )))
        }
    }

    /// Starts the port.
    ///
    /// Starting a started port only clears its queue; starting a halted
    /// port discards what was kept.
    ///
    /// # Errors
    ///
    /// Internal error on an inactive port, or whatever `user_start`
    /// returns.
    pub fn start(&mut self) -> Result<(), ExecutorError> {
        self.require_active("started")?;
        if self.started {
            warn!(
                port = %self.name,
                "Performing start operation on port which is already started. The operation will clear the incoming queue."
            );
            self.queue.clear();
        } else {
            if self.halted {
                self.queue.clear();
                self.halted = false;
            }
            self.behaviour.user_start(&self.name)?;
            self.started = true;
        }
        info!(port = %self.name, "port started");
        Ok(())
    }

    /// Stops the port and drops its queue.
    ///
    /// # Errors
    ///
    /// Internal error on an inactive port, or whatever `user_stop`
    /// returns.
    pub fn stop(&mut self) -> Result<(), ExecutorError> {
        self.require_active("stopped")?;
        if self.started {
            self.started = false;
            self.halted = false;
            let result = self.behaviour.user_stop(&self.name);
            self.queue.clear();
            result?;
        } else if self.halted {
            self.halted = false;
            self.queue.clear();
        } else {
            warn!(
                port = %self.name,
                "Performing stop operation on port which is already stopped. The operation has no effect."
            );
        }
        info!(port = %self.name, "port stopped");
        Ok(())
    }

    /// Halts the port: nothing new is queued, the queue is kept.
    ///
    /// # Errors
    ///
    /// Internal error on an inactive port, or whatever `user_stop`
    /// returns.
    pub fn halt(&mut self) -> Result<(), ExecutorError> {
        self.require_active("halted")?;
        if self.started {
            self.started = false;
            self.halted = true;
            self.behaviour.user_stop(&self.name)?;
        } else if self.halted {
            warn!(
                port = %self.name,
                "Performing halt operation on port which is already halted. The operation has no effect."
            );
        } else {
            warn!(
                port = %self.name,
                "Performing halt operation on port which is already stopped. The operation has no effect."
            );
        }
        info!(port = %self.name, "port halted");
        Ok(())
    }

    /// Empties the queue.
    ///
    /// # Errors
    ///
    /// Internal error on an inactive port.
    pub fn clear(&mut self) -> Result<(), ExecutorError> {
        self.require_active("cleared")?;
        if !self.started && !self.halted {
            warn!(
                port = %self.name,
                "Performing clear operation on port which is already stopped. The operation has no effect."
            );
        }
        self.queue.clear();
        info!(port = %self.name, "port was cleared");
        Ok(())
    }

    /// Hands an item that arrived from `sender:remote_port` to the port.
    ///
    /// # Errors
    ///
    /// Test case error if the port type does not accept the item.
    pub fn deliver(
        &mut self,
        sender: ComponentRef,
        remote_port: &str,
        kind: MessageKind,
        type_name: &str,
        payload: Bytes,
    ) -> Result<(), ExecutorError> {
        if !self.behaviour.accepts(kind, type_name) {
            return Err(ExecutorError::test_case(format!(
                "Port {} does not support incoming {} {type_name}, which has arrived on the connection from {sender}:{remote_port}.",
                self.name,
                kind.describe(),
            )));
        }
        if self.started {
            debug!(port = %self.name, %sender, %kind, type_name, "item queued");
            self.queue
                .push(QueuedItem::new(sender, kind, type_name, payload));
        } else if self.halted {
            warn!(
                port = %self.name,
                %sender,
                type_name,
                "Incoming {} was discarded on halted port.",
                kind.describe()
            );
        } else {
            warn!(
                port = %self.name,
                %sender,
                type_name,
                "Incoming {} was discarded on stopped port.",
                kind.describe()
            );
        }
        Ok(())
    }

    /// Evaluates one receive-family operation through the behaviour.
    pub fn receive(&mut self, op: ReceiveOp, filter: &ReceiveFilter) -> ReceiveOutcome {
        self.behaviour.receive(ReceiveContext {
            port: &self.name,
            started: self.started,
            queue: &mut self.queue,
            op,
            filter,
        })
    }

    /// Peeks the procedure queue (call, then reply, then exception)
    /// before the message queue.
    ///
    /// A `Maybe` from an earlier procedure check means the procedure
    /// queue is empty, so the later procedure checks are skipped.
    pub fn check(&mut self, filter: &ReceiveFilter) -> ReceiveOutcome {
        let mut waiting = false;
        for op in [
            ReceiveOp::CheckGetcall,
            ReceiveOp::CheckGetreply,
            ReceiveOp::CheckCatch,
        ] {
            if waiting {
                break;
            }
            let outcome = self.receive(op, filter);
            match outcome.readiness {
                Readiness::Yes => return outcome,
                Readiness::Maybe => waiting = true,
                _ => {}
            }
        }
        let outcome = self.receive(ReceiveOp::CheckReceive, filter);
        if outcome.readiness == Readiness::Yes || !waiting {
            outcome
        } else {
            ReceiveOutcome::maybe()
        }
    }

    /// Evaluates `checkstate(kind)`.
    ///
    /// # Errors
    ///
    /// Test case error for an unknown state name.
    pub fn check_port_state(&self, kind: &str) -> Result<bool, ExecutorError> {
        let linked = !self.connections.is_empty();
        let mapped = !self.mappings.is_empty();
        match kind {
            "Started" => Ok(self.started),
            "Halted" => Ok(self.halted),
            "Stopped" => Ok(!self.started && !self.halted),
            "Connected" => Ok(linked),
            "Mapped" => Ok(mapped),
            "Linked" => Ok(linked || mapped),
            other => Err(ExecutorError::test_case(format!(
                "{other} is not an allowed parameter of checkstate()."
            ))),
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("started", &self.started)
            .field("halted", &self.halted)
            .field("connections", &self.connections)
            .field("mappings", &self.mappings)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Hooks {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl PortBehaviour for Hooks {
        fn accepts(&self, kind: MessageKind, type_name: &str) -> bool {
            kind == MessageKind::Message && type_name == "T"
        }

        fn user_start(&mut self, _port: &str) -> Result<(), ExecutorError> {
            self.calls.lock().push("start");
            Ok(())
        }

        fn user_stop(&mut self, _port: &str) -> Result<(), ExecutorError> {
            self.calls.lock().push("stop");
            Ok(())
        }

        fn receive(&mut self, ctx: ReceiveContext<'_>) -> ReceiveOutcome {
            QueueingBehaviour::new().with_message("T").receive(ctx)
        }
    }

    fn active_port() -> (Port, Arc<Mutex<Vec<&'static str>>>) {
        let hooks = Hooks::default();
        let calls = Arc::clone(&hooks.calls);
        let mut port = Port::new("p", hooks);
        port.activate();
        (port, calls)
    }

    fn deliver_t(port: &mut Port) {
        port.deliver(ComponentRef::new(3), "q", MessageKind::Message, "T", Bytes::new())
            .unwrap();
    }

    #[test]
    fn inactive_port_rejects_lifecycle() {
        let mut port = Port::new("p", QueueingBehaviour::new());
        assert!(matches!(port.start(), Err(ExecutorError::Internal(_))));
        assert!(matches!(port.clear(), Err(ExecutorError::Internal(_))));
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut port, calls) = active_port();
        port.start().unwrap();
        deliver_t(&mut port);

        port.stop().unwrap();
        assert!(port.queue().is_empty());
        port.stop().unwrap();
        port.stop().unwrap();

        assert!(!port.is_started());
        assert!(!port.is_halted());
        assert_eq!(*calls.lock(), vec!["start", "stop"]);
    }

    #[test]
    fn halt_keeps_queue_and_discards_new_items() {
        let (mut port, _) = active_port();
        port.start().unwrap();
        deliver_t(&mut port);
        port.halt().unwrap();
        deliver_t(&mut port);

        assert!(port.is_halted());
        assert_eq!(port.queue().len(), 1);

        let outcome = port.receive(ReceiveOp::Receive, &ReceiveFilter::any());
        assert_eq!(outcome.readiness, Readiness::Yes);
    }

    #[test]
    fn restart_clears_queue() {
        let (mut port, calls) = active_port();
        port.start().unwrap();
        deliver_t(&mut port);
        port.start().unwrap();
        assert!(port.queue().is_empty());
        assert_eq!(*calls.lock(), vec!["start"]);
    }

    #[test]
    fn stopped_port_discards() {
        let (mut port, _) = active_port();
        deliver_t(&mut port);
        assert!(port.queue().is_empty());
    }

    #[test]
    fn unsupported_type_is_test_case_error() {
        let (mut port, _) = active_port();
        port.start().unwrap();
        let err = port
            .deliver(ComponentRef::new(3), "q", MessageKind::Message, "U", Bytes::new())
            .unwrap_err();
        assert!(matches!(err, ExecutorError::TestCase(_)));
        assert!(err
            .to_string()
            .starts_with("Port p does not support incoming message type U"));
    }

    #[test]
    fn check_port_state_kinds() {
        let (mut port, _) = active_port();
        assert!(port.check_port_state("Stopped").unwrap());
        assert!(!port.check_port_state("Linked").unwrap());
        port.start().unwrap();
        assert!(port.check_port_state("Started").unwrap());
        assert!(!port.check_port_state("Mapped").unwrap());
        assert!(matches!(
            port.check_port_state("Running"),
            Err(ExecutorError::TestCase(_))
        ));
    }

    #[test]
    fn check_falls_through_to_message_queue() {
        let (mut port, _) = active_port();
        port.start().unwrap();
        deliver_t(&mut port);
        let outcome = port.check(&ReceiveFilter::any());
        assert_eq!(outcome.readiness, Readiness::Yes);
        assert_eq!(port.queue().len(), 1);
    }
}
