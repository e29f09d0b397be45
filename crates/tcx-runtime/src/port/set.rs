//! The ports of one test component.

use super::behaviour::{ReceiveFilter, ReceiveOp, ReceiveOutcome};
use super::Port;
use crate::error::ExecutorError;
use tcx_types::Readiness;
use tracing::warn;

/// Ports owned by the current component, in creation order.
///
/// Name lookups used by the connection protocol only see active ports.
/// The `all_*` and `any_*` operations iterate over active ports.
#[derive(Debug, Default)]
pub struct PortSet {
    ports: Vec<Port>,
}

impl PortSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `port` and activates it.
    ///
    /// An inactive port of the same name is replaced.
    ///
    /// # Errors
    ///
    /// Internal error if an active port already has that name.
    pub fn add(&mut self, mut port: Port) -> Result<(), ExecutorError> {
        if let Some(existing) = self.ports.iter().position(|p| p.name == port.name) {
            if self.ports[existing].active {
                return Err(ExecutorError::internal(format!(
                    "Port {} is already active.",
                    port.name
                )));
            }
            self.ports.remove(existing);
        }
        port.activate();
        self.ports.push(port);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Active port named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.active && p.name == name)
    }

    /// Active port named `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.active && p.name == name)
    }

    pub(super) fn index_of(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.active && p.name == name)
    }

    pub(super) fn port_at(&mut self, index: usize) -> &mut Port {
        &mut self.ports[index]
    }

    pub(super) fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub(super) fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.ports
    }

    fn active_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.ports.iter_mut().filter(|p| p.active)
    }

    fn has_active(&self) -> bool {
        self.ports.iter().any(|p| p.active)
    }

    /// Fetches an active port for a user-level operation.
    ///
    /// # Errors
    ///
    /// Test case error if there is no such port.
    pub fn require(&mut self, name: &str) -> Result<&mut Port, ExecutorError> {
        self.get_mut(name)
            .ok_or_else(|| ExecutorError::test_case(format!("Port {name} does not exist.")))
    }

    /// # Errors
    ///
    /// The first error of an individual `start`.
    pub fn all_start(&mut self) -> Result<(), ExecutorError> {
        self.active_mut().try_for_each(Port::start)
    }

    /// # Errors
    ///
    /// The first error of an individual `stop`.
    pub fn all_stop(&mut self) -> Result<(), ExecutorError> {
        self.active_mut().try_for_each(Port::stop)
    }

    /// # Errors
    ///
    /// The first error of an individual `halt`.
    pub fn all_halt(&mut self) -> Result<(), ExecutorError> {
        self.active_mut().try_for_each(Port::halt)
    }

    /// # Errors
    ///
    /// The first error of an individual `clear`.
    pub fn all_clear(&mut self) -> Result<(), ExecutorError> {
        self.active_mut().try_for_each(Port::clear)
    }

    /// `any port.<op>`: `Yes` (or `Repeat`) from the first port that
    /// has one, otherwise `Maybe` if any port may still match.
    ///
    /// # Errors
    ///
    /// Internal error if the operation returns `Repeat` where only
    /// `trigger` may.
    pub fn any_receive(
        &mut self,
        op: ReceiveOp,
        filter: &ReceiveFilter,
    ) -> Result<ReceiveOutcome, ExecutorError> {
        self.fan_out(op.as_str(), |port| port.receive(op, filter), op == ReceiveOp::Trigger)
    }

    /// `any port.check`.
    ///
    /// # Errors
    ///
    /// Internal error if a port returns `Repeat`.
    pub fn any_check(&mut self, filter: &ReceiveFilter) -> Result<ReceiveOutcome, ExecutorError> {
        self.fan_out("check", |port| port.check(filter), false)
    }

    fn fan_out(
        &mut self,
        operation: &str,
        mut eval: impl FnMut(&mut Port) -> ReceiveOutcome,
        repeat_allowed: bool,
    ) -> Result<ReceiveOutcome, ExecutorError> {
        if !self.has_active() {
            warn!(
                operation,
                "Matching problem: `any port.{operation}' operation in a component that has no ports."
            );
            return Ok(ReceiveOutcome::no());
        }
        let mut result = ReceiveOutcome::no();
        for port in self.active_mut() {
            let outcome = eval(port);
            match outcome.readiness {
                Readiness::Yes => return Ok(outcome),
                Readiness::Repeat if repeat_allowed => return Ok(outcome),
                Readiness::Repeat => {
                    return Err(ExecutorError::internal(format!(
                        "{operation} operation returned unexpected status code on port {} while evaluating `any port.{operation}'.",
                        port.name
                    )))
                }
                Readiness::Maybe => result = ReceiveOutcome::maybe(),
                Readiness::No => {}
            }
        }
        Ok(result)
    }

    /// `any port.checkstate(kind)`.
    ///
    /// # Errors
    ///
    /// Test case error for an unknown state name.
    pub fn any_check_port_state(&self, kind: &str) -> Result<bool, ExecutorError> {
        for port in self.ports.iter().filter(|p| p.active) {
            if port.check_port_state(kind)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `all port.checkstate(kind)`.
    ///
    /// # Errors
    ///
    /// Test case error for an unknown state name.
    pub fn all_check_port_state(&self, kind: &str) -> Result<bool, ExecutorError> {
        for port in self.ports.iter().filter(|p| p.active) {
            if !port.check_port_state(kind)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MessageKind;
    use crate::port::QueueingBehaviour;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tcx_types::ComponentRef;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn set_with(names: &[&str]) -> PortSet {
        let mut set = PortSet::new();
        for name in names {
            set.add(Port::new(*name, QueueingBehaviour::new().with_message("T")))
                .unwrap();
        }
        set
    }

    #[test]
    fn duplicate_active_name_is_rejected() {
        let mut set = set_with(&["p"]);
        let err = set
            .add(Port::new("p", QueueingBehaviour::new()))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Internal(_)));
    }

    /// Keeps the level and rendering of every event.
    struct EventRecorder {
        events: Arc<Mutex<Vec<(Level, String)>>>,
    }

    impl<S: Subscriber> Layer<S> for EventRecorder {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            self.events
                .lock()
                .push((*event.metadata().level(), format!("{event:?}")));
        }
    }

    #[test]
    fn no_ports_means_no() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(EventRecorder {
            events: Arc::clone(&events),
        });

        let mut set = PortSet::new();
        let outcome = tracing::subscriber::with_default(subscriber, || {
            set.any_receive(ReceiveOp::Receive, &ReceiveFilter::any())
                .unwrap()
        });
        assert_eq!(outcome.readiness, Readiness::No);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, Level::WARN);
        assert!(events[0].1.contains("any port.receive"), "{}", events[0].1);
    }

    #[test]
    fn any_receive_prefers_yes_then_maybe() {
        let mut set = set_with(&["a", "b"]);
        set.all_start().unwrap();
        let any = ReceiveFilter::any();
        assert_eq!(
            set.any_receive(ReceiveOp::Receive, &any).unwrap().readiness,
            Readiness::Maybe
        );

        set.get_mut("b")
            .unwrap()
            .deliver(ComponentRef::new(3), "x", MessageKind::Message, "T", Bytes::new())
            .unwrap();
        let outcome = set.any_receive(ReceiveOp::Receive, &any).unwrap();
        assert_eq!(outcome.readiness, Readiness::Yes);
        assert_eq!(outcome.item.unwrap().sender, ComponentRef::new(3));
    }

    #[test]
    fn any_and_all_check_port_state() {
        let mut set = set_with(&["a", "b"]);
        set.require("a").unwrap().start().unwrap();
        assert!(set.any_check_port_state("Started").unwrap());
        assert!(!set.all_check_port_state("Started").unwrap());
        set.all_start().unwrap();
        assert!(set.all_check_port_state("Started").unwrap());
        assert!(set.any_check_port_state("Bogus").is_err());
    }

    #[test]
    fn all_stop_is_idempotent() {
        let mut set = set_with(&["a", "b"]);
        set.all_start().unwrap();
        set.all_stop().unwrap();
        set.all_stop().unwrap();
        assert!(set.all_check_port_state("Stopped").unwrap());
    }

    #[test]
    fn require_unknown_port_is_test_case_error() {
        let mut set = PortSet::new();
        assert!(matches!(
            set.require("nope"),
            Err(ExecutorError::TestCase(_))
        ));
    }
}
