//! Connect, disconnect, map, unmap and send.
//!
//! In parallel mode the executor only asks the coordinator; the
//! endpoints themselves act when `ConnectListen`/`Connect`/`Map`
//! arrive. In single mode both endpoints are ports of this process and
//! the work is done on the spot.

use super::state::Awaiting;
use super::{Executor, ExecutorState};
use crate::connection::MessageKind;
use crate::error::ExecutorError;
use bytes::Bytes;
use tcx_event::Outgoing;
use tcx_types::ComponentRef;

/// Which of the two operation arguments is being checked.
#[derive(Debug, Clone, Copy)]
enum Argument {
    First,
    Second,
}

impl Argument {
    fn ordinal(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
        }
    }
}

/// Checks one endpoint of connect or disconnect.
fn check_endpoint(
    operation: &str,
    argument: Argument,
    component: ComponentRef,
    port: &str,
) -> Result<(), ExecutorError> {
    let which = argument.ordinal();
    if port.is_empty() {
        return Err(ExecutorError::internal(format!(
            "The {which} argument of {operation} operation contains an empty string as port name."
        )));
    }
    match component {
        ComponentRef::NULL => Err(ExecutorError::test_case(format!(
            "The {which} argument of {operation} operation contains the null component reference."
        ))),
        ComponentRef::SYSTEM => Err(ExecutorError::test_case(format!(
            "The {which} argument of {operation} operation refers to a system port."
        ))),
        _ => Ok(()),
    }
}

/// Splits map/unmap arguments into the component side and the system
/// port.
fn split_mapping<'a>(
    operation: &str,
    src: (ComponentRef, &'a str),
    dst: (ComponentRef, &'a str),
) -> Result<(ComponentRef, &'a str, &'a str), ExecutorError> {
    for (argument, (component, port)) in [(Argument::First, src), (Argument::Second, dst)] {
        if port.is_empty() {
            return Err(ExecutorError::internal(format!(
                "The {} argument of {operation} operation contains an empty string as port name.",
                argument.ordinal()
            )));
        }
        if component == ComponentRef::NULL {
            return Err(ExecutorError::test_case(format!(
                "The {} argument of {operation} operation contains the null component reference.",
                argument.ordinal()
            )));
        }
    }
    match (src.0 == ComponentRef::SYSTEM, dst.0 == ComponentRef::SYSTEM) {
        (true, true) => Err(ExecutorError::test_case(format!(
            "Both arguments of {operation} operation refer to system ports."
        ))),
        (false, false) => Err(ExecutorError::test_case(format!(
            "Both arguments of {operation} operation refer to test component ports."
        ))),
        (true, false) => Ok((dst.0, dst.1, src.1)),
        (false, true) => Ok((src.0, src.1, dst.1)),
    }
}

impl Executor {
    /// `connect(src:sport, dst:dport)`.
    ///
    /// # Errors
    ///
    /// Test case errors for invalid endpoints or in the control part;
    /// whatever the local connection or the coordinator round trip
    /// fails with.
    pub fn connect_port(
        &mut self,
        src_component: ComponentRef,
        src_port: &str,
        dst_component: ComponentRef,
        dst_port: &str,
    ) -> Result<(), ExecutorError> {
        check_endpoint("connect", Argument::First, src_component, src_port)?;
        check_endpoint("connect", Argument::Second, dst_component, dst_port)?;
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(
                "Connect operation cannot be performed in the control part.",
            ));
        }
        if self.state == ExecutorState::SingleTestcase {
            if src_component != ComponentRef::MTC || dst_component != ComponentRef::MTC {
                return Err(ExecutorError::test_case(
                    "Both endpoints of connect operation must refer to ports of mtc in single mode.",
                ));
            }
            return self
                .ports
                .make_local_connection(self.self_ref, src_port, dst_port);
        }
        self.request(
            Awaiting::Connect,
            Outgoing::ConnectReq {
                src_component,
                src_port: src_port.to_owned(),
                dst_component,
                dst_port: dst_port.to_owned(),
            },
        )
    }

    /// `disconnect(src:sport, dst:dport)`.
    ///
    /// # Errors
    ///
    /// As for [`Executor::connect_port`].
    pub fn disconnect_port(
        &mut self,
        src_component: ComponentRef,
        src_port: &str,
        dst_component: ComponentRef,
        dst_port: &str,
    ) -> Result<(), ExecutorError> {
        check_endpoint("disconnect", Argument::First, src_component, src_port)?;
        check_endpoint("disconnect", Argument::Second, dst_component, dst_port)?;
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(
                "Disonnect operation cannot be performed in the control part.",
            ));
        }
        if self.state == ExecutorState::SingleTestcase {
            if src_component != ComponentRef::MTC || dst_component != ComponentRef::MTC {
                return Err(ExecutorError::test_case(
                    "Both endpoints of disconnect operation must refer to ports of mtc in single mode.",
                ));
            }
            return self
                .ports
                .terminate_local_connection(self.self_ref, src_port, dst_port);
        }
        self.request(
            Awaiting::Disconnect,
            Outgoing::DisconnectReq {
                src_component,
                src_port: src_port.to_owned(),
                dst_component,
                dst_port: dst_port.to_owned(),
            },
        )
    }

    /// `map(a:p, system:q)`; the arguments may come in either order.
    ///
    /// # Errors
    ///
    /// Test case errors unless exactly one side is a system port, in the
    /// control part, or for a non-MTC port in single mode.
    pub fn map_port(
        &mut self,
        src_component: ComponentRef,
        src_port: &str,
        dst_component: ComponentRef,
        dst_port: &str,
    ) -> Result<(), ExecutorError> {
        let (component, port, system_port) =
            split_mapping("map", (src_component, src_port), (dst_component, dst_port))?;
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(
                "Map operation cannot be performed in the control part.",
            ));
        }
        if self.state == ExecutorState::SingleTestcase {
            if component != ComponentRef::MTC {
                return Err(ExecutorError::test_case(
                    "Only the ports of mtc can be mapped in single mode.",
                ));
            }
            let (ports, mut env) = self.ports_and_env();
            return ports.map_port(&mut env, port, system_port);
        }
        self.request(
            Awaiting::Map,
            Outgoing::MapReq {
                component,
                port: port.to_owned(),
                system_port: system_port.to_owned(),
            },
        )
    }

    /// `unmap(a:p, system:q)`.
    ///
    /// # Errors
    ///
    /// As for [`Executor::map_port`].
    pub fn unmap_port(
        &mut self,
        src_component: ComponentRef,
        src_port: &str,
        dst_component: ComponentRef,
        dst_port: &str,
    ) -> Result<(), ExecutorError> {
        let (component, port, system_port) =
            split_mapping("unmap", (src_component, src_port), (dst_component, dst_port))?;
        if self.state.in_controlpart() {
            return Err(ExecutorError::test_case(
                "Unmap operation cannot be performed in the control part.",
            ));
        }
        if self.state == ExecutorState::SingleTestcase {
            if component != ComponentRef::MTC {
                return Err(ExecutorError::test_case(
                    "Only the ports of mtc can be unmapped in single mode.",
                ));
            }
            let (ports, mut env) = self.ports_and_env();
            return ports.unmap_port(&mut env, port, system_port);
        }
        self.request(
            Awaiting::Unmap,
            Outgoing::UnmapReq {
                component,
                port: port.to_owned(),
                system_port: system_port.to_owned(),
            },
        )
    }

    /// Sends `payload` on one of this component's ports.
    ///
    /// # Errors
    ///
    /// See [`crate::port::PortSet::send`].
    pub fn send(
        &mut self,
        port: &str,
        kind: MessageKind,
        type_name: &str,
        payload: Bytes,
        destination: Option<ComponentRef>,
    ) -> Result<(), ExecutorError> {
        let (ports, mut env) = self.ports_and_env();
        ports.send(&mut env, port, kind, type_name, payload, destination)
    }
}
