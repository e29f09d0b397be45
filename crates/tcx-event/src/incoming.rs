//! Messages the coordinator sends to a test component or host controller.

use crate::error::EventError;
use crate::payload::{ComponentStatusReport, PtcVerdict, ReturnValue, StreamAddress};
use serde::{Deserialize, Serialize};
use tcx_types::{ComponentRef, QualifiedName, TransportKind};

/// Coordinator → component.
///
/// # Groups
///
/// | Group | Receiver | Variants |
/// |-------|----------|----------|
/// | Process control | HC | `CreateMtc`, `CreatePtc`, `KillProcess`, `ExitHc` |
/// | Replies | MTC, PTC | `CreateAck` … `UnmapAck` |
/// | Status push | MTC, PTC | `ComponentStatus`, `CancelDone` |
/// | Connection work | MTC, PTC | `ConnectListen`, `Connect`, `Disconnect`, `Map`, `Unmap` |
/// | Execution | PTC | `Start`, `Stop`, `Kill` |
/// | Execution | MTC | `ExecuteControl`, `ExecuteTestcase`, `PtcVerdict`, `Continue`, `ExitMtc`, `Stop` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Incoming {
    // === Host controller ===
    CreateMtc,
    CreatePtc {
        component: ComponentRef,
        component_type: QualifiedName,
        #[serde(default)]
        name: Option<String>,
        testcase: QualifiedName,
        alive: bool,
    },
    KillProcess { component: ComponentRef },
    ExitHc,

    // === Replies ===
    CreateAck { component: ComponentRef },
    StartAck,
    StopAck,
    KillAck,
    Running { answer: bool },
    Alive { answer: bool },
    DoneAck {
        answer: bool,
        #[serde(default)]
        return_value: Option<ReturnValue>,
    },
    KilledAck { answer: bool },
    ConnectAck,
    DisconnectAck,
    MapAck,
    UnmapAck,

    // === Status push ===
    ComponentStatus(ComponentStatusReport),
    CancelDone {
        component: ComponentRef,
        #[serde(default)]
        cancel_any: bool,
    },

    // === Connection work ===
    ConnectListen {
        local_port: String,
        remote_component: ComponentRef,
        #[serde(default)]
        remote_component_name: Option<String>,
        remote_port: String,
        transport: TransportKind,
    },
    Connect {
        local_port: String,
        remote_component: ComponentRef,
        #[serde(default)]
        remote_component_name: Option<String>,
        remote_port: String,
        transport: TransportKind,
        #[serde(default)]
        address: Option<StreamAddress>,
    },
    Disconnect {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
    },
    Map {
        local_port: String,
        system_port: String,
    },
    Unmap {
        local_port: String,
        system_port: String,
    },

    // === Execution ===
    ExecuteControl { module: String },
    ExecuteTestcase { testcase: QualifiedName },
    Start {
        function: QualifiedName,
        #[serde(default)]
        args: Vec<u8>,
    },
    Stop,
    Kill,
    PtcVerdict {
        verdicts: Vec<PtcVerdict>,
        continue_execution: bool,
    },
    Continue,
    ExitMtc,

    Error { message: String },
}

impl Incoming {
    /// Short snake_case name, used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateMtc => "create_mtc",
            Self::CreatePtc { .. } => "create_ptc",
            Self::KillProcess { .. } => "kill_process",
            Self::ExitHc => "exit_hc",
            Self::CreateAck { .. } => "create_ack",
            Self::StartAck => "start_ack",
            Self::StopAck => "stop_ack",
            Self::KillAck => "kill_ack",
            Self::Running { .. } => "running",
            Self::Alive { .. } => "alive",
            Self::DoneAck { .. } => "done_ack",
            Self::KilledAck { .. } => "killed_ack",
            Self::ConnectAck => "connect_ack",
            Self::DisconnectAck => "disconnect_ack",
            Self::MapAck => "map_ack",
            Self::UnmapAck => "unmap_ack",
            Self::ComponentStatus(_) => "component_status",
            Self::CancelDone { .. } => "cancel_done",
            Self::ConnectListen { .. } => "connect_listen",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Map { .. } => "map",
            Self::Unmap { .. } => "unmap",
            Self::ExecuteControl { .. } => "execute_control",
            Self::ExecuteTestcase { .. } => "execute_testcase",
            Self::Start { .. } => "start",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::PtcVerdict { .. } => "ptc_verdict",
            Self::Continue => "continue",
            Self::ExitMtc => "exit_mtc",
            Self::Error { .. } => "error",
        }
    }

    /// Checks the constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// - [`EventError::Malformed`] for a status report without flags, a
    ///   stream connect without an address, or empty port names.
    /// - [`EventError::UnexpectedTransport`] for a listen request on the
    ///   local transport.
    pub fn validate(&self) -> Result<(), EventError> {
        match self {
            Self::ComponentStatus(report) if report.is_empty() => Err(EventError::malformed(
                self.kind(),
                "neither the done nor the killed status is set",
            )),
            Self::ConnectListen {
                local_port,
                remote_port,
                transport,
                ..
            } => {
                if *transport == TransportKind::Local {
                    return Err(EventError::UnexpectedTransport {
                        kind: self.kind(),
                        transport: *transport,
                    });
                }
                require_port_names(self.kind(), local_port, remote_port)
            }
            Self::Connect {
                local_port,
                remote_port,
                transport,
                address,
                ..
            } => {
                if transport.is_stream() && address.is_none() {
                    return Err(EventError::malformed(
                        self.kind(),
                        format!("{transport} connection without a peer address"),
                    ));
                }
                require_port_names(self.kind(), local_port, remote_port)
            }
            Self::Disconnect {
                local_port,
                remote_port,
                ..
            } => require_port_names(self.kind(), local_port, remote_port),
            Self::Map {
                local_port,
                system_port,
            }
            | Self::Unmap {
                local_port,
                system_port,
            } => require_port_names(self.kind(), local_port, system_port),
            _ => Ok(()),
        }
    }
}

fn require_port_names(kind: &'static str, local: &str, remote: &str) -> Result<(), EventError> {
    if local.is_empty() || remote.is_empty() {
        return Err(EventError::malformed(kind, "empty port name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_done_ack_with_value() {
        let json = r#"{"type":"done_ack","answer":true,
            "return_value":{"type_name":"integer","payload":[1,2]}}"#;
        let msg: Incoming = serde_json::from_str(json).expect("decode");
        assert_eq!(
            msg,
            Incoming::DoneAck {
                answer: true,
                return_value: Some(ReturnValue::new("integer", vec![1, 2])),
            }
        );
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn empty_status_report_is_malformed() {
        let msg = Incoming::ComponentStatus(ComponentStatusReport {
            component: ComponentRef::new(4),
            ..ComponentStatusReport::default()
        });
        let err = msg.validate().expect_err("empty report");
        assert!(matches!(err, EventError::Malformed { .. }));
    }

    #[test]
    fn listen_on_local_transport_rejected() {
        let msg = Incoming::ConnectListen {
            local_port: "p".into(),
            remote_component: ComponentRef::new(3),
            remote_component_name: None,
            remote_port: "q".into(),
            transport: TransportKind::Local,
        };
        assert!(matches!(
            msg.validate(),
            Err(EventError::UnexpectedTransport { .. })
        ));
    }

    #[test]
    fn stream_connect_needs_address() {
        let msg = Incoming::Connect {
            local_port: "p".into(),
            remote_component: ComponentRef::new(3),
            remote_component_name: None,
            remote_port: "q".into(),
            transport: TransportKind::InetStream,
            address: None,
        };
        assert!(msg.validate().is_err());

        let local = Incoming::Connect {
            local_port: "p".into(),
            remote_component: ComponentRef::MTC,
            remote_component_name: None,
            remote_port: "q".into(),
            transport: TransportKind::Local,
            address: None,
        };
        assert!(local.validate().is_ok());
    }

    #[test]
    fn status_report_flattens_under_tag() {
        let json = r#"{"type":"component_status","component":6,"killed":true}"#;
        let msg: Incoming = serde_json::from_str(json).expect("decode");
        match msg {
            Incoming::ComponentStatus(report) => {
                assert!(report.killed);
                assert!(!report.done);
                assert_eq!(report.component, ComponentRef::new(6));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
