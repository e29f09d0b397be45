//! Messages a test component or host controller sends to the coordinator.

use crate::payload::{ReturnValue, StreamAddress};
use serde::{Deserialize, Serialize};
use tcx_types::{ComponentRef, QualifiedName, TransportKind, Verdict};

/// Component → coordinator.
///
/// Requests (`*Req`, `IsRunning`, `IsAlive`) are always followed by the
/// sender blocking for the matching [`Incoming`](crate::Incoming) reply;
/// everything else is a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outgoing {
    // === Process lifecycle ===
    /// Host controller is ready to create components.
    HcReady,
    /// A freshly forked MTC finished initialisation.
    MtcCreated,
    /// The MTC finished a control part or test case and is idle again.
    MtcReady,
    /// A freshly forked PTC finished initialisation.
    PtcCreated { component: ComponentRef },
    /// Process creation failed on the host controller.
    CreateNak {
        component: ComponentRef,
        reason: String,
    },

    // === Component operations ===
    CreateReq {
        component_type: QualifiedName,
        name: Option<String>,
        location: Option<String>,
        alive: bool,
    },
    StartReq {
        component: ComponentRef,
        function: QualifiedName,
        args: Vec<u8>,
    },
    StopReq { component: ComponentRef },
    KillReq { component: ComponentRef },
    IsRunning { component: ComponentRef },
    IsAlive { component: ComponentRef },
    DoneReq { component: ComponentRef },
    KilledReq { component: ComponentRef },
    CancelDoneAck { component: ComponentRef },

    // === Connections and mappings ===
    ConnectReq {
        src_component: ComponentRef,
        src_port: String,
        dst_component: ComponentRef,
        dst_port: String,
    },
    ConnectListenAck {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
        transport: TransportKind,
        address: StreamAddress,
    },
    Connected {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
    },
    ConnectError {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
        reason: String,
    },
    DisconnectReq {
        src_component: ComponentRef,
        src_port: String,
        dst_component: ComponentRef,
        dst_port: String,
    },
    Disconnected {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
    },
    MapReq {
        component: ComponentRef,
        port: String,
        system_port: String,
    },
    Mapped {
        local_port: String,
        system_port: String,
    },
    UnmapReq {
        component: ComponentRef,
        port: String,
        system_port: String,
    },
    Unmapped {
        local_port: String,
        system_port: String,
    },

    // === Termination and verdicts ===
    /// An alive PTC finished its behaviour function.
    Stopped { return_value: Option<ReturnValue> },
    /// A non-alive PTC finished its behaviour function and exits.
    StoppedKilled {
        verdict: Verdict,
        reason: String,
        return_value: Option<ReturnValue>,
    },
    /// An idle PTC was killed.
    Killed { verdict: Verdict, reason: String },
    TestcaseStarted {
        testcase: QualifiedName,
        mtc_type: QualifiedName,
        system_type: QualifiedName,
    },
    TestcaseFinished { verdict: Verdict, reason: String },

    /// A request from the coordinator could not be honoured.
    Error { message: String },
}

impl Outgoing {
    /// Short snake_case name, used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HcReady => "hc_ready",
            Self::MtcCreated => "mtc_created",
            Self::MtcReady => "mtc_ready",
            Self::PtcCreated { .. } => "ptc_created",
            Self::CreateNak { .. } => "create_nak",
            Self::CreateReq { .. } => "create_req",
            Self::StartReq { .. } => "start_req",
            Self::StopReq { .. } => "stop_req",
            Self::KillReq { .. } => "kill_req",
            Self::IsRunning { .. } => "is_running",
            Self::IsAlive { .. } => "is_alive",
            Self::DoneReq { .. } => "done_req",
            Self::KilledReq { .. } => "killed_req",
            Self::CancelDoneAck { .. } => "cancel_done_ack",
            Self::ConnectReq { .. } => "connect_req",
            Self::ConnectListenAck { .. } => "connect_listen_ack",
            Self::Connected { .. } => "connected",
            Self::ConnectError { .. } => "connect_error",
            Self::DisconnectReq { .. } => "disconnect_req",
            Self::Disconnected { .. } => "disconnected",
            Self::MapReq { .. } => "map_req",
            Self::Mapped { .. } => "mapped",
            Self::UnmapReq { .. } => "unmap_req",
            Self::Unmapped { .. } => "unmapped",
            Self::Stopped { .. } => "stopped",
            Self::StoppedKilled { .. } => "stopped_killed",
            Self::Killed { .. } => "killed",
            Self::TestcaseStarted { .. } => "testcase_started",
            Self::TestcaseFinished { .. } => "testcase_finished",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_representation() {
        let msg = Outgoing::DoneReq {
            component: ComponentRef::new(5),
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        assert_eq!(json, r#"{"type":"done_req","component":5}"#);
    }

    #[test]
    fn kind_matches_serde_tag() {
        let samples = [
            Outgoing::HcReady,
            Outgoing::Stopped { return_value: None },
            Outgoing::Connected {
                local_port: "p".into(),
                remote_component: ComponentRef::MTC,
                remote_port: "q".into(),
            },
            Outgoing::TestcaseFinished {
                verdict: Verdict::Pass,
                reason: String::new(),
            },
        ];
        for msg in samples {
            let value = serde_json::to_value(&msg).expect("serialize");
            assert_eq!(value["type"], msg.kind());
        }
    }
}
