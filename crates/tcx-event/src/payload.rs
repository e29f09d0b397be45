//! Structured payloads shared by several messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use tcx_types::{ComponentRef, Verdict};

/// Address a listening port connection can be dialled at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "family", content = "addr", rename_all = "snake_case")]
pub enum StreamAddress {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for StreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Value returned by a behaviour function, tagged with its type name.
///
/// The payload encoding belongs to generated code; the engine only
/// compares type names and hands the bytes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnValue {
    pub type_name: String,
    pub payload: Vec<u8>,
}

impl ReturnValue {
    #[must_use]
    pub fn new(type_name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            type_name: type_name.into(),
            payload: payload.into(),
        }
    }
}

/// Final verdict of one PTC, forwarded to the MTC at test case end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtcVerdict {
    pub component: ComponentRef,
    #[serde(default)]
    pub name: Option<String>,
    pub verdict: Verdict,
    #[serde(default)]
    pub reason: String,
}

/// Status facts about one component or the any/all aggregates.
///
/// `component` is [`ComponentRef::NULL`] when the message only carries
/// aggregate flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatusReport {
    pub component: ComponentRef,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub killed: bool,
    #[serde(default)]
    pub any_done: bool,
    #[serde(default)]
    pub all_done: bool,
    #[serde(default)]
    pub any_killed: bool,
    #[serde(default)]
    pub all_killed: bool,
    #[serde(default)]
    pub return_value: Option<ReturnValue>,
}

impl ComponentStatusReport {
    /// Returns `true` when the report sets no flag at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.done
            || self.killed
            || self.any_done
            || self.all_done
            || self.any_killed
            || self.all_killed)
    }

    /// Returns `true` when an aggregate flag is set.
    #[must_use]
    pub fn has_aggregate(&self) -> bool {
        self.any_done || self.all_done || self.any_killed || self.all_killed
    }
}
