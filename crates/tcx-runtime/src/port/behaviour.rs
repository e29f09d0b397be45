//! Per-port-type behaviour.
//!
//! A [`PortBehaviour`] is what a concrete port type plugs into the
//! generic [`Port`](super::Port): which incoming types it accepts, how
//! it talks to the system under test, and how receive operations match
//! against its queue.
//!
//! # Hooks
//!
//! | Method | Called by | Default |
//! |--------|-----------|---------|
//! | `accepts` | inbound delivery | rejects everything |
//! | `user_map` / `user_unmap` | `map` / `unmap` | no-op |
//! | `user_start` / `user_stop` | `start` / `stop` / `halt` | no-op |
//! | `outgoing_send` | `send` to `SYSTEM` | test case error |
//! | `receive` | the receive family | "no incoming types" |
//!
//! [`QueueingBehaviour`] is a ready-made message/procedure port that
//! accepts a fixed set of type names and matches on the queue head.

use super::queue::{PortQueue, QueuedItem};
use crate::connection::MessageKind;
use crate::error::ExecutorError;
use std::collections::HashSet;
use tcx_types::{ComponentRef, Readiness};
use tracing::debug;

/// Receive-family operation being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiveOp {
    Receive,
    CheckReceive,
    Trigger,
    Getcall,
    CheckGetcall,
    Getreply,
    CheckGetreply,
    Catch,
    CheckCatch,
}

impl ReceiveOp {
    /// Kind of queue item the operation looks for.
    #[must_use]
    pub const fn kind(self) -> MessageKind {
        match self {
            Self::Receive | Self::CheckReceive | Self::Trigger => MessageKind::Message,
            Self::Getcall | Self::CheckGetcall => MessageKind::Call,
            Self::Getreply | Self::CheckGetreply => MessageKind::Reply,
            Self::Catch | Self::CheckCatch => MessageKind::Exception,
        }
    }

    /// Returns `false` for the `check_*` variants, which only peek.
    #[must_use]
    pub const fn consumes(self) -> bool {
        !matches!(
            self,
            Self::CheckReceive | Self::CheckGetcall | Self::CheckGetreply | Self::CheckCatch
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::CheckReceive => "check-receive",
            Self::Trigger => "trigger",
            Self::Getcall => "getcall",
            Self::CheckGetcall => "check-getcall",
            Self::Getreply => "getreply",
            Self::CheckGetreply => "check-getreply",
            Self::Catch => "catch",
            Self::CheckCatch => "check-catch",
        }
    }
}

/// Constraints on the item a receive operation may take.
///
/// `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveFilter {
    pub sender: Option<ComponentRef>,
    pub type_name: Option<String>,
}

impl ReceiveFilter {
    /// Matches any item.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_sender(mut self, sender: ComponentRef) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn of_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    #[must_use]
    pub fn matches(&self, item: &QueuedItem) -> bool {
        self.sender.map_or(true, |s| s == item.sender)
            && self
                .type_name
                .as_deref()
                .map_or(true, |t| t == item.type_name)
    }
}

/// Everything a behaviour needs to evaluate one receive operation.
#[derive(Debug)]
pub struct ReceiveContext<'a> {
    pub port: &'a str,
    pub started: bool,
    pub queue: &'a mut PortQueue,
    pub op: ReceiveOp,
    pub filter: &'a ReceiveFilter,
}

/// Result of a receive operation, with the matched item if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub readiness: Readiness,
    pub item: Option<QueuedItem>,
}

impl ReceiveOutcome {
    #[must_use]
    pub fn no() -> Self {
        Self::bare(Readiness::No)
    }

    #[must_use]
    pub fn maybe() -> Self {
        Self::bare(Readiness::Maybe)
    }

    #[must_use]
    pub fn repeat() -> Self {
        Self::bare(Readiness::Repeat)
    }

    #[must_use]
    pub fn matched(item: QueuedItem) -> Self {
        Self {
            readiness: Readiness::Yes,
            item: Some(item),
        }
    }

    fn bare(readiness: Readiness) -> Self {
        Self {
            readiness,
            item: None,
        }
    }
}

/// Extension point implemented per port type.
///
/// Every method has a default, so a behaviour only overrides what its
/// port type supports.
pub trait PortBehaviour {
    /// Returns `true` if an incoming item of this kind and type can be
    /// queued on the port.
    fn accepts(&self, kind: MessageKind, type_name: &str) -> bool {
        let _ = (kind, type_name);
        false
    }

    /// Called before a mapping is recorded.
    ///
    /// # Errors
    ///
    /// An error aborts the map operation.
    fn user_map(&mut self, port: &str, system_port: &str) -> Result<(), ExecutorError> {
        let _ = (port, system_port);
        Ok(())
    }

    /// Called after a mapping was removed.
    ///
    /// # Errors
    ///
    /// Propagated to the unmap caller; the mapping stays removed.
    fn user_unmap(&mut self, port: &str, system_port: &str) -> Result<(), ExecutorError> {
        let _ = (port, system_port);
        Ok(())
    }

    /// # Errors
    ///
    /// An error leaves the port stopped.
    fn user_start(&mut self, port: &str) -> Result<(), ExecutorError> {
        let _ = port;
        Ok(())
    }

    /// # Errors
    ///
    /// Propagated to the stop or halt caller.
    fn user_stop(&mut self, port: &str) -> Result<(), ExecutorError> {
        let _ = port;
        Ok(())
    }

    /// Sends an item to the system under test.
    ///
    /// # Errors
    ///
    /// The default rejects the send as a test case error.
    fn outgoing_send(
        &mut self,
        port: &str,
        kind: MessageKind,
        type_name: &str,
        payload: &[u8],
    ) -> Result<(), ExecutorError> {
        let _ = payload;
        Err(ExecutorError::test_case(format!(
            "Port {port} cannot send {} {type_name} to the system.",
            kind.describe()
        )))
    }

    /// Evaluates one receive-family operation.
    fn receive(&mut self, ctx: ReceiveContext<'_>) -> ReceiveOutcome {
        debug!(
            port = ctx.port,
            operation = ctx.op.as_str(),
            "matching problem: port has no incoming types or signatures"
        );
        ReceiveOutcome::no()
    }
}

/// Queues every accepted type and matches receive operations against
/// the head of the queue.
#[derive(Debug, Clone, Default)]
pub struct QueueingBehaviour {
    messages: HashSet<String>,
    signatures: HashSet<String>,
}

impl QueueingBehaviour {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts incoming messages of `type_name`.
    #[must_use]
    pub fn with_message(mut self, type_name: impl Into<String>) -> Self {
        self.messages.insert(type_name.into());
        self
    }

    /// Accepts calls, replies and exceptions of `signature`.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signatures.insert(signature.into());
        self
    }

    fn has_incoming(&self, kind: MessageKind) -> bool {
        match kind {
            MessageKind::Message => !self.messages.is_empty(),
            _ => !self.signatures.is_empty(),
        }
    }
}

impl PortBehaviour for QueueingBehaviour {
    fn accepts(&self, kind: MessageKind, type_name: &str) -> bool {
        match kind {
            MessageKind::Message => self.messages.contains(type_name),
            _ => self.signatures.contains(type_name),
        }
    }

    fn receive(&mut self, ctx: ReceiveContext<'_>) -> ReceiveOutcome {
        let wanted = ctx.op.kind();
        if !self.has_incoming(wanted) {
            debug!(
                port = ctx.port,
                operation = ctx.op.as_str(),
                "matching problem: port has no incoming types or signatures"
            );
            return ReceiveOutcome::no();
        }

        let Some(head) = ctx.queue.front(wanted) else {
            if ctx.started {
                return ReceiveOutcome::maybe();
            }
            debug!(
                port = ctx.port,
                operation = ctx.op.as_str(),
                "matching problem: port is not started and its queue is empty"
            );
            return ReceiveOutcome::no();
        };

        let matched = head.kind == wanted && ctx.filter.matches(head);
        if matched {
            let item = if ctx.op.consumes() {
                ctx.queue.pop(wanted)
            } else {
                Some(head.clone())
            };
            return item.map_or_else(ReceiveOutcome::no, ReceiveOutcome::matched);
        }

        if ctx.op == ReceiveOp::Trigger {
            // A non-matching head is dropped and the alternative re-evaluated.
            ctx.queue.pop(wanted);
            return ReceiveOutcome::repeat();
        }
        ReceiveOutcome::no()
    }
}
