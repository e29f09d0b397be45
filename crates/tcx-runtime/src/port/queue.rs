//! Inbound queue of a port.
//!
//! Message-based items (`MESSAGE`) and procedure-based items (`CALL`,
//! `REPLY`, `EXCEPTION`) wait in two separate FIFO queues, so a pending
//! call never hides a message from `receive` and vice versa.

use crate::connection::MessageKind;
use bytes::Bytes;
use std::collections::VecDeque;
use tcx_types::ComponentRef;

/// One received item waiting to be taken by a receive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub sender: ComponentRef,
    pub kind: MessageKind,
    pub type_name: String,
    pub payload: Bytes,
}

impl QueuedItem {
    #[must_use]
    pub fn new(
        sender: ComponentRef,
        kind: MessageKind,
        type_name: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            sender,
            kind,
            type_name: type_name.into(),
            payload: payload.into(),
        }
    }

    /// Returns `true` for `CALL`, `REPLY` and `EXCEPTION` items.
    #[must_use]
    pub fn is_procedure(&self) -> bool {
        is_procedure(self.kind)
    }
}

fn is_procedure(kind: MessageKind) -> bool {
    !matches!(kind, MessageKind::Message)
}

#[derive(Debug, Default)]
pub struct PortQueue {
    messages: VecDeque<QueuedItem>,
    procedures: VecDeque<QueuedItem>,
}

impl PortQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: QueuedItem) {
        if item.is_procedure() {
            self.procedures.push_back(item);
        } else {
            self.messages.push_back(item);
        }
    }

    /// Head of the queue that items of `kind` are stored in.
    #[must_use]
    pub fn front(&self, kind: MessageKind) -> Option<&QueuedItem> {
        self.lane(kind).front()
    }

    /// Removes the head of the queue that items of `kind` are stored in.
    pub fn pop(&mut self, kind: MessageKind) -> Option<QueuedItem> {
        if is_procedure(kind) {
            self.procedures.pop_front()
        } else {
            self.messages.pop_front()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len() + self.procedures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.procedures.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.procedures.clear();
    }

    fn lane(&self, kind: MessageKind) -> &VecDeque<QueuedItem> {
        if is_procedure(kind) {
            &self.procedures
        } else {
            &self.messages
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: MessageKind, name: &str) -> QueuedItem {
        QueuedItem::new(ComponentRef::MTC, kind, name, Bytes::new())
    }

    #[test]
    fn lanes_are_independent() {
        let mut queue = PortQueue::new();
        queue.push(item(MessageKind::Call, "sig"));
        queue.push(item(MessageKind::Message, "T"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front(MessageKind::Message).unwrap().type_name, "T");
        assert_eq!(queue.front(MessageKind::Reply).unwrap().type_name, "sig");

        assert_eq!(queue.pop(MessageKind::Message).unwrap().type_name, "T");
        assert!(queue.front(MessageKind::Message).is_none());
        assert!(!queue.is_empty());
    }

    #[test]
    fn fifo_within_lane() {
        let mut queue = PortQueue::new();
        queue.push(item(MessageKind::Message, "a"));
        queue.push(item(MessageKind::Message, "b"));
        assert_eq!(queue.pop(MessageKind::Message).unwrap().type_name, "a");
        assert_eq!(queue.pop(MessageKind::Message).unwrap().type_name, "b");
        assert!(queue.pop(MessageKind::Message).is_none());
    }

    #[test]
    fn clear_empties_both_lanes() {
        let mut queue = PortQueue::new();
        queue.push(item(MessageKind::Message, "a"));
        queue.push(item(MessageKind::Exception, "e"));
        queue.clear();
        assert!(queue.is_empty());
    }
}
