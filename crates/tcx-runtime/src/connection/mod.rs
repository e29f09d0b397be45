//! Port connections: one directed edge from a local port to a remote
//! port.
//!
//! # Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | `frame` | Length-prefixed wire framing |
//! | `state` | [`ConnectionState`] and its legal transitions |
//! | `transport` | TCP / UNIX stream sockets, listeners, pathname hashing |
//!
//! The protocol that drives connections (listen, connect, accept,
//! termination handshake, backpressure) lives with the ports that own
//! them, in [`crate::port`].

mod frame;
mod state;
mod transport;

pub use frame::{Frame, FrameDecoder, FrameError, MessageKind};
pub use state::ConnectionState;
pub use transport::{
    connection_hash, unix_socket_path, wait_writable, ListenError, StreamChannel, StreamListener,
};

use crate::error::ExecutorError;
use bytes::BytesMut;
use std::fmt;
use std::os::fd::{AsFd, BorrowedFd};
use tcx_types::{ComponentRef, TransportKind};

/// What a connection is backed by.
#[derive(Debug)]
pub enum Endpoint {
    /// Peer port in the same process.
    Local,
    /// Waiting for the peer to dial in.
    Listening(StreamListener),
    /// Established socket plus its reassembly buffer.
    Stream {
        channel: StreamChannel,
        inbound: BytesMut,
    },
}

/// One outgoing connection of a port.
#[derive(Debug)]
pub struct PortConnection {
    remote_component: ComponentRef,
    remote_port: String,
    transport: TransportKind,
    state: ConnectionState,
    endpoint: Endpoint,
}

impl PortConnection {
    /// A same-process connection; starts out connected.
    #[must_use]
    pub fn local(remote_component: ComponentRef, remote_port: impl Into<String>) -> Self {
        Self {
            remote_component,
            remote_port: remote_port.into(),
            transport: TransportKind::Local,
            state: ConnectionState::Connected,
            endpoint: Endpoint::Local,
        }
    }

    /// The server side of a stream connection, waiting for `accept`.
    #[must_use]
    pub fn listening(
        remote_component: ComponentRef,
        remote_port: impl Into<String>,
        transport: TransportKind,
        listener: StreamListener,
    ) -> Self {
        Self {
            remote_component,
            remote_port: remote_port.into(),
            transport,
            state: ConnectionState::Listening,
            endpoint: Endpoint::Listening(listener),
        }
    }

    /// The client side of a stream connection; starts out connected.
    #[must_use]
    pub fn stream(
        remote_component: ComponentRef,
        remote_port: impl Into<String>,
        channel: StreamChannel,
    ) -> Self {
        Self {
            remote_component,
            remote_port: remote_port.into(),
            transport: channel.transport(),
            state: ConnectionState::Connected,
            endpoint: Endpoint::Stream {
                channel,
                inbound: BytesMut::new(),
            },
        }
    }

    #[must_use]
    pub fn remote_component(&self) -> ComponentRef {
        self.remote_component
    }

    #[must_use]
    pub fn remote_port(&self) -> &str {
        &self.remote_port
    }

    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::Internal`] for a transition the state machine
    /// does not allow.
    pub fn transition(&mut self, next: ConnectionState) -> Result<(), ExecutorError> {
        if !self.state.can_transition_to(next) {
            return Err(ExecutorError::internal(format!(
                "connection to {}:{} cannot move from state {} to {}",
                self.remote_component, self.remote_port, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Replaces the listener with the accepted channel.
    ///
    /// The listener is closed and its UNIX pathname unlinked.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::Internal`] if the connection is not listening.
    pub fn promote(&mut self, channel: StreamChannel) -> Result<(), ExecutorError> {
        self.transition(ConnectionState::Connected)?;
        let previous = std::mem::replace(
            &mut self.endpoint,
            Endpoint::Stream {
                channel,
                inbound: BytesMut::new(),
            },
        );
        if let Endpoint::Listening(listener) = previous {
            listener.unlink();
        }
        Ok(())
    }

    /// Returns `true` if this connection points at `component:port`.
    #[must_use]
    pub fn points_to(&self, component: ComponentRef, port: &str) -> bool {
        self.remote_component == component && self.remote_port == port
    }

    /// Descriptor to watch, if any.
    #[must_use]
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        match &self.endpoint {
            Endpoint::Local => None,
            Endpoint::Listening(listener) => Some(listener.as_fd()),
            Endpoint::Stream { channel, .. } => Some(channel.as_fd()),
        }
    }

    /// Bytes of an incomplete frame still in the reassembly buffer.
    #[must_use]
    pub fn pending_fragment(&self) -> &[u8] {
        match &self.endpoint {
            Endpoint::Stream { inbound, .. } => &inbound[..],
            _ => &[],
        }
    }

    /// Releases OS resources; a listening UNIX socket also loses its
    /// pathname.
    pub fn close(self) {
        if let Endpoint::Listening(listener) = &self.endpoint {
            listener.unlink();
        }
    }
}

/// Identifies a connection within one process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub local_port: String,
    pub remote_component: ComponentRef,
    pub remote_port: String,
}

impl ConnectionKey {
    #[must_use]
    pub fn new(
        local_port: impl Into<String>,
        remote_component: ComponentRef,
        remote_port: impl Into<String>,
    ) -> Self {
        Self {
            local_port: local_port.into(),
            remote_component,
            remote_port: remote_port.into(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{}",
            self.local_port, self.remote_component, self.remote_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_connection_is_connected() {
        let conn = PortConnection::local(ComponentRef::MTC, "peer");
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.transport(), TransportKind::Local);
        assert!(conn.fd().is_none());
        assert!(conn.points_to(ComponentRef::MTC, "peer"));
    }

    #[test]
    fn illegal_transition_is_internal_error() {
        let mut conn = PortConnection::local(ComponentRef::MTC, "peer");
        conn.transition(ConnectionState::LastMessageSent).unwrap();
        let err = conn
            .transition(ConnectionState::LastMessageReceived)
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Internal(_)));
        assert_eq!(conn.state(), ConnectionState::LastMessageSent);
    }

    #[test]
    fn promote_replaces_listener() {
        let dir = tempfile::TempDir::new().unwrap();
        let listener = StreamListener::bind_unix(dir.path(), "t-", 1, 1).unwrap();
        let address = listener.address().unwrap();
        let mut conn = PortConnection::listening(
            ComponentRef::new(3),
            "q",
            TransportKind::UnixStream,
            listener,
        );
        let _client = StreamChannel::connect(&address).unwrap();
        let accepted = match conn.endpoint() {
            Endpoint::Listening(l) => l.accept().unwrap(),
            _ => unreachable!(),
        };
        conn.promote(accepted).unwrap();

        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(matches!(conn.endpoint(), Endpoint::Stream { .. }));
        if let tcx_event::StreamAddress::Unix(path) = address {
            assert!(!path.exists());
        }
    }
}
