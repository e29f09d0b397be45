//! Port connection protocol.
//!
//! Everything here is driven either by a coordinator message
//! (`ConnectListen`, `Connect`, `Disconnect`, `Map`, `Unmap`), by a
//! readiness event on a connection socket, or by a user `send`.
//!
//! # Establishing a stream connection
//!
//! ```text
//!  server side                     MC                      client side
//!  ───────────                     ──                      ───────────
//!      ◄──── ConnectListen ──────  │
//!  bind + listen (Listening)       │
//!      ───── ConnectListenAck ───► │
//!                                  │ ───── Connect(addr) ────►
//!                                  │            dial (Connected)
//!  accept (Connected)  ◄───────────┼──────── TCP / UNIX ──────
//!      ───── Connected ──────────► │
//! ```
//!
//! # Terminating it
//!
//! ```text
//!  initiator                                          peer
//!  Connected ──── LAST ─────────────────────────────► Connected
//!  LastMessageSent                                    LastMessageReceived
//!             ◄───────────────────────────── LAST ────
//!  Idle (removed, socket closed)
//!                                     read() == 0 ──► Disconnected to MC,
//!                                                     Idle (removed)
//! ```

use super::{Port, PortSet};
use crate::config::ConnectionConfig;
use crate::connection::{
    connection_hash, ConnectionKey, ConnectionState, Endpoint, Frame, FrameDecoder, MessageKind,
    PortConnection, StreamChannel, StreamListener,
};
use crate::coordinator::Coordinator;
use crate::error::ExecutorError;
use bytes::{Bytes, BytesMut};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fmt::Write as _;
use std::io;
use std::net::IpAddr;
use std::os::fd::{AsFd, BorrowedFd};
use tcx_event::{Outgoing, StreamAddress};
use tcx_types::{ComponentRef, TransportKind};
use tracing::{debug, info, warn};

/// What port operations need from the executor that owns the ports.
pub struct PortEnv<'a> {
    pub coordinator: &'a mut dyn Coordinator,
    pub self_ref: ComponentRef,
    /// `false` in single mode, where nothing is reported to the
    /// coordinator.
    pub parallel: bool,
    pub config: &'a ConnectionConfig,
}

impl PortEnv<'_> {
    fn notify(&mut self, message: Outgoing) -> Result<(), ExecutorError> {
        self.coordinator.send(message)?;
        Ok(())
    }

    /// Notification sent during teardown, where the link may be down.
    fn notify_quietly(&mut self, message: Outgoing) {
        if let Err(e) = self.coordinator.send(message) {
            debug!(error = %e, "notification to coordinator dropped during teardown");
        }
    }

    fn connect_error(
        &mut self,
        local_port: &str,
        remote_component: ComponentRef,
        remote_port: &str,
        reason: String,
    ) -> Result<(), ExecutorError> {
        warn!(
            port = local_port,
            remote = %remote_component,
            remote_port,
            %reason,
            "connection could not be established"
        );
        self.notify(Outgoing::ConnectError {
            local_port: local_port.to_owned(),
            remote_component,
            remote_port: remote_port.to_owned(),
            reason,
        })
    }

    fn disconnected(&mut self, local_port: &str, remote_component: ComponentRef, remote_port: &str) {
        self.notify_quietly(Outgoing::Disconnected {
            local_port: local_port.to_owned(),
            remote_component,
            remote_port: remote_port.to_owned(),
        });
    }
}

fn transport_label(transport: TransportKind) -> &'static str {
    match transport {
        TransportKind::InetStream => "TCP",
        TransportKind::UnixStream => "UNIX",
        TransportKind::Local => "LOCAL",
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02X}");
        s
    })
}

// === Per-port protocol pieces ===

impl Port {
    fn connection_index(&self, remote: ComponentRef, remote_port: &str) -> Result<usize, usize> {
        self.connections
            .binary_search_by(|c| (c.remote_component(), c.remote_port()).cmp(&(remote, remote_port)))
    }

    fn lookup_connection(&self, remote: ComponentRef, remote_port: &str) -> Option<usize> {
        self.connection_index(remote, remote_port).ok()
    }

    fn insert_connection(&mut self, connection: PortConnection) -> Result<(), ExecutorError> {
        if !self.mappings.is_empty() {
            return Err(ExecutorError::test_case(format!(
                "Connect operation cannot be performed on a mapped port ({}).",
                self.name
            )));
        }
        match self.connection_index(connection.remote_component(), connection.remote_port()) {
            Ok(_) => Err(ExecutorError::internal(format!(
                "Port {} already has a connection towards {}:{}.",
                self.name,
                connection.remote_component(),
                connection.remote_port()
            ))),
            Err(at) => {
                self.connections.insert(at, connection);
                Ok(())
            }
        }
    }

    fn warn_if_shared_component(&self, remote: ComponentRef) {
        if self.connections.iter().any(|c| c.remote_component() == remote) {
            warn!(
                port = %self.name,
                remote = %remote,
                "Port will have more than one connections with ports of the same test component. These connections cannot be used for sending even with explicit addressing."
            );
        }
    }

    /// Destination of a `send` without a `to` clause.
    fn default_destination(&self) -> Result<ComponentRef, ExecutorError> {
        match (self.connections.as_slice(), self.mappings.len()) {
            ([_, ..], n) if n > 0 => Err(ExecutorError::test_case(format!(
                "Port {} has both connection(s) and mapping(s). Message can be sent on it only with explicit addressing.",
                self.name
            ))),
            ([only], _) => Ok(only.remote_component()),
            ([_, _, ..], _) => Err(ExecutorError::test_case(format!(
                "Port {} has more than one active connections. Message can be sent on it only with explicit addressing.",
                self.name
            ))),
            ([], 1) => Ok(ComponentRef::SYSTEM),
            ([], 0) => Err(ExecutorError::test_case(format!(
                "Port {} has neither connections nor mappings. Message cannot be sent on it.",
                self.name
            ))),
            ([], _) => Err(ExecutorError::test_case(format!(
                "Port {} has more than one mappings. Message cannot be sent on it to system.",
                self.name
            ))),
        }
    }

    /// The single `Connected` connection towards `destination`.
    fn connection_for_send(&self, destination: ComponentRef) -> Result<usize, ExecutorError> {
        let mut matching = self
            .connections
            .iter()
            .enumerate()
            .filter(|(_, c)| c.remote_component() == destination);
        let Some((index, connection)) = matching.next() else {
            return Err(ExecutorError::test_case(format!(
                "Data cannot be sent on port {} to component {destination} because there is no connection towards component {destination}.",
                self.name
            )));
        };
        if matching.next().is_some() {
            return Err(ExecutorError::test_case(format!(
                "Data cannot be sent on port {} to component {destination} because there are more than one connections towards component {destination}.",
                self.name
            )));
        }
        if connection.state() != ConnectionState::Connected {
            return Err(ExecutorError::test_case(format!(
                "Data cannot be sent on port {} to component {destination} because the connection is not in active state.",
                self.name
            )));
        }
        Ok(index)
    }

    /// Writes `data` on a stream connection, handling backpressure.
    ///
    /// Returns `Ok(false)` if the peer is gone and
    /// `ignore_peer_disconnect` is set.
    fn write_stream(
        &mut self,
        index: usize,
        data: &[u8],
        ignore_peer_disconnect: bool,
    ) -> Result<bool, ExecutorError> {
        let Self {
            name, connections, ..
        } = self;
        let connection = &mut connections[index];
        let remote = connection.remote_component();
        let remote_port = connection.remote_port().to_owned();
        let Endpoint::Stream { channel, inbound } = connection.endpoint_mut() else {
            return Err(ExecutorError::internal(format!(
                "Connection of port {name} to {remote}:{remote_port} has no stream to write to."
            )));
        };

        let mut sent = 0;
        let mut blocked = false;
        while sent < data.len() {
            match channel.write_some(&data[sent..]) {
                Ok(0) => {
                    return Err(ExecutorError::io(
                        format!("Sending data on the connection of port {name} to {remote}:{remote_port} failed"),
                        io::ErrorKind::WriteZero.into(),
                    ))
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => match channel.grow_send_buffer() {
                    Ok(Some((old, new))) => debug!(
                        port = %name,
                        remote = %remote,
                        remote_port = %remote_port,
                        old,
                        new,
                        "sending would block, send buffer enlarged"
                    ),
                    Ok(None) | Err(_) => {
                        if !blocked {
                            warn!(
                                port = %name,
                                remote = %remote,
                                remote_port = %remote_port,
                                "Sending data would block execution and it is not possible to further increase the size of the outgoing buffer. Trying to process incoming data to avoid deadlock."
                            );
                            blocked = true;
                        }
                        block_for_sending(channel, inbound)?;
                    }
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    if ignore_peer_disconnect {
                        return Ok(false);
                    }
                    return Err(ExecutorError::io(
                        format!("Sending data on the connection of port {name} to {remote}:{remote_port} failed"),
                        e,
                    ));
                }
                Err(e) => {
                    return Err(ExecutorError::io(
                        format!("Sending data on the connection of port {name} to {remote}:{remote_port} failed"),
                        e,
                    ))
                }
            }
        }
        if blocked {
            warn!(
                port = %name,
                remote = %remote,
                remote_port = %remote_port,
                "The message finally was sent."
            );
        }
        Ok(true)
    }

    fn send_last(&mut self, index: usize) -> Result<bool, ExecutorError> {
        let last = Frame::Last.to_bytes()?;
        self.write_stream(index, &last, true)
    }

    /// Accepts the peer of a listening connection.
    fn accept(&mut self, env: &mut PortEnv<'_>, index: usize) -> Result<(), ExecutorError> {
        let connection = &self.connections[index];
        let remote = connection.remote_component();
        let remote_port = connection.remote_port().to_owned();
        let transport = connection.transport();
        let accepted = match connection.endpoint() {
            Endpoint::Listening(listener) => listener.accept(),
            _ => return Ok(()),
        };
        match accepted {
            Ok(channel) => {
                self.connections[index].promote(channel)?;
                env.notify(Outgoing::Connected {
                    local_port: self.name.clone(),
                    remote_component: remote,
                    remote_port: remote_port.clone(),
                })?;
                info!(port = %self.name, remote = %remote, remote_port = %remote_port, "connection accepted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                self.connections.remove(index).close();
                env.connect_error(
                    &self.name,
                    remote,
                    &remote_port,
                    format!(
                        "Accepting of incoming {} connection failed. ({e})",
                        transport_label(transport)
                    ),
                )
            }
        }
    }

    /// Reads from a connected stream and processes complete frames.
    fn read_stream(&mut self, env: &mut PortEnv<'_>, index: usize) -> Result<(), ExecutorError> {
        let connection = &mut self.connections[index];
        let remote = connection.remote_component();
        let remote_port = connection.remote_port().to_owned();
        let state = connection.state();
        let result = match connection.endpoint_mut() {
            Endpoint::Stream { channel, inbound } => channel.read_into(inbound),
            _ => return Ok(()),
        };

        match result {
            Ok(0) => {
                env.disconnected(&self.name, remote, &remote_port);
                if state != ConnectionState::LastMessageReceived {
                    info!(port = %self.name, remote = %remote, remote_port = %remote_port, "connection closed by peer");
                }
                self.go_idle(index)?;
            }
            Ok(_) => self.process_inbound(env, index)?,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                env.disconnected(&self.name, remote, &remote_port);
                info!(port = %self.name, remote = %remote, remote_port = %remote_port, "connection reset by peer");
                warn!(port = %self.name, "The last outgoing messages on port may be lost.");
                self.go_idle(index)?;
            }
            Err(e) => {
                return Err(ExecutorError::io(
                    format!(
                        "Receiving data on the connection of port {} from {remote}:{remote_port} failed",
                        self.name
                    ),
                    e,
                ))
            }
        }
        self.remove_if_idle(index);
        Ok(())
    }

    fn go_idle(&mut self, index: usize) -> Result<(), ExecutorError> {
        let connection = &mut self.connections[index];
        if connection.state() != ConnectionState::Idle {
            connection.transition(ConnectionState::Idle)?;
        }
        Ok(())
    }

    fn remove_if_idle(&mut self, index: usize) {
        let Some(connection) = self.connections.get(index) else {
            return;
        };
        if connection.state() != ConnectionState::Idle {
            return;
        }
        let fragment = connection.pending_fragment();
        if !fragment.is_empty() {
            warn!(
                port = %self.name,
                remote = %connection.remote_component(),
                remote_port = connection.remote_port(),
                fragment = %hex(fragment),
                "Message fragment remained in the buffer of port connection."
            );
        }
        info!(
            port = %self.name,
            remote = %connection.remote_component(),
            remote_port = connection.remote_port(),
            "port disconnected"
        );
        self.connections.remove(index).close();
    }

    /// Decodes and handles every complete frame buffered on a
    /// connection.
    fn process_inbound(&mut self, env: &mut PortEnv<'_>, index: usize) -> Result<(), ExecutorError> {
        let decoder = FrameDecoder::new(env.config.max_frame_len);
        let frames = match self.connections[index].endpoint_mut() {
            Endpoint::Stream { inbound, .. } => decoder.decode_all(inbound)?,
            _ => return Ok(()),
        };
        for frame in frames {
            self.process_frame(env, index, frame)?;
        }
        Ok(())
    }

    fn process_frame(
        &mut self,
        env: &mut PortEnv<'_>,
        index: usize,
        frame: Frame,
    ) -> Result<(), ExecutorError> {
        let connection = &self.connections[index];
        let remote = connection.remote_component();
        let remote_port = connection.remote_port().to_owned();
        match frame {
            Frame::Last => self.process_last(env, index),
            Frame::Data {
                kind,
                type_name,
                payload,
            } => match connection.state() {
                ConnectionState::Connected | ConnectionState::LastMessageSent => {
                    self.deliver(remote, &remote_port, kind, &type_name, payload)
                }
                _ => {
                    warn!(
                        port = %self.name,
                        remote = %remote,
                        remote_port = %remote_port,
                        "Data arrived after the indication of connection termination. Data is ignored."
                    );
                    Ok(())
                }
            },
        }
    }

    fn process_last(&mut self, env: &mut PortEnv<'_>, index: usize) -> Result<(), ExecutorError> {
        let connection = &self.connections[index];
        let remote = connection.remote_component();
        let remote_port = connection.remote_port().to_owned();
        match connection.state() {
            ConnectionState::Connected => {
                info!(port = %self.name, remote = %remote, remote_port = %remote_port, "termination request received");
                if self.send_last(index)? {
                    self.connections[index].transition(ConnectionState::LastMessageReceived)?;
                } else {
                    env.disconnected(&self.name, remote, &remote_port);
                    warn!(port = %self.name, "The last outgoing messages on port may be lost.");
                    self.go_idle(index)?;
                }
            }
            ConnectionState::LastMessageSent => self.go_idle(index)?,
            _ => warn!(
                port = %self.name,
                remote = %remote,
                remote_port = %remote_port,
                "Unexpected data arrived after the indication of connection termination."
            ),
        }
        Ok(())
    }

    /// Starts terminating one connection on behalf of `Disconnect`.
    fn disconnect_stream(&mut self, env: &mut PortEnv<'_>, index: usize) -> Result<(), ExecutorError> {
        let connection = &self.connections[index];
        let remote = connection.remote_component();
        let remote_port = connection.remote_port().to_owned();
        match connection.state() {
            ConnectionState::Listening => {
                info!(port = %self.name, remote = %remote, remote_port = %remote_port, "destroying unestablished connection");
                self.connections.remove(index).close();
            }
            ConnectionState::Connected => {
                info!(port = %self.name, remote = %remote, remote_port = %remote_port, "terminating connection");
                if self.send_last(index)? {
                    self.connections[index].transition(ConnectionState::LastMessageSent)?;
                } else {
                    info!(port = %self.name, remote = %remote, remote_port = %remote_port, "sending termination request failed");
                    env.disconnected(&self.name, remote, &remote_port);
                    warn!(port = %self.name, "The last outgoing messages on port may be lost.");
                    self.connections.remove(index).close();
                }
            }
            state => {
                return Err(ExecutorError::test_case(format!(
                    "The connection of port {} to {remote}:{remote_port} is in unexpected state ({state}) when trying to terminate it.",
                    self.name
                )))
            }
        }
        Ok(())
    }

    /// Records a mapping to `system_port`.
    ///
    /// # Errors
    ///
    /// Test case error on an inactive port, or whatever `user_map`
    /// returns.
    pub fn map(&mut self, system_port: &str) -> Result<(), ExecutorError> {
        if !self.active {
            return Err(ExecutorError::test_case(format!(
                "Inactive port {} cannot be mapped.",
                self.name
            )));
        }
        let at = match self.mappings.binary_search_by(|m| m.as_str().cmp(system_port)) {
            Ok(_) => {
                warn!(
                    port = %self.name,
                    system_port,
                    "Port is already mapped to system port. Map operation was ignored."
                );
                return Ok(());
            }
            Err(at) => at,
        };
        self.behaviour.user_map(&self.name, system_port)?;
        info!(port = %self.name, system_port, "port was mapped to system");
        self.mappings.insert(at, system_port.to_owned());
        if self.mappings.len() > 1 {
            warn!(
                port = %self.name,
                "Port has now more than one mappings. Message cannot be sent on it to system even with explicit addressing."
            );
        }
        Ok(())
    }

    /// Removes the mapping to `system_port`.
    ///
    /// # Errors
    ///
    /// Whatever `user_unmap` returns; the mapping is gone either way.
    pub fn unmap(&mut self, system_port: &str) -> Result<(), ExecutorError> {
        let Ok(at) = self.mappings.binary_search_by(|m| m.as_str().cmp(system_port)) else {
            warn!(
                port = %self.name,
                system_port,
                "Port is not mapped to system port. Unmap operation was ignored."
            );
            return Ok(());
        };
        self.mappings.remove(at);
        self.behaviour.user_unmap(&self.name, system_port)?;
        info!(port = %self.name, system_port, "port was unmapped from system");
        Ok(())
    }

    /// Tears the port down. Errors from user hooks and from the
    /// coordinator link are logged and ignored.
    fn deactivate(&mut self, env: &mut PortEnv<'_>) {
        if !self.active {
            return;
        }
        for connection in std::mem::take(&mut self.connections) {
            info!(
                port = %self.name,
                remote = %connection.remote_component(),
                remote_port = connection.remote_port(),
                "removing unterminated connection"
            );
            if env.parallel {
                env.disconnected(&self.name, connection.remote_component(), connection.remote_port());
            }
            connection.close();
        }
        while let Some(system_port) = self.mappings.first().cloned() {
            info!(port = %self.name, system_port = %system_port, "removing unterminated mapping");
            if let Err(e) = self.unmap(&system_port) {
                debug!(port = %self.name, error = %e, "unmap failed during deactivation");
            }
            if env.parallel {
                env.notify_quietly(Outgoing::Unmapped {
                    local_port: self.name.clone(),
                    system_port,
                });
            }
        }
        if self.started || self.halted {
            if let Err(e) = self.stop() {
                debug!(port = %self.name, error = %e, "stop failed during deactivation");
            }
        }
        self.queue.clear();
        self.active = false;
        debug!(port = %self.name, "port deactivated");
    }
}

/// Waits until `channel` is writable, draining whatever the peer sends
/// meanwhile into `inbound` so that it cannot block on us in turn.
fn block_for_sending(channel: &mut StreamChannel, inbound: &mut BytesMut) -> Result<(), ExecutorError> {
    loop {
        let revents = {
            let mut fds = [PollFd::new(
                channel.as_fd(),
                PollFlags::POLLOUT | PollFlags::POLLIN,
            )];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => fds[0].revents().unwrap_or(PollFlags::empty()),
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(ExecutorError::system(
                        "poll() failed while blocking for sending",
                        e,
                    ))
                }
            }
        };
        if revents.contains(PollFlags::POLLIN) {
            match channel.read_into(inbound) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return Ok(()),
            }
        }
        if revents.intersects(PollFlags::POLLOUT | PollFlags::POLLERR | PollFlags::POLLHUP) {
            return Ok(());
        }
    }
}

// === Component-level operations ===

impl PortSet {
    fn prepare_connect(
        &self,
        env: &mut PortEnv<'_>,
        local_port: &str,
        remote_component: ComponentRef,
        remote_port: &str,
    ) -> Result<Option<usize>, ExecutorError> {
        let Some(index) = self.index_of(local_port) else {
            env.connect_error(
                local_port,
                remote_component,
                remote_port,
                format!("Port {local_port} does not exist."),
            )?;
            return Ok(None);
        };
        let port = &self.ports()[index];
        if port.lookup_connection(remote_component, remote_port).is_some() {
            env.connect_error(
                local_port,
                remote_component,
                remote_port,
                format!("Port {local_port} already has a connection towards {remote_component}:{remote_port}."),
            )?;
            return Ok(None);
        }
        if !port.mappings.is_empty() {
            env.connect_error(
                local_port,
                remote_component,
                remote_port,
                format!("Connect operation cannot be performed on a mapped port ({local_port})."),
            )?;
            return Ok(None);
        }
        port.warn_if_shared_component(remote_component);
        Ok(Some(index))
    }

    /// Handles `ConnectListen`: opens a listener for the peer to dial.
    ///
    /// # Errors
    ///
    /// Internal error for a `LOCAL` transport; coordinator failures.
    pub fn process_connect_listen(
        &mut self,
        env: &mut PortEnv<'_>,
        local_port: &str,
        remote_component: ComponentRef,
        remote_port: &str,
        transport: TransportKind,
    ) -> Result<(), ExecutorError> {
        let Some(index) = self.prepare_connect(env, local_port, remote_component, remote_port)?
        else {
            return Ok(());
        };

        let listener = match transport {
            TransportKind::Local => {
                return env.connect_error(
                    local_port,
                    remote_component,
                    remote_port,
                    "Message CONNECT_LISTEN cannot refer to transport type LOCAL.".to_owned(),
                )
            }
            TransportKind::InetStream => {
                let ip = match env.coordinator.local_ip() {
                    Some(ip) => ip,
                    None => match env.config.local_address.parse::<IpAddr>() {
                        Ok(ip) => ip,
                        Err(e) => {
                            return env.connect_error(
                                local_port,
                                remote_component,
                                remote_port,
                                format!("Invalid local address {}: {e}", env.config.local_address),
                            )
                        }
                    },
                };
                match StreamListener::bind_inet(ip) {
                    Ok(listener) => listener,
                    Err(e) => {
                        return env.connect_error(
                            local_port,
                            remote_component,
                            remote_port,
                            format!("Creating the TCP server socket failed. ({e})"),
                        )
                    }
                }
            }
            TransportKind::UnixStream => {
                let hash = connection_hash(
                    std::process::id(),
                    env.self_ref,
                    local_port,
                    remote_component,
                    remote_port,
                );
                match StreamListener::bind_unix(
                    &env.config.unix_socket_dir,
                    &env.config.unix_socket_prefix,
                    hash,
                    env.config.unix_bind_max_iter,
                ) {
                    Ok(listener) => listener,
                    Err(e) => {
                        return env.connect_error(
                            local_port,
                            remote_component,
                            remote_port,
                            format!("Creating the UNIX server socket failed: {e}"),
                        )
                    }
                }
            }
        };

        let address = match listener.address() {
            Ok(address) => address,
            Err(e) => {
                listener.unlink();
                return env.connect_error(
                    local_port,
                    remote_component,
                    remote_port,
                    format!("Getting the address of the server socket failed. ({e})"),
                );
            }
        };
        self.port_at(index).insert_connection(PortConnection::listening(
            remote_component,
            remote_port,
            transport,
            listener,
        ))?;
        debug!(port = local_port, remote = %remote_component, remote_port, %address, "listening for peer");
        env.notify(Outgoing::ConnectListenAck {
            local_port: local_port.to_owned(),
            remote_component,
            remote_port: remote_port.to_owned(),
            transport,
            address,
        })
    }

    /// Handles `Connect`: links to a local port or dials the peer.
    ///
    /// # Errors
    ///
    /// Internal error for a stream transport without a matching
    /// address; coordinator failures.
    pub fn process_connect(
        &mut self,
        env: &mut PortEnv<'_>,
        local_port: &str,
        remote_component: ComponentRef,
        remote_port: &str,
        transport: TransportKind,
        address: Option<&StreamAddress>,
    ) -> Result<(), ExecutorError> {
        let Some(index) = self.prepare_connect(env, local_port, remote_component, remote_port)?
        else {
            return Ok(());
        };

        if transport == TransportKind::Local {
            if remote_component != env.self_ref {
                return env.connect_error(
                    local_port,
                    remote_component,
                    remote_port,
                    format!("Message CONNECT with transport type LOCAL refers to a port of another component ({remote_component})."),
                );
            }
            let Some(peer) = self.index_of(remote_port) else {
                return env.connect_error(
                    local_port,
                    remote_component,
                    remote_port,
                    format!("Port {remote_port} does not exist."),
                );
            };
            self.link_local(env.self_ref, index, peer)?;
            return env.notify(Outgoing::Connected {
                local_port: local_port.to_owned(),
                remote_component,
                remote_port: remote_port.to_owned(),
            });
        }

        let address = match (transport, address) {
            (TransportKind::InetStream, Some(a @ StreamAddress::Inet(_)))
            | (TransportKind::UnixStream, Some(a @ StreamAddress::Unix(_))) => a,
            _ => {
                return Err(ExecutorError::internal(format!(
                    "Message CONNECT for transport {transport} carries no matching address."
                )))
            }
        };
        match StreamChannel::connect(address) {
            Ok(channel) => {
                self.port_at(index).insert_connection(PortConnection::stream(
                    remote_component,
                    remote_port,
                    channel,
                ))?;
                info!(port = local_port, remote = %remote_component, remote_port, %address, "connection established");
                Ok(())
            }
            Err(e) => env.connect_error(
                local_port,
                remote_component,
                remote_port,
                format!(
                    "{} connection establishment failed to {address}. ({e})",
                    transport_label(transport)
                ),
            ),
        }
    }

    fn link_local(&mut self, self_ref: ComponentRef, from: usize, to: usize) -> Result<(), ExecutorError> {
        let from_name = self.ports()[from].name.clone();
        let to_name = self.ports()[to].name.clone();
        self.port_at(from)
            .insert_connection(PortConnection::local(self_ref, to_name.as_str()))?;
        if from != to {
            self.port_at(to)
                .insert_connection(PortConnection::local(self_ref, from_name.as_str()))?;
        }
        info!(port = %from_name, peer = %to_name, "local connection established");
        Ok(())
    }

    fn unlink_local(&mut self, self_ref: ComponentRef, from: usize, peer_name: &str) -> Result<(), ExecutorError> {
        let from_name = self.ports()[from].name.clone();
        if let Some(at) = self.ports()[from].lookup_connection(self_ref, peer_name) {
            self.port_at(from).connections.remove(at);
        }
        if from_name != peer_name {
            let peer = self.index_of(peer_name).ok_or_else(|| {
                ExecutorError::internal(format!(
                    "Port {from_name} is connected with local port {peer_name}, which does not exist."
                ))
            })?;
            let Some(at) = self.ports()[peer].lookup_connection(self_ref, &from_name) else {
                return Err(ExecutorError::internal(format!(
                    "Port {from_name} is connected with local port {peer_name}, but port {peer_name} does not have a connection to {from_name}."
                )));
            };
            self.port_at(peer).connections.remove(at);
        }
        info!(port = %from_name, peer = peer_name, "local connection terminated");
        Ok(())
    }

    /// Handles `Disconnect`.
    ///
    /// # Errors
    ///
    /// Coordinator failures, or a connection in an unexpected state.
    pub fn process_disconnect(
        &mut self,
        env: &mut PortEnv<'_>,
        local_port: &str,
        remote_component: ComponentRef,
        remote_port: &str,
    ) -> Result<(), ExecutorError> {
        let Some(index) = self.index_of(local_port) else {
            return env.notify(Outgoing::Error {
                message: format!("Message DISCONNECT refers to non-existent local port {local_port}."),
            });
        };
        let Some(at) = self.ports()[index].lookup_connection(remote_component, remote_port) else {
            if remote_component == env.self_ref && self.index_of(remote_port).is_none() {
                return env.notify(Outgoing::Error {
                    message: format!("Message DISCONNECT refers to non-existent port {remote_port}."),
                });
            }
            return env.notify(Outgoing::Disconnected {
                local_port: local_port.to_owned(),
                remote_component,
                remote_port: remote_port.to_owned(),
            });
        };

        if self.ports()[index].connections[at].transport() == TransportKind::Local {
            self.unlink_local(env.self_ref, index, remote_port)?;
            return env.notify(Outgoing::Disconnected {
                local_port: local_port.to_owned(),
                remote_component,
                remote_port: remote_port.to_owned(),
            });
        }
        self.port_at(index).disconnect_stream(env, at)
    }

    /// Connects two ports of this component directly (single mode).
    ///
    /// # Errors
    ///
    /// Test case error for an unknown port or a mapped port.
    pub fn make_local_connection(
        &mut self,
        self_ref: ComponentRef,
        src_port: &str,
        dst_port: &str,
    ) -> Result<(), ExecutorError> {
        let src = self.index_of(src_port).ok_or_else(|| {
            ExecutorError::test_case(format!("Connect operation refers to non-existent port {src_port}."))
        })?;
        if self.ports()[src].lookup_connection(self_ref, dst_port).is_some() {
            warn!(
                port = src_port,
                peer = dst_port,
                "Port is already connected with local port. Connect operation had no effect."
            );
            return Ok(());
        }
        self.ports()[src].warn_if_shared_component(self_ref);
        let dst = self.index_of(dst_port).ok_or_else(|| {
            ExecutorError::test_case(format!("Connect operation refers to non-existent port {dst_port}."))
        })?;
        self.link_local(self_ref, src, dst)
    }

    /// Removes a direct connection between two ports (single mode).
    ///
    /// # Errors
    ///
    /// Test case error for an unknown port.
    pub fn terminate_local_connection(
        &mut self,
        self_ref: ComponentRef,
        src_port: &str,
        dst_port: &str,
    ) -> Result<(), ExecutorError> {
        let src = self.index_of(src_port).ok_or_else(|| {
            ExecutorError::test_case(format!("Disconnect operation refers to non-existent port {src_port}."))
        })?;
        if self.ports()[src].lookup_connection(self_ref, dst_port).is_some() {
            return self.unlink_local(self_ref, src, dst_port);
        }
        if self.index_of(dst_port).is_none() {
            return Err(ExecutorError::test_case(format!(
                "Disconnect operation refers to non-existent port {dst_port}."
            )));
        }
        warn!(
            port = src_port,
            peer = dst_port,
            "Port does not have connection with local port. Disconnect operation had no effect."
        );
        Ok(())
    }

    /// Maps `port` to `system_port` and reports it in parallel mode.
    ///
    /// # Errors
    ///
    /// Test case error for an unknown or connected port, or whatever
    /// `user_map` returns.
    pub fn map_port(
        &mut self,
        env: &mut PortEnv<'_>,
        port: &str,
        system_port: &str,
    ) -> Result<(), ExecutorError> {
        let index = self.index_of(port).ok_or_else(|| {
            ExecutorError::test_case(format!("Map operation refers to non-existent port {port}."))
        })?;
        if !self.ports()[index].connections.is_empty() {
            return Err(ExecutorError::test_case(format!(
                "Map operation is not allowed on a connected port ({port})."
            )));
        }
        self.port_at(index).map(system_port)?;
        if env.parallel {
            env.notify(Outgoing::Mapped {
                local_port: port.to_owned(),
                system_port: system_port.to_owned(),
            })?;
        }
        Ok(())
    }

    /// Unmaps `port` from `system_port` and reports it in parallel mode.
    ///
    /// # Errors
    ///
    /// Test case error for an unknown port, or whatever `user_unmap`
    /// returns.
    pub fn unmap_port(
        &mut self,
        env: &mut PortEnv<'_>,
        port: &str,
        system_port: &str,
    ) -> Result<(), ExecutorError> {
        let index = self.index_of(port).ok_or_else(|| {
            ExecutorError::test_case(format!("Unmap operation refers to non-existent port {port}."))
        })?;
        self.port_at(index).unmap(system_port)?;
        if env.parallel {
            env.notify(Outgoing::Unmapped {
                local_port: port.to_owned(),
                system_port: system_port.to_owned(),
            })?;
        }
        Ok(())
    }

    /// Sends one item on `port`.
    ///
    /// Without a `destination` the port's only connection (or `SYSTEM`
    /// for its only mapping) is used.
    ///
    /// # Errors
    ///
    /// Test case errors for a stopped port or an unusable destination;
    /// I/O errors if the stream fails.
    pub fn send(
        &mut self,
        env: &mut PortEnv<'_>,
        port: &str,
        kind: MessageKind,
        type_name: &str,
        payload: Bytes,
        destination: Option<ComponentRef>,
    ) -> Result<(), ExecutorError> {
        let index = self
            .index_of(port)
            .ok_or_else(|| ExecutorError::test_case(format!("Port {port} does not exist.")))?;
        let source = &self.ports()[index];
        if !source.started {
            return Err(ExecutorError::test_case(format!(
                "Sending a {} on port {port}, which is not started.",
                kind.noun()
            )));
        }
        let destination = match destination {
            Some(ComponentRef::UNBOUND) => {
                return Err(ExecutorError::test_case(
                    "Unbound component reference in the to clause of send operation.",
                ))
            }
            Some(d) => d,
            None => source.default_destination()?,
        };
        debug!(port, %kind, type_name, to = %destination, "sending");

        if destination == ComponentRef::SYSTEM {
            let Port { name, behaviour, .. } = self.port_at(index);
            return behaviour.outgoing_send(name, kind, type_name, &payload);
        }

        let at = source.connection_for_send(destination)?;
        let connection = &source.connections[at];
        if connection.transport() == TransportKind::Local {
            let peer_name = connection.remote_port().to_owned();
            let peer = self.index_of(&peer_name).ok_or_else(|| {
                ExecutorError::internal(format!(
                    "Port {port} is connected with local port {peer_name}, which does not exist."
                ))
            })?;
            if self.ports()[peer].lookup_connection(env.self_ref, port).is_none() {
                return Err(ExecutorError::internal(format!(
                    "Port {port} is connected with local port {peer_name}, but port {peer_name} does not have a connection to {port}."
                )));
            }
            return self
                .port_at(peer)
                .deliver(env.self_ref, port, kind, type_name, payload);
        }

        let frame = Frame::data(kind, type_name, payload);
        let max = env.config.max_frame_len as usize;
        if frame.body_len() > max {
            return Err(ExecutorError::test_case(format!(
                "Sending a {} of {} bytes on port {port} exceeds the frame limit of {max} bytes.",
                kind.noun(),
                frame.body_len()
            )));
        }
        let frame = frame.to_bytes()?;
        self.port_at(index).write_stream(at, &frame, false)?;
        Ok(())
    }

    /// Deactivates one port and drops the local connections other ports
    /// have towards it.
    pub fn deactivate(&mut self, env: &mut PortEnv<'_>, name: &str) {
        let Some(index) = self.index_of(name) else {
            return;
        };
        let self_ref = env.self_ref;
        self.port_at(index).deactivate(env);
        for port in self.ports_mut() {
            if let Some(at) = port.lookup_connection(self_ref, name) {
                if port.connections[at].transport() == TransportKind::Local {
                    port.connections.remove(at);
                }
            }
        }
    }

    /// Deactivates every port, in creation order.
    pub fn deactivate_all(&mut self, env: &mut PortEnv<'_>) {
        for port in self.ports_mut() {
            port.deactivate(env);
        }
    }

    /// Descriptors of listening and connected stream connections.
    #[must_use]
    pub fn watched(&self) -> Vec<(ConnectionKey, BorrowedFd<'_>)> {
        self.ports()
            .iter()
            .filter(|p| p.active)
            .flat_map(|p| {
                p.connections.iter().filter_map(move |c| {
                    c.fd().map(|fd| {
                        (
                            ConnectionKey::new(p.name.as_str(), c.remote_component(), c.remote_port()),
                            fd,
                        )
                    })
                })
            })
            .collect()
    }

    /// Handles a readiness event on the connection identified by `key`.
    ///
    /// # Errors
    ///
    /// Fatal I/O or framing errors, coordinator failures, and test case
    /// errors from inbound delivery.
    pub fn handle_ready(
        &mut self,
        env: &mut PortEnv<'_>,
        key: &ConnectionKey,
    ) -> Result<(), ExecutorError> {
        let Some(index) = self.index_of(&key.local_port) else {
            return Ok(());
        };
        let port = self.port_at(index);
        let Some(at) = port.lookup_connection(key.remote_component, &key.remote_port) else {
            return Ok(());
        };
        let listening = match port.connections[at].endpoint() {
            Endpoint::Listening(_) => true,
            Endpoint::Stream { .. } => false,
            Endpoint::Local => return Ok(()),
        };
        if listening {
            port.accept(env, at)
        } else {
            port.read_stream(env, at)
        }
    }

    /// Processes frames already sitting in reassembly buffers, e.g.
    /// those drained while a send was blocked.
    ///
    /// # Errors
    ///
    /// See [`PortSet::handle_ready`].
    pub fn dispatch_buffered(&mut self, env: &mut PortEnv<'_>) -> Result<(), ExecutorError> {
        let pending: Vec<ConnectionKey> = self
            .ports()
            .iter()
            .filter(|p| p.active)
            .flat_map(|p| {
                p.connections
                    .iter()
                    .filter(|c| !c.pending_fragment().is_empty())
                    .map(move |c| ConnectionKey::new(p.name.as_str(), c.remote_component(), c.remote_port()))
            })
            .collect();
        for key in pending {
            let Some(index) = self.index_of(&key.local_port) else {
                continue;
            };
            let port = self.port_at(index);
            if let Some(at) = port.lookup_connection(key.remote_component, &key.remote_port) {
                port.process_inbound(env, at)?;
                port.remove_if_idle(at);
            }
        }
        Ok(())
    }
}
