//! Stream sockets carrying port connections and the coordinator link.
//!
//! [`StreamChannel`] wraps a connected TCP or UNIX-domain stream;
//! [`StreamListener`] wraps the server side of a pending connection.
//! Both expose their descriptor for `poll(2)`.
//!
//! Listening UNIX sockets are bound to
//! `<dir>/<prefix><hash:x>`, where the hash mixes the process id, both
//! component references and both port names (see [`connection_hash`]).
//! On `EADDRINUSE` the hash is incremented and binding is retried a
//! bounded number of times.

use bytes::BytesMut;
use nix::errno::Errno;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use tcx_event::StreamAddress;
use tcx_types::{ComponentRef, ErrorCode, TransportKind};
use thiserror::Error;
use tracing::{debug, warn};

const READ_CHUNK: usize = 16 * 1024;

/// A connected, non-blocking stream socket.
#[derive(Debug)]
pub enum StreamChannel {
    Inet(TcpStream),
    Unix(UnixStream),
}

impl StreamChannel {
    /// Dials `address` and prepares the socket for event-driven use.
    ///
    /// # Errors
    ///
    /// Any error from `connect(2)` or from socket configuration.
    pub fn connect(address: &StreamAddress) -> io::Result<Self> {
        let channel = match address {
            StreamAddress::Inet(addr) => Self::Inet(TcpStream::connect(addr)?),
            StreamAddress::Unix(path) => Self::Unix(UnixStream::connect(path)?),
        };
        channel.configure()?;
        Ok(channel)
    }

    /// Switches to non-blocking mode; TCP sockets also get
    /// `TCP_NODELAY`.
    ///
    /// # Errors
    ///
    /// Any error from the underlying `setsockopt`/`fcntl` calls.
    pub fn configure(&self) -> io::Result<()> {
        match self {
            Self::Inet(stream) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)
            }
            Self::Unix(stream) => stream.set_nonblocking(true),
        }
    }

    #[must_use]
    pub fn transport(&self) -> TransportKind {
        match self {
            Self::Inet(_) => TransportKind::InetStream,
            Self::Unix(_) => TransportKind::UnixStream,
        }
    }

    /// Local IP address of a TCP channel.
    #[must_use]
    pub fn local_ip(&self) -> Option<IpAddr> {
        match self {
            Self::Inet(stream) => stream.local_addr().ok().map(|a| a.ip()),
            Self::Unix(_) => None,
        }
    }

    /// Reads whatever is available into `buf`.
    ///
    /// Returns the number of bytes appended; `0` means the peer closed
    /// the stream.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when nothing is available, or any read error.
    pub fn read_into(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let result = match self {
                Self::Inet(stream) => stream.read(&mut chunk),
                Self::Unix(stream) => stream.read(&mut chunk),
            };
            match result {
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes as much of `data` as the socket accepts right now.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the send buffer is full, or any write error.
    pub fn write_some(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Self::Inet(stream) => stream.write(data),
            Self::Unix(stream) => stream.write(data),
        }
    }

    /// Writes all of `data`, waiting for writability when the socket
    /// would block.
    ///
    /// # Errors
    ///
    /// Any write or poll error.
    pub fn write_all_blocking(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.write_some(data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_writable(self.as_fd()).map_err(io::Error::from)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Doubles `SO_SNDBUF`, falling back to a binary search when the
    /// kernel refuses with `ENOMEM`/`ENOBUFS`.
    ///
    /// Returns `Some((old, new))` if the buffer actually grew.
    ///
    /// # Errors
    ///
    /// Any other `getsockopt`/`setsockopt` failure.
    pub fn grow_send_buffer(&self) -> io::Result<Option<(usize, usize)>> {
        let sock = SockRef::from(self);
        let old = sock.send_buffer_size()?;
        let target = old.saturating_mul(2);
        match sock.set_send_buffer_size(target) {
            Ok(()) => {}
            Err(e) if is_out_of_memory(&e) => {
                let (mut lo, mut hi) = (old, target);
                while hi - lo > 1 {
                    let mid = lo + (hi - lo) / 2;
                    match sock.set_send_buffer_size(mid) {
                        Ok(()) => lo = mid,
                        Err(e) if is_out_of_memory(&e) => hi = mid,
                        Err(e) => return Err(e),
                    }
                }
            }
            Err(e) => return Err(e),
        }
        let new = sock.send_buffer_size()?;
        Ok((new > old).then_some((old, new)))
    }
}

impl AsFd for StreamChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Inet(stream) => stream.as_fd(),
            Self::Unix(stream) => stream.as_fd(),
        }
    }
}

fn is_out_of_memory(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error().map(Errno::from_raw),
        Some(Errno::ENOMEM | Errno::ENOBUFS)
    )
}

/// Blocks until `fd` is writable (or in an error state).
///
/// # Errors
///
/// Any `poll(2)` failure other than `EINTR`.
pub fn wait_writable(fd: BorrowedFd<'_>) -> Result<(), Errno> {
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    loop {
        let mut fds = [PollFd::new(fd, PollFlags::POLLOUT)];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// The server side of a pending stream connection.
#[derive(Debug)]
pub enum StreamListener {
    Inet(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl StreamListener {
    /// Binds an ephemeral TCP port on `ip` with a backlog of one.
    ///
    /// The listener is non-blocking; [`StreamListener::accept`] reports
    /// `WouldBlock` when the pending peer went away after `poll(2)`.
    ///
    /// # Errors
    ///
    /// Any socket, bind or listen failure.
    pub fn bind_inet(ip: IpAddr) -> io::Result<Self> {
        let addr = SocketAddr::new(ip, 0);
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        Ok(Self::Inet(socket.into()))
    }

    /// Binds a UNIX-domain socket below `dir`, probing successive hash
    /// values while the pathname is taken.
    ///
    /// # Errors
    ///
    /// [`ListenError::PathsExhausted`] after `max_attempts` collisions,
    /// [`ListenError::Io`] for any other bind failure.
    pub fn bind_unix(
        dir: &Path,
        prefix: &str,
        mut hash: u32,
        max_attempts: u32,
    ) -> Result<Self, ListenError> {
        let mut attempt = 1;
        loop {
            let path = unix_socket_path(dir, prefix, hash);
            match UnixListener::bind(&path) {
                Ok(listener) => {
                    if let Err(source) = listener.set_nonblocking(true) {
                        let _ = std::fs::remove_file(&path);
                        return Err(ListenError::Io { path, source });
                    }
                    return Ok(Self::Unix { listener, path });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    if attempt >= max_attempts {
                        return Err(ListenError::PathsExhausted {
                            dir: dir.to_path_buf(),
                            attempts: attempt,
                        });
                    }
                    debug!(path = %path.display(), "UNIX socket pathname in use, probing next");
                    attempt += 1;
                    hash = hash.wrapping_add(1);
                }
                Err(e) => return Err(ListenError::Io { path, source: e }),
            }
        }
    }

    /// The address a peer has to dial.
    ///
    /// # Errors
    ///
    /// `getsockname(2)` failure.
    pub fn address(&self) -> io::Result<StreamAddress> {
        match self {
            Self::Inet(listener) => Ok(StreamAddress::Inet(listener.local_addr()?)),
            Self::Unix { path, .. } => Ok(StreamAddress::Unix(path.clone())),
        }
    }

    /// Accepts the peer and configures the new channel.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when no peer is pending, or any `accept(2)` or
    /// configuration failure.
    pub fn accept(&self) -> io::Result<StreamChannel> {
        let channel = match self {
            Self::Inet(listener) => StreamChannel::Inet(listener.accept()?.0),
            Self::Unix { listener, .. } => StreamChannel::Unix(listener.accept()?.0),
        };
        channel.configure()?;
        Ok(channel)
    }

    /// Removes the pathname of a UNIX listener. Failures are logged.
    pub fn unlink(&self) {
        if let Self::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not remove UNIX socket file, it has to be deleted manually"
                );
            }
        }
    }
}

impl AsFd for StreamListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Inet(listener) => listener.as_fd(),
            Self::Unix { listener, .. } => listener.as_fd(),
        }
    }
}

/// Listener setup failure.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("could not find a free pathname in {dir} after {attempts} iterations")]
    PathsExhausted { dir: PathBuf, attempts: u32 },

    #[error("binding UNIX socket {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ErrorCode for ListenError {
    fn code(&self) -> &'static str {
        match self {
            Self::PathsExhausted { .. } => "LISTEN_PATHS_EXHAUSTED",
            Self::Io { .. } => "LISTEN_IO",
        }
    }

    /// Reported to the MC as a connect error; the test case goes on.
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Pathname of a UNIX listener for a given hash.
#[must_use]
pub fn unix_socket_path(dir: &Path, prefix: &str, hash: u32) -> PathBuf {
    dir.join(format!("{prefix}{hash:x}"))
}

/// Mixes the endpoints of a connection into a 32-bit value.
///
/// The buffer starts as `AA 55 AA 55`; the pid and the remote side are
/// folded in from the front, the local side from the back.
#[must_use]
pub fn connection_hash(
    pid: u32,
    local_component: ComponentRef,
    local_port: &str,
    remote_component: ComponentRef,
    remote_port: &str,
) -> u32 {
    const N: usize = 4;
    let mut buf = [0xAA, 0x55, 0xAA, 0x55];

    for (i, byte) in pid.to_le_bytes().iter().enumerate() {
        buf[i % N] ^= byte;
    }
    let local = local_component.raw().to_le_bytes();
    for (i, byte) in local.iter().chain(local_port.as_bytes()).enumerate() {
        buf[(N - 1) - i % N] ^= byte;
    }
    let remote = remote_component.raw().to_le_bytes();
    for (i, byte) in remote.iter().chain(remote_port.as_bytes()).enumerate() {
        buf[i % N] ^= byte;
    }
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn hash_depends_on_every_endpoint() {
        let base = connection_hash(100, ComponentRef::MTC, "p", ComponentRef::new(3), "q");
        assert_ne!(
            base,
            connection_hash(101, ComponentRef::MTC, "p", ComponentRef::new(3), "q")
        );
        assert_ne!(
            base,
            connection_hash(100, ComponentRef::new(4), "p", ComponentRef::new(3), "q")
        );
        assert_ne!(
            base,
            connection_hash(100, ComponentRef::MTC, "px", ComponentRef::new(3), "q")
        );
        assert_ne!(
            base,
            connection_hash(100, ComponentRef::MTC, "p", ComponentRef::new(3), "r")
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let a = connection_hash(7, ComponentRef::new(5), "out", ComponentRef::new(6), "in");
        let b = connection_hash(7, ComponentRef::new(5), "out", ComponentRef::new(6), "in");
        assert_eq!(a, b);
    }

    #[test]
    fn unix_bind_probes_past_collisions() {
        let dir = TempDir::new().unwrap();
        let first = StreamListener::bind_unix(dir.path(), "pc-", 0x10, 4).unwrap();
        let second = StreamListener::bind_unix(dir.path(), "pc-", 0x10, 4).unwrap();

        let a = first.address().unwrap();
        let b = second.address().unwrap();
        assert_ne!(a, b);
        assert_eq!(b, StreamAddress::Unix(dir.path().join("pc-11")));

        first.unlink();
        second.unlink();
    }

    #[test]
    fn unix_bind_gives_up_after_bound() {
        let dir = TempDir::new().unwrap();
        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(StreamListener::bind_unix(dir.path(), "pc-", 0xf0, 3).unwrap());
        }
        let paths: HashSet<_> = held.iter().map(|l| l.address().unwrap()).collect();
        assert_eq!(paths.len(), 3);

        let err = StreamListener::bind_unix(dir.path(), "pc-", 0xf0, 3).unwrap_err();
        assert!(matches!(err, ListenError::PathsExhausted { attempts: 3, .. }));
        assert_eq!(err.code(), "LISTEN_PATHS_EXHAUSTED");
    }

    #[test]
    fn listen_error_codes_valid() {
        let variants = [
            ListenError::PathsExhausted {
                dir: PathBuf::from("/tmp"),
                attempts: 1,
            },
            ListenError::Io {
                path: PathBuf::from("/tmp/x"),
                source: io::Error::other("y"),
            },
        ];
        tcx_types::assert_error_codes(&variants, "LISTEN_");
        assert!(variants.iter().all(ErrorCode::is_recoverable));
    }

    #[test]
    fn tcp_listener_accepts_configured_channel() {
        let listener = StreamListener::bind_inet("127.0.0.1".parse().unwrap()).unwrap();
        let address = listener.address().unwrap();
        let mut client = StreamChannel::connect(&address).unwrap();
        let mut server = listener.accept().unwrap();

        client.write_all_blocking(b"ping").unwrap();
        let mut buf = BytesMut::new();
        wait_readable(&server);
        assert_eq!(server.read_into(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..], b"ping");
        assert_eq!(server.transport(), TransportKind::InetStream);
    }

    #[test]
    fn accept_without_pending_peer_does_not_block() {
        let dir = TempDir::new().unwrap();
        let listeners = [
            StreamListener::bind_inet("127.0.0.1".parse().unwrap()).unwrap(),
            StreamListener::bind_unix(dir.path(), "pc-", 0x20, 1).unwrap(),
        ];
        for listener in &listeners {
            let err = listener.accept().unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        }
        listeners[1].unlink();
    }

    #[test]
    fn send_buffer_growth_reports_sizes() {
        let listener = StreamListener::bind_inet("127.0.0.1".parse().unwrap()).unwrap();
        let client = StreamChannel::connect(&listener.address().unwrap()).unwrap();
        if let Some((old, new)) = client.grow_send_buffer().unwrap() {
            assert!(new > old);
        }
    }

    fn wait_readable(channel: &StreamChannel) {
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
        let mut fds = [PollFd::new(channel.as_fd(), PollFlags::POLLIN)];
        poll(&mut fds, PollTimeout::from(1000u16)).unwrap();
    }
}
