//! Coordinator link over a stream socket.
//!
//! Each message is a big-endian `u32` body length followed by a JSON
//! body.

use super::{Coordinator, CoordinatorError};
use crate::connection::StreamChannel;
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use std::net::IpAddr;
use std::os::fd::{AsFd, BorrowedFd};
use tcx_event::{Incoming, Outgoing, StreamAddress};
use tracing::{debug, trace};

const LEN_SIZE: usize = 4;

/// [`Coordinator`] speaking length-prefixed JSON.
#[derive(Debug)]
pub struct StreamCoordinator {
    channel: Option<StreamChannel>,
    inbound: BytesMut,
    max_len: usize,
}

impl StreamCoordinator {
    /// Wraps an already connected channel.
    #[must_use]
    pub fn new(channel: StreamChannel, max_len: u32) -> Self {
        Self {
            channel: Some(channel),
            inbound: BytesMut::new(),
            max_len: max_len as usize,
        }
    }

    /// Dials the coordinator at `address`.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::Io`] if the connection cannot be made.
    pub fn connect(address: &StreamAddress, max_len: u32) -> Result<Self, CoordinatorError> {
        let channel = StreamChannel::connect(address)?;
        debug!(%address, "connected to coordinator");
        Ok(Self::new(channel, max_len))
    }

    fn channel(&mut self) -> Result<&mut StreamChannel, CoordinatorError> {
        self.channel.as_mut().ok_or(CoordinatorError::Closed)
    }

    /// Length of the first buffered message, once its prefix is in.
    fn buffered_len(&self) -> Option<usize> {
        let prefix = self.inbound.get(..LEN_SIZE)?;
        Some(u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize)
    }

    fn decode_one(&mut self) -> Result<Option<Incoming>, CoordinatorError> {
        let Some(len) = self.buffered_len() else {
            return Ok(None);
        };
        if len > self.max_len {
            return Err(CoordinatorError::Protocol(format!(
                "message of {len} bytes exceeds limit of {} bytes",
                self.max_len
            )));
        }
        if self.inbound.len() < LEN_SIZE + len {
            return Ok(None);
        }
        self.inbound.advance(LEN_SIZE);
        let body = self.inbound.split_to(len);
        let message: Incoming = serde_json::from_slice(&body)?;
        trace!(kind = message.kind(), "message from coordinator");
        Ok(Some(message))
    }
}

impl Coordinator for StreamCoordinator {
    fn send(&mut self, message: Outgoing) -> Result<(), CoordinatorError> {
        let body = serde_json::to_vec(&message)?;
        let len = u32::try_from(body.len()).map_err(|_| {
            CoordinatorError::Protocol(format!("message of {} bytes is too long", body.len()))
        })?;
        let mut buf = BytesMut::with_capacity(LEN_SIZE + body.len());
        buf.put_u32(len);
        buf.put_slice(&body);
        trace!(kind = message.kind(), "message to coordinator");
        self.channel()?.write_all_blocking(&buf)?;
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Incoming>, CoordinatorError> {
        if let Some(message) = self.decode_one()? {
            return Ok(Some(message));
        }
        let mut buf = std::mem::take(&mut self.inbound);
        let result = self.channel()?.read_into(&mut buf);
        self.inbound = buf;
        match result {
            Ok(0) => {
                self.channel = None;
                Err(CoordinatorError::Closed)
            }
            Ok(_) => self.decode_one(),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.channel.as_ref().map(AsFd::as_fd)
    }

    fn has_buffered(&self) -> bool {
        self.buffered_len()
            .is_some_and(|len| self.inbound.len() >= LEN_SIZE + len)
    }

    fn local_ip(&self) -> Option<IpAddr> {
        self.channel.as_ref().and_then(StreamChannel::local_ip)
    }

    fn close(&mut self) {
        self.channel = None;
        self.inbound.clear();
    }
}
