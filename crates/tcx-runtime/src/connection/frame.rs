//! Port-to-port stream framing.
//!
//! # Wire Format
//!
//! All integers are big-endian.
//!
//! ```text
//! ┌──────────────┬────────┬────────────────┬───────────┬───────────┐
//! │ body_len u32 │ tag u8 │ name_len u32   │ type name │ payload   │
//! └──────────────┴────────┴────────────────┴───────────┴───────────┘
//!                 ◄──────────────── body_len bytes ────────────────►
//! ```
//!
//! A `LAST` frame has no type name and no payload; its encoding is
//! exactly `00 00 00 01 00`.
//!
//! | Tag | Value | Meaning |
//! |-----|-------|---------|
//! | `LAST` | 0 | End of stream, termination handshake |
//! | `MESSAGE` | 1 | Message-based communication |
//! | `CALL` | 2 | Procedure call |
//! | `REPLY` | 3 | Procedure reply |
//! | `EXCEPTION` | 4 | Procedure exception |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use tcx_types::ErrorCode;
use thiserror::Error;

const LEN_SIZE: usize = 4;

/// Kind of data carried by a non-terminating frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Message,
    Call,
    Reply,
    Exception,
}

impl MessageKind {
    /// Wire tag of this kind.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Message => 1,
            Self::Call => 2,
            Self::Reply => 3,
            Self::Exception => 4,
        }
    }

    /// Parses a non-`LAST` wire tag.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Message),
            2 => Some(Self::Call),
            3 => Some(Self::Reply),
            4 => Some(Self::Exception),
            _ => None,
        }
    }

    /// Plain name of an item of this kind.
    #[must_use]
    pub const fn noun(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Call => "call",
            Self::Reply => "reply",
            Self::Exception => "exception",
        }
    }

    /// What the port calls an unsupported item of this kind.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Message => "message type",
            Self::Call => "call of signature",
            Self::Reply => "reply to signature",
            Self::Exception => "exception of signature",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Message => "MESSAGE",
            Self::Call => "CALL",
            Self::Reply => "REPLY",
            Self::Exception => "EXCEPTION",
        })
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Termination handshake.
    Last,
    /// Typed payload.
    Data {
        kind: MessageKind,
        type_name: String,
        payload: Bytes,
    },
}

impl Frame {
    /// Builds a data frame.
    #[must_use]
    pub fn data(kind: MessageKind, type_name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::Data {
            kind,
            type_name: type_name.into(),
            payload: payload.into(),
        }
    }

    /// Length of the body following the length prefix; this is what a
    /// [`FrameDecoder`] compares against its limit.
    #[must_use]
    pub fn body_len(&self) -> usize {
        match self {
            Self::Last => 1,
            Self::Data {
                type_name, payload, ..
            } => 1 + LEN_SIZE + type_name.len() + payload.len(),
        }
    }

    /// Appends the wire encoding of this frame to `dst`.
    ///
    /// # Errors
    ///
    /// [`FrameError::TooLarge`] if the body does not fit the u32 length
    /// prefix.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        match self {
            Self::Last => {
                dst.reserve(LEN_SIZE + 1);
                dst.put_u32(1);
                dst.put_u8(0);
            }
            Self::Data {
                kind,
                type_name,
                payload,
            } => {
                let body = self.body_len();
                let body_len = u32::try_from(body).map_err(|_| FrameError::TooLarge {
                    len: body,
                    max: u32::MAX as usize,
                })?;
                let name_len = u32::try_from(type_name.len()).map_err(|_| FrameError::TooLarge {
                    len: type_name.len(),
                    max: u32::MAX as usize,
                })?;
                dst.reserve(LEN_SIZE + body);
                dst.put_u32(body_len);
                dst.put_u8(kind.tag());
                dst.put_u32(name_len);
                dst.put_slice(type_name.as_bytes());
                dst.put_slice(payload);
            }
        }
        Ok(())
    }

    /// Encodes into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`Frame::encode`].
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Incremental decoder over a reassembly buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder rejecting bodies longer than `max_len`.
    #[must_use]
    pub fn new(max_len: u32) -> Self {
        Self {
            max_len: max_len as usize,
        }
    }

    /// Takes one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the frame is
    /// still incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] for an oversized, truncated or mistagged
    /// frame. The buffer contents are unspecified afterwards.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < LEN_SIZE {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if body_len > self.max_len {
            return Err(FrameError::TooLarge {
                len: body_len,
                max: self.max_len,
            });
        }
        if body_len == 0 {
            return Err(FrameError::Truncated("empty frame body"));
        }
        if buf.len() < LEN_SIZE + body_len {
            buf.reserve(LEN_SIZE + body_len - buf.len());
            return Ok(None);
        }

        buf.advance(LEN_SIZE);
        let mut body = buf.split_to(body_len).freeze();
        let tag = body.get_u8();
        if tag == 0 {
            if body.has_remaining() {
                return Err(FrameError::Truncated("LAST frame with a body"));
            }
            return Ok(Some(Frame::Last));
        }
        let kind = MessageKind::from_tag(tag).ok_or(FrameError::InvalidTag(tag))?;
        if body.remaining() < LEN_SIZE {
            return Err(FrameError::Truncated("missing type name length"));
        }
        let name_len = body.get_u32() as usize;
        if body.remaining() < name_len {
            return Err(FrameError::Truncated("type name exceeds frame"));
        }
        let name = body.split_to(name_len);
        let type_name = std::str::from_utf8(&name)
            .map_err(|_| FrameError::InvalidTypeName)?
            .to_owned();
        Ok(Some(Frame::Data {
            kind,
            type_name,
            payload: body,
        }))
    }

    /// Takes every complete frame off the front of `buf`.
    ///
    /// # Errors
    ///
    /// See [`FrameDecoder::decode`].
    pub fn decode_all(&self, buf: &mut BytesMut) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.decode(buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// Malformed frame from a peer.
///
/// | Error | Code | Recoverable |
/// |-------|------|-------------|
/// | [`FrameError::InvalidTag`] | `FRAME_INVALID_TAG` | No |
/// | [`FrameError::TooLarge`] | `FRAME_TOO_LARGE` | No |
/// | [`FrameError::InvalidTypeName`] | `FRAME_INVALID_TYPE_NAME` | No |
/// | [`FrameError::Truncated`] | `FRAME_TRUNCATED` | No |
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid frame tag {0}")]
    InvalidTag(u8),

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },

    #[error("type name is not valid UTF-8")]
    InvalidTypeName,

    #[error("truncated frame: {0}")]
    Truncated(&'static str),
}

impl ErrorCode for FrameError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTag(_) => "FRAME_INVALID_TAG",
            Self::TooLarge { .. } => "FRAME_TOO_LARGE",
            Self::InvalidTypeName => "FRAME_INVALID_TYPE_NAME",
            Self::Truncated(_) => "FRAME_TRUNCATED",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tcx_types::assert_error_codes;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(1 << 20)
    }

    #[test]
    fn last_frame_encoding() {
        let bytes = Frame::Last.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 1, 0]);
    }

    #[test]
    fn message_frame_layout() {
        let bytes = Frame::data(MessageKind::Message, "T", &b"abc"[..])
            .to_bytes()
            .unwrap();
        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 9, 1, 0, 0, 0, 1, b'T', b'a', b'b', b'c']
        );
    }

    #[test]
    fn partial_frame_waits() {
        let bytes = Frame::data(MessageKind::Call, "sig", &b"x"[..])
            .to_bytes()
            .unwrap();
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);
        assert_eq!(decoder().decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), bytes.len() - 1);

        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        let frame = decoder().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::data(MessageKind::Call, "sig", &b"x"[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn several_frames_in_one_read() {
        let mut buf = BytesMut::new();
        Frame::data(MessageKind::Reply, "r", &b""[..])
            .encode(&mut buf)
            .unwrap();
        Frame::Last.encode(&mut buf).unwrap();
        buf.extend_from_slice(&[0, 0]);

        let frames = decoder().decode_all(&mut buf).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Frame::Last);
        assert_eq!(&buf[..], &[0, 0]);
    }

    #[test]
    fn body_len_matches_decoder_limit() {
        let frame = Frame::data(MessageKind::Message, "T", &b"abc"[..]);
        assert_eq!(frame.body_len(), 9);

        let bytes = frame.to_bytes().unwrap();
        let mut at_limit = BytesMut::from(&bytes[..]);
        assert_eq!(FrameDecoder::new(9).decode(&mut at_limit).unwrap(), Some(frame));

        let mut over = BytesMut::from(&bytes[..]);
        assert_eq!(
            FrameDecoder::new(8).decode(&mut over),
            Err(FrameError::TooLarge { len: 9, max: 8 })
        );
    }

    #[test]
    fn rejects_bad_frames() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 1, 9][..]);
        assert_eq!(decoder().decode(&mut buf), Err(FrameError::InvalidTag(9)));

        let mut buf = BytesMut::from(&[0xffu8, 0, 0, 0][..]);
        assert!(matches!(
            decoder().decode(&mut buf),
            Err(FrameError::TooLarge { .. })
        ));

        let mut buf = BytesMut::from(&[0u8, 0, 0, 5, 1, 0, 0, 0, 7][..]);
        assert!(matches!(
            decoder().decode(&mut buf),
            Err(FrameError::Truncated(_))
        ));

        let mut buf = BytesMut::from(&[0u8, 0, 0, 6, 1, 0, 0, 0, 1, 0xff][..]);
        assert_eq!(decoder().decode(&mut buf), Err(FrameError::InvalidTypeName));
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(
            &[
                FrameError::InvalidTag(7),
                FrameError::TooLarge { len: 2, max: 1 },
                FrameError::InvalidTypeName,
                FrameError::Truncated("x"),
            ],
            "FRAME_",
        );
    }

    fn kind_strategy() -> impl Strategy<Value = MessageKind> {
        prop_oneof![
            Just(MessageKind::Message),
            Just(MessageKind::Call),
            Just(MessageKind::Reply),
            Just(MessageKind::Exception),
        ]
    }

    fn frame_strategy() -> impl Strategy<Value = Frame> {
        prop_oneof![
            1 => Just(Frame::Last),
            4 => (
                kind_strategy(),
                "[A-Za-z_][A-Za-z0-9_.]{0,24}",
                prop::collection::vec(any::<u8>(), 0..256),
            )
                .prop_map(|(kind, name, payload)| Frame::data(kind, name, payload)),
        ]
    }

    proptest! {
        /// Any byte-level split of a frame sequence decodes to the same frames.
        #[test]
        fn split_stream_reassembles(
            frames in prop::collection::vec(frame_strategy(), 1..8),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let mut wire = BytesMut::new();
            for frame in &frames {
                frame.encode(&mut wire).unwrap();
            }
            let wire = wire.freeze();

            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
            points.push(wire.len());
            points.sort_unstable();

            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            let mut start = 0;
            for end in points {
                buf.extend_from_slice(&wire[start..end]);
                start = end;
                decoded.extend(decoder().decode_all(&mut buf).unwrap());
            }

            prop_assert_eq!(decoded, frames);
            prop_assert!(buf.is_empty());
        }
    }
}
