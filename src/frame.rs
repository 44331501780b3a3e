//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Extended payload length continued, if payload len == 127  |
//! +---------------------------------------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! The endpoint builds and consumes frames internally. They are public so that custom
//! transports and tests can produce byte-exact traffic with [`crate::codec`].
//!
//! ```rust
//! use tether::{frame::Frame, CloseCode, OpCode};
//!
//! let text = Frame::text("Hello");
//! let close = Frame::close(CloseCode::Normal, b"bye");
//! assert_eq!(close.opcode, OpCode::Close);
//! assert_eq!(close.close_code(), Some(CloseCode::Normal));
//! ```
use bytes::BytesMut;

use crate::{close::CloseCode, WebSocketError};

/// Frame type identifier.
///
/// `Continuation` (0x0), `Text` (0x1) and `Binary` (0x2) carry data; `Close` (0x8), `Ping` (0x9)
/// and `Pong` (0xA) are control frames. Every other value is reserved and rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Control frames may not be fragmented and carry at most 125 bytes.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Largest possible frame header: 2 fixed bytes, 8 length bytes and 4 mask bytes.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// A single WebSocket frame.
///
/// A decoded frame keeps its masking key until [`Frame::unmask`] is called, so `payload` holds
/// the bytes exactly as they were on the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Whether this frame ends its message.
    pub fin: bool,
    pub opcode: OpCode,
    /// RSV1, set on the first frame of a permessage-deflate compressed message.
    pub(crate) is_compressed: bool,
    mask: Option<[u8; 4]>,
    pub payload: BytesMut,
}

impl Frame {
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
            is_compressed: false,
        }
    }

    /// Creates a frame whose payload was compressed with permessage-deflate (RSV1 set).
    pub fn compress(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            is_compressed: true,
            ..Self::new(fin, opcode, mask, payload)
        }
    }

    pub fn text(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Text, None, payload.as_ref())
    }

    pub fn binary(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Binary, None, payload.as_ref())
    }

    pub fn ping(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Ping, None, payload.as_ref())
    }

    pub fn pong(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Pong, None, payload.as_ref())
    }

    /// Creates a close frame whose payload is the big-endian code followed by `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);

        Self::new(true, OpCode::Close, None, payload)
    }

    /// Creates a close frame with an arbitrary payload. The payload is not validated.
    pub fn close_raw(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Close, None, payload.as_ref())
    }

    /// Status code of a close frame, `None` when the payload is shorter than two bytes.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code: [u8; 2] = self.payload.get(0..2)?.try_into().ok()?;
        Some(CloseCode::from(u16::from_be_bytes(code)))
    }

    /// Reason text of a close frame, empty when there is none.
    pub fn close_reason(&self) -> Result<&str, WebSocketError> {
        let reason = self.payload.get(2..).unwrap_or_default();
        std::str::from_utf8(reason).map_err(|_| WebSocketError::InvalidUTF8)
    }

    #[inline]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Masks the payload with the frame's key, generating a random key when there is none.
    pub(crate) fn mask(&mut self) {
        let mask = *self.mask.get_or_insert_with(rand::random);
        crate::mask::apply_mask(&mut self.payload, mask);
    }

    /// Reverts the masking of a received frame and forgets the key.
    pub(crate) fn unmask(&mut self) {
        if let Some(mask) = self.mask.take() {
            crate::mask::apply_mask(&mut self.payload, mask);
        }
    }

    /// Writes the frame header into `head` and returns its length.
    ///
    /// `head` must be at least [`MAX_HEAD_SIZE`] bytes long.
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | (self.is_compressed as u8) << 6 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = match len {
            0..=125 => {
                head[1] = len as u8;
                2
            }
            126..=65535 => {
                head[1] = 126;
                head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
                4
            }
            _ => {
                head[1] = 127;
                head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
                10
            }
        };

        match self.mask {
            Some(mask) => {
                head[1] |= 0x80;
                head[size..size + 4].copy_from_slice(&mask);
                size + 4
            }
            None => size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversions() {
        for byte in [0x0u8, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let opcode = OpCode::try_from(byte).unwrap();
            assert_eq!(u8::from(opcode), byte);
        }
        for byte in [0x3u8, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert!(matches!(
                OpCode::try_from(byte),
                Err(WebSocketError::InvalidOpCode(b)) if b == byte
            ));
        }
    }

    #[test]
    fn test_is_control() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Continuation.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
    }

    #[test]
    fn test_close_frame_payload() {
        let frame = Frame::close(CloseCode::Normal, "Normal closure");
        assert_eq!(&frame.payload[..2], &1000u16.to_be_bytes());
        assert_eq!(frame.close_code(), Some(CloseCode::Normal));
        assert_eq!(frame.close_reason().unwrap(), "Normal closure");

        let empty = Frame::close_raw(b"");
        assert_eq!(empty.close_code(), None);
        assert_eq!(empty.close_reason().unwrap(), "");

        let bad = Frame::close_raw([0x03, 0xE8, 0xFF]);
        assert!(bad.close_reason().is_err());
    }

    #[test]
    fn test_mask_generates_key_and_unmask_restores() {
        let mut frame = Frame::binary("Mask me");
        assert!(!frame.is_masked());

        frame.mask();
        assert!(frame.is_masked());

        frame.unmask();
        assert!(!frame.is_masked());
        assert_eq!(&frame.payload[..], b"Mask me");
    }

    #[test]
    fn test_fmt_head_lengths() {
        let mut head = [0u8; MAX_HEAD_SIZE];

        let frame = Frame::new(true, OpCode::Text, Some([0xAA, 0xBB, 0xCC, 0xDD]), "Header test");
        assert_eq!(frame.fmt_head(&mut head), 6);
        assert_eq!(head[0], 0x81);
        assert_eq!(head[1], 0x80 | 11);
        assert_eq!(&head[2..6], &[0xAA, 0xBB, 0xCC, 0xDD]);

        let frame = Frame::binary(vec![0u8; 300]);
        assert_eq!(frame.fmt_head(&mut head), 4);
        assert_eq!(head[1], 126);
        assert_eq!(u16::from_be_bytes([head[2], head[3]]), 300);

        let frame = Frame::binary(vec![0u8; 70_000]);
        assert_eq!(frame.fmt_head(&mut head), 10);
        assert_eq!(head[1], 127);

        let frame = Frame::compress(false, OpCode::Binary, None, "x");
        frame.fmt_head(&mut head);
        assert_eq!(head[0], 0x42);
    }
}
