//! Frame encoder and decoder over `BytesMut` buffers.
//!
//! Both halves implement the `tokio_util::codec` traits. The endpoint drives them synchronously:
//! the worker appends received bytes to a buffer and calls [`Decoder::decode`] until it yields
//! `None`, while senders encode each frame into a fresh buffer that is written in one piece.
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_HEAD_SIZE},
    Role, WebSocketError,
};

/// Fields of the fixed two-byte header.
struct Header {
    fin: bool,
    rsv1: bool,
    masked: bool,
    opcode: OpCode,
    /// 7-bit length, or 126/127 when an extended length follows.
    length_code: u8,
}

impl Header {
    /// Number of bytes following the fixed header: extended length plus masking key.
    fn extra_len(&self) -> usize {
        let length = match self.length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        length + if self.masked { 4 } else { 0 }
    }
}

enum ReadState {
    Header(Header),
    Payload {
        header: Header,
        mask: Option<[u8; 4]>,
        payload_len: usize,
    },
}

/// Decodes frames for one side of a connection.
///
/// A server decoder requires every frame to be masked and unmasks it; a client decoder refuses
/// masked frames. Frames whose payload reaches `max_payload_size` are rejected before their
/// payload is buffered.
pub struct Decoder {
    role: Role,
    state: Option<ReadState>,
    max_payload_size: usize,
}

impl Decoder {
    pub fn new(role: Role, max_payload_size: usize) -> Self {
        Self {
            role,
            state: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    if src[0] & 0b0011_0000 != 0 {
                        return Err(WebSocketError::ReservedBitsNotZero);
                    }

                    let header = Header {
                        fin: src[0] & 0b1000_0000 != 0,
                        rsv1: src[0] & 0b0100_0000 != 0,
                        opcode: OpCode::try_from(src[0] & 0b0000_1111)?,
                        masked: src[1] & 0b1000_0000 != 0,
                        length_code: src[1] & 0x7F,
                    };

                    match (self.role, header.masked) {
                        (Role::Server, false) => return Err(WebSocketError::UnmaskedFrame),
                        (Role::Client, true) => return Err(WebSocketError::MaskedFrame),
                        _ => {}
                    }

                    src.advance(2);
                    self.state = Some(ReadState::Header(header));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.extra_len() {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len = match header.length_code {
                        126 => usize::from(src.get_u16()),
                        127 => usize::try_from(src.get_u64())
                            .map_err(|_| WebSocketError::FrameTooLarge)?,
                        code => usize::from(code),
                    };

                    let mask = header.masked.then(|| src.get_u32().to_be_bytes());

                    if header.opcode.is_control() && !header.fin {
                        return Err(WebSocketError::ControlFrameFragmented);
                    }
                    if header.opcode.is_control() && payload_len > 125 {
                        return Err(WebSocketError::ControlFrameTooLarge);
                    }
                    if payload_len >= self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    src.reserve(payload_len.saturating_sub(src.remaining()));
                    self.state = Some(ReadState::Payload {
                        header,
                        mask,
                        payload_len,
                    });
                }
                Some(ReadState::Payload {
                    header,
                    mask,
                    payload_len,
                }) => {
                    if src.remaining() < payload_len {
                        self.state = Some(ReadState::Payload {
                            header,
                            mask,
                            payload_len,
                        });
                        return Ok(None);
                    }

                    let payload = src.split_to(payload_len);
                    let mut frame = if header.rsv1 {
                        Frame::compress(header.fin, header.opcode, mask, payload)
                    } else {
                        Frame::new(header.fin, header.opcode, mask, payload)
                    };
                    frame.unmask();

                    break Ok(Some(frame));
                }
            }
        }
    }
}

/// Serializes frames, masking them with a fresh random key in client role.
pub struct Encoder {
    role: Role,
}

impl Encoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.role == Role::Client {
            frame.mask();
        }

        let mut head = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}
