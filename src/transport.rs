//! Frame I/O of one connection over a blocking [`Socket`].
//!
//! The [`FrameReader`] belongs to the worker thread and turns received bytes into complete
//! messages and control frames. The [`FrameWriter`] sits behind the endpoint's write lock and
//! puts every frame on the wire with a single write.
use std::{io, sync::Arc};

use bytes::BytesMut;
use tokio_util::codec::{Decoder as _, Encoder as _};

use crate::{
    cancel::{CancellationRequest, StopFlag},
    close::CloseCode,
    codec,
    compression::{Compressor, Decompressor},
    frame::{Frame, OpCode},
    socket::{is_idle, Socket},
    traffic, Result, Role, WebSocketError,
};

/// Size of a single `recv` into the read buffer.
const READ_CHUNK: usize = 16 * 1024;

/// Maps an error that ends a connection to the status code of the close frame sent for it.
pub(crate) fn close_code_for(err: &WebSocketError) -> CloseCode {
    match err {
        WebSocketError::FrameTooLarge => CloseCode::Size,
        WebSocketError::InvalidOpCode(_) => CloseCode::Unsupported,
        WebSocketError::InvalidUTF8 => CloseCode::Invalid,
        WebSocketError::ReservedBitsNotZero
        | WebSocketError::ControlFrameFragmented
        | WebSocketError::ControlFrameTooLarge
        | WebSocketError::InvalidFragment
        | WebSocketError::InvalidContinuationFrame
        | WebSocketError::InvalidCloseFrame
        | WebSocketError::InvalidCloseCode
        | WebSocketError::UnmaskedFrame
        | WebSocketError::MaskedFrame
        | WebSocketError::CompressionNotSupported => CloseCode::Protocol,
        _ => CloseCode::Error,
    }
}

/// A complete message or control frame together with the bytes it took on the wire.
#[derive(Debug)]
pub(crate) struct Incoming {
    pub(crate) frame: Frame,
    pub(crate) wire_size: usize,
}

/// Header of a fragmented message being reassembled.
struct Fragment {
    opcode: OpCode,
    is_compressed: bool,
}

// ================== FrameReader ====================

/// Read side of a connection.
pub(crate) struct FrameReader {
    socket: Arc<dyn Socket>,
    decoder: codec::Decoder,
    buffer: BytesMut,
    inflate: Option<Decompressor>,
    fragment: Option<Fragment>,
    accumulated: BytesMut,
    /// Wire bytes consumed by the decoder since the last complete message.
    consumed: usize,
    max_read_buffer: usize,
    check_utf8: bool,
}

impl FrameReader {
    pub(crate) fn new(
        socket: Arc<dyn Socket>,
        role: Role,
        inflate: Option<Decompressor>,
        max_payload_read: usize,
        max_read_buffer: usize,
        check_utf8: bool,
    ) -> Self {
        Self {
            socket,
            decoder: codec::Decoder::new(role, max_payload_read),
            buffer: BytesMut::with_capacity(READ_CHUNK),
            inflate,
            fragment: None,
            accumulated: BytesMut::with_capacity(1024),
            consumed: 0,
            max_read_buffer,
            check_utf8,
        }
    }

    /// Blocks until a complete message or control frame arrives.
    ///
    /// `cancel` is polled whenever the buffered bytes hold no complete frame, so the call returns
    /// [`WebSocketError::Cancelled`] at most one socket poll interval after it fires. End of
    /// stream yields [`WebSocketError::ConnectionClosed`].
    pub(crate) fn read_next(&mut self, cancel: &dyn CancellationRequest) -> Result<Incoming> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            while let Some(frame) = self.decode_frame()? {
                if let Some(frame) = self.on_frame(frame)? {
                    let wire_size = std::mem::take(&mut self.consumed);
                    return Ok(Incoming { frame, wire_size });
                }
            }

            if cancel.is_cancellation_requested() {
                return Err(WebSocketError::Cancelled);
            }

            match self.socket.recv(&mut chunk) {
                Ok(0) => return Err(WebSocketError::ConnectionClosed),
                Ok(n) => {
                    traffic::track(n, true);
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
                Err(err) if is_idle(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn decode_frame(&mut self) -> Result<Option<Frame>> {
        let before = self.buffer.len();
        let frame = self.decoder.decode(&mut self.buffer)?;
        self.consumed += before - self.buffer.len();
        Ok(frame)
    }

    /// Reassembles fragments and validates complete messages.
    ///
    /// Returns `None` while a fragmented message is still incomplete.
    fn on_frame(&mut self, mut frame: Frame) -> Result<Option<Frame>> {
        if frame.is_compressed && self.inflate.is_none() {
            return Err(WebSocketError::CompressionNotSupported);
        }

        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }

                if !frame.fin {
                    if frame.payload.len() >= self.max_read_buffer {
                        return Err(WebSocketError::FrameTooLarge);
                    }
                    self.fragment = Some(Fragment {
                        opcode: frame.opcode,
                        is_compressed: frame.is_compressed,
                    });
                    self.accumulated.extend_from_slice(&frame.payload);
                    return Ok(None);
                }

                if frame.is_compressed {
                    frame.payload = self.inflate(&frame.payload)?;
                    frame.is_compressed = false;
                }
                self.check_text(&frame)?;

                Ok(Some(frame))
            }
            OpCode::Continuation => {
                let Some(fragment) = self.fragment.as_ref() else {
                    return Err(WebSocketError::InvalidContinuationFrame);
                };

                if self.accumulated.len() + frame.payload.len() >= self.max_read_buffer {
                    return Err(WebSocketError::FrameTooLarge);
                }
                self.accumulated.extend_from_slice(&frame.payload);

                if !frame.fin {
                    return Ok(None);
                }

                let opcode = fragment.opcode;
                let is_compressed = fragment.is_compressed;
                self.fragment = None;

                // hand the buffer over and start a small one so a huge message does not pin memory
                let payload = std::mem::replace(&mut self.accumulated, BytesMut::with_capacity(1024));
                let payload = if is_compressed {
                    self.inflate(&payload)?
                } else {
                    payload
                };

                let frame = Frame::new(true, opcode, None, payload);
                self.check_text(&frame)?;

                Ok(Some(frame))
            }
            OpCode::Close => {
                check_close(&frame)?;
                Ok(Some(frame))
            }
            OpCode::Ping | OpCode::Pong => Ok(Some(frame)),
        }
    }

    fn inflate(&mut self, payload: &[u8]) -> Result<BytesMut> {
        let inflate = self
            .inflate
            .as_mut()
            .ok_or(WebSocketError::CompressionNotSupported)?;
        inflate.decompress(payload, self.max_read_buffer)
    }

    fn check_text(&self, frame: &Frame) -> Result<()> {
        if !self.check_utf8 || frame.opcode != OpCode::Text {
            return Ok(());
        }

        #[cfg(not(feature = "simd"))]
        if std::str::from_utf8(&frame.payload).is_err() {
            return Err(WebSocketError::InvalidUTF8);
        }
        #[cfg(feature = "simd")]
        if simdutf8::basic::from_utf8(&frame.payload).is_err() {
            return Err(WebSocketError::InvalidUTF8);
        }

        Ok(())
    }
}

/// Validates the payload of a received close frame.
fn check_close(frame: &Frame) -> Result<()> {
    match frame.payload.len() {
        0 => Ok(()),
        1 => Err(WebSocketError::InvalidCloseFrame),
        _ => {
            let allowed = frame.close_code().is_some_and(CloseCode::is_allowed);
            if !allowed {
                return Err(WebSocketError::InvalidCloseCode);
            }
            frame.close_reason()?;
            Ok(())
        }
    }
}

// ================== FrameWriter ====================

/// Write side of a connection.
///
/// Data frames are compressed when permessage-deflate was negotiated and masked in client role.
/// Every frame is encoded into one buffer and handed to [`Socket::write_bytes`] at once, so
/// frames written by different threads never interleave.
pub(crate) struct FrameWriter {
    socket: Arc<dyn Socket>,
    encoder: codec::Encoder,
    deflate: Option<Compressor>,
    cancel: StopFlag,
}

impl FrameWriter {
    pub(crate) fn new(
        socket: Arc<dyn Socket>,
        role: Role,
        deflate: Option<Compressor>,
        cancel: StopFlag,
    ) -> Self {
        Self {
            socket,
            encoder: codec::Encoder::new(role),
            deflate,
            cancel,
        }
    }

    /// Compresses a data frame when compression was negotiated. Control frames pass through.
    pub(crate) fn compress(&mut self, frame: Frame) -> io::Result<Frame> {
        match self.deflate.as_mut() {
            Some(deflate) if !frame.opcode.is_control() => {
                let output = deflate.compress(&frame.payload)?;
                Ok(Frame::compress(frame.fin, frame.opcode, None, output))
            }
            _ => Ok(frame),
        }
    }

    /// Encodes `frame` and writes it, returning the number of bytes put on the wire.
    pub(crate) fn write_frame(&mut self, frame: Frame) -> Result<usize> {
        let mut buf = BytesMut::new();
        self.encoder.encode(frame, &mut buf)?;

        self.socket.write_bytes(&buf, &self.cancel)?;
        traffic::track(buf.len(), false);

        Ok(buf.len())
    }

    /// Compresses and writes `frame`.
    pub(crate) fn send(&mut self, frame: Frame) -> Result<usize> {
        let frame = self.compress(frame)?;
        self.write_frame(frame)
    }
}
