//! Logical messages: outbound fragmentation and receive-side reassembly.
//!
//! A message is one or more frames sharing a payload — the first frame
//! carries the real opcode, every subsequent one is a continuation, and only
//! the last has `fin` set. The relay deals in complete messages; frames are
//! an encoding detail of the individual connection.

use bytes::{Bytes, BytesMut};

use crate::{
    codec::Mode,
    frame::{Frame, OpCode},
    RelayError, Result,
};

/// A complete application message with its binary/text flag.
///
/// The relay forwards messages unmodified and never interprets the payload;
/// whether the bytes mean a device command, a log line, or anything else is
/// the concern of the two endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The message payload.
    pub payload: Bytes,
    /// `true` for binary messages, `false` for text.
    pub binary: bool,
}

impl Message {
    /// Creates a text message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            binary: false,
        }
    }

    /// Creates a binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            binary: true,
        }
    }

    /// The opcode carried by the first frame of this message.
    pub fn opcode(&self) -> OpCode {
        if self.binary {
            OpCode::Binary
        } else {
            OpCode::Text
        }
    }
}

/// Slices a message into the frames that carry it on the wire.
///
/// With no explicit `frag_size` and no configured `auto_fragment_size` the
/// message becomes exactly one `fin=true` frame. When fragmentation applies
/// and the payload is longer than the fragment size, the payload is cut into
/// `ceil(len / size)` chunks: the first carries the message opcode, the rest
/// are continuations, and only the last has `fin` set.
///
/// # Errors
/// - [`RelayError::InvalidFragmentSize`] for an explicit `frag_size` of zero.
/// - [`RelayError::UnsupportedInLegacyMode`] for a binary payload or any
///   explicit fragmentation request on a legacy connection.
pub fn fragment(
    message: &Message,
    mode: Mode,
    frag_size: Option<usize>,
    auto_fragment_size: Option<usize>,
) -> Result<Vec<Frame>> {
    if mode == Mode::Legacy {
        if message.binary || frag_size.is_some() {
            return Err(RelayError::UnsupportedInLegacyMode);
        }
        return Ok(vec![Frame::new(true, OpCode::Text, message.payload.clone())]);
    }

    if let Some(size) = frag_size {
        if size < 1 {
            return Err(RelayError::InvalidFragmentSize(size));
        }
    }

    let opcode = message.opcode();
    let size = match frag_size.or_else(|| auto_fragment_size.filter(|size| *size > 0)) {
        Some(size) if message.payload.len() > size => size,
        _ => return Ok(vec![Frame::new(true, opcode, message.payload.clone())]),
    };

    let mut frames = Vec::with_capacity(message.payload.len().div_ceil(size));
    let mut offset = 0;
    while offset < message.payload.len() {
        let end = (offset + size).min(message.payload.len());
        let fin = end == message.payload.len();
        let chunk = message.payload.slice(offset..end);
        frames.push(if offset == 0 {
            Frame::new(fin, opcode, chunk)
        } else {
            Frame::new(fin, OpCode::Continuation, chunk)
        });
        offset = end;
    }

    Ok(frames)
}

/// Receive-side reassembly of fragmented messages for one connection.
///
/// Data frames are buffered, concatenating continuation payloads in arrival
/// order, until a frame with `fin=true` completes the message. Control
/// frames never pass through here — the connection loop handles them before
/// reassembly.
#[derive(Debug)]
pub struct Reassembler {
    /// Opcode of the in-flight fragmented message, if any.
    pending: Option<OpCode>,
    /// Accumulated payload of the in-flight message.
    accumulated: BytesMut,
    /// Ceiling on the accumulated size, so a peer cannot grow the buffer
    /// without bound by never finishing a message.
    max_read_buffer: usize,
}

impl Reassembler {
    pub fn new(max_read_buffer: usize) -> Self {
        Self {
            pending: None,
            accumulated: BytesMut::with_capacity(1024),
            max_read_buffer,
        }
    }

    /// Feeds one data frame in, returning the completed message once the
    /// final fragment arrives.
    ///
    /// # Errors
    /// [`RelayError::ProtocolDecode`] for a continuation with no initiating
    /// frame, a new data frame while another message is still in flight, or
    /// a control frame; [`RelayError::FrameTooLarge`] when the accumulated
    /// payload would exceed the configured ceiling.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.pending.is_some() {
                    return Err(RelayError::ProtocolDecode(
                        "data frame while a fragmented message is in flight",
                    ));
                }

                if frame.fin {
                    return Ok(Some(Message {
                        binary: frame.opcode == OpCode::Binary,
                        payload: frame.payload,
                    }));
                }

                self.pending = Some(frame.opcode);
                self.accumulated.extend_from_slice(&frame.payload);
                Ok(None)
            }
            OpCode::Continuation => {
                let opcode = self.pending.ok_or(RelayError::ProtocolDecode(
                    "continuation without an initiating frame",
                ))?;

                if self.accumulated.len() + frame.payload.len() >= self.max_read_buffer {
                    return Err(RelayError::FrameTooLarge);
                }
                self.accumulated.extend_from_slice(&frame.payload);

                if frame.fin {
                    self.pending = None;
                    // hand the buffer over and start fresh, rather than
                    // keeping a potentially huge allocation around
                    let payload =
                        std::mem::replace(&mut self.accumulated, BytesMut::with_capacity(1024));
                    Ok(Some(Message {
                        binary: opcode == OpCode::Binary,
                        payload: payload.freeze(),
                    }))
                } else {
                    Ok(None)
                }
            }
            _ => Err(RelayError::ProtocolDecode(
                "control frame passed to the reassembler",
            )),
        }
    }
}
