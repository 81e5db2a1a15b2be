//! # Frame
//!
//! The `frame` module implements the relay's wire unit as defined in
//! [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//! Each frame carries the payload plus the protocol-level metadata needed to
//! reconstruct a logical message on the far side.
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
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! Frames come in two categories:
//!
//! - **Data frames** (`Text`, `Binary`, `Continuation`) carry application
//!   payload; these are the only frames the relay forwards.
//! - **Control frames** (`Close`, `Ping`, `Pong`) manage the connection and
//!   are handled internally, never relayed.
//!
//! The three reserved header bits are carried verbatim through encode and
//! decode; the relay neither sets nor interprets them.
//!
//! The legacy (pre-RFC) framing variant has none of this structure — a single
//! leading type byte and a trailing sentinel — and is handled entirely by the
//! [`codec`](crate::codec) module.

use bytes::{Bytes, BytesMut};

use crate::{RelayError, Result};

/// Largest payload length representable by the 64-bit extended length field.
///
/// The most significant bit of the 8-byte extension must be zero, so lengths
/// above this value are rejected with [`RelayError::InvalidLength`].
pub const MAX_PAYLOAD_LEN: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Worst-case frame header: 2 fixed bytes, 8 extended-length bytes, 4 mask
/// key bytes.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// Frame operation code, determining the semantic meaning of a frame.
///
/// The numeric values are defined in
/// [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// Continuation = 0x0, Text = 0x1, Binary = 0x2, Close = 0x8, Ping = 0x9,
/// Pong = 0xA. The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected on
/// decode.
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
    /// Returns `true` if the opcode represents a control frame (`Close`,
    /// `Ping`, or `Pong`).
    ///
    /// Control frames cannot be fragmented and are processed immediately
    /// rather than queued with data frames.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = RelayError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(RelayError::InvalidOpCode(value)),
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

/// One wire unit of the modern framing variant.
///
/// # Fields
/// - `fin`: final-fragment flag; `true` on the last (or only) frame of a
///   message.
/// - `rsv`: the three reserved header bits, round-tripped verbatim.
/// - `opcode`: frame type.
/// - `payload`: frame data, immutable bytes.
///
/// The optional masking key is private: it is observed on decode and may be
/// injected with [`Frame::with_mask`], but masking itself is applied by the
/// [`Encoder`](crate::codec::Encoder) so the payload held here is always
/// clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The three reserved protocol bits, carried verbatim.
    pub rsv: u8,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The masking key for the frame, if any.
    mask: Option<[u8; 4]>,
    /// The payload of the frame, containing the actual data.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with zero reserved bits and no masking key.
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Creates a final text frame with the given payload.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, payload)
    }

    /// Creates a final binary frame with the given payload.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, payload)
    }

    /// Creates a continuation frame, final unless amended with
    /// [`Frame::with_fin`].
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, payload)
    }

    /// Creates a close frame with a raw payload.
    ///
    /// The payload is not validated against the close-frame layout; the relay
    /// forwards nothing from close frames and does not interpret them.
    pub fn close(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Close, payload)
    }

    /// Creates a ping frame used to check connection liveness.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    /// Creates a pong frame in response to a ping.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    /// Sets the final-fragment flag.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Sets the reserved header bits. Only the low three bits are encoded.
    pub fn with_rsv(mut self, rsv: u8) -> Self {
        self.rsv = rsv;
        self
    }

    /// Sets an explicit masking key, forcing the mask bit on encode.
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Returns the masking key, if one was injected or observed on decode.
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Replaces the payload with one of exactly `payload_len` bytes built by
    /// repeating the current payload.
    ///
    /// This is a testing hook for synthesizing frames of a specific length
    /// from short content; it has no role in ordinary relay operation.
    ///
    /// # Errors
    /// [`RelayError::InvalidLength`] when `payload_len` exceeds
    /// [`MAX_PAYLOAD_LEN`] or the current payload is empty (nothing to
    /// repeat).
    pub fn with_payload_len(self, payload_len: u64) -> Result<Self> {
        if payload_len > MAX_PAYLOAD_LEN || self.payload.is_empty() {
            return Err(RelayError::InvalidLength(payload_len));
        }

        let len = payload_len as usize;
        let mut repeated = BytesMut::with_capacity(len);
        while repeated.len() < len {
            let take = (len - repeated.len()).min(self.payload.len());
            repeated.extend_from_slice(&self.payload[..take]);
        }

        Ok(Self {
            payload: repeated.freeze(),
            ..self
        })
    }

    /// Formats the frame header into `head` and returns its size in bytes.
    ///
    /// Byte 0 is `fin << 7 | (rsv & 0x7) << 4 | opcode`; byte 1 carries the
    /// mask bit (when `key` is present) and the length class: payloads of up
    /// to 125 bytes encode inline, up to `0xFFFF` as a 16-bit extension, and
    /// anything larger as a 64-bit extension. The mask key, when present,
    /// follows the length bytes.
    ///
    /// # Errors
    /// [`RelayError::InvalidLength`] when the payload length exceeds
    /// [`MAX_PAYLOAD_LEN`].
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn encode_head(&self, key: Option<[u8; 4]>, head: &mut [u8]) -> Result<usize> {
        let len = self.payload.len() as u64;
        if len > MAX_PAYLOAD_LEN {
            return Err(RelayError::InvalidLength(len));
        }

        head[0] = (self.fin as u8) << 7 | (self.rsv & 0x07) << 4 | u8::from(self.opcode);

        let mut size = if len <= 125 {
            head[1] = len as u8;
            2
        } else if len <= 0xFFFF {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&len.to_be_bytes());
            10
        };

        if let Some(key) = key {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&key);
            size += 4;
        }

        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod opcode_tests {
        use super::*;

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
        fn test_try_from_u8_valid() {
            assert_eq!(OpCode::try_from(0x0).unwrap(), OpCode::Continuation);
            assert_eq!(OpCode::try_from(0x1).unwrap(), OpCode::Text);
            assert_eq!(OpCode::try_from(0x2).unwrap(), OpCode::Binary);
            assert_eq!(OpCode::try_from(0x8).unwrap(), OpCode::Close);
            assert_eq!(OpCode::try_from(0x9).unwrap(), OpCode::Ping);
            assert_eq!(OpCode::try_from(0xA).unwrap(), OpCode::Pong);
        }

        #[test]
        fn test_try_from_u8_invalid() {
            for &code in &[0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
                assert!(matches!(
                    OpCode::try_from(code),
                    Err(RelayError::InvalidOpCode(b)) if b == code
                ));
            }
        }
    }

    mod head_tests {
        use super::*;

        fn head_of(frame: &Frame, key: Option<[u8; 4]>) -> (Vec<u8>, usize) {
            let mut head = [0u8; MAX_HEAD_SIZE];
            let size = frame.encode_head(key, &mut head).unwrap();
            (head.to_vec(), size)
        }

        #[test]
        fn test_inline_length() {
            let frame = Frame::text(vec![0u8; 125]);
            let (head, size) = head_of(&frame, None);

            assert_eq!(size, 2);
            assert_eq!(head[0], 0x81); // FIN=1, RSV=0, opcode=Text
            assert_eq!(head[1], 125);
        }

        #[test]
        fn test_sixteen_bit_extension() {
            for len in [126usize, 65535] {
                let frame = Frame::binary(vec![0u8; len]);
                let (head, size) = head_of(&frame, None);

                assert_eq!(size, 4);
                assert_eq!(head[1], 126);
                assert_eq!(u16::from_be_bytes([head[2], head[3]]) as usize, len);
            }
        }

        #[test]
        fn test_sixty_four_bit_extension() {
            let frame = Frame::binary(vec![0u8; 65536]);
            let (head, size) = head_of(&frame, None);

            assert_eq!(size, 10);
            assert_eq!(head[1], 127);
            assert_eq!(u64::from_be_bytes(head[2..10].try_into().unwrap()), 65536);
        }

        #[test]
        fn test_mask_bit_and_key() {
            let key = [0xAA, 0xBB, 0xCC, 0xDD];
            let frame = Frame::text("Header test");
            let (head, size) = head_of(&frame, Some(key));

            assert_eq!(size, 2 + 4);
            assert_eq!(head[1], 0x80 | 11);
            assert_eq!(&head[2..6], &key);
        }

        #[test]
        fn test_rsv_bits_encoded() {
            let frame = Frame::binary("x").with_rsv(0b101);
            let (head, _) = head_of(&frame, None);

            assert_eq!(head[0], 0x80 | 0b101 << 4 | 0x2);
        }

        #[test]
        fn test_fin_clear_on_fragment() {
            let frame = Frame::continuation("x").with_fin(false);
            let (head, _) = head_of(&frame, None);

            assert_eq!(head[0], 0x00);
        }
    }

    mod payload_len_tests {
        use super::*;

        #[test]
        fn test_repeats_payload_to_length() {
            let frame = Frame::binary("abc").with_payload_len(8).unwrap();
            assert_eq!(&frame.payload[..], b"abcabcab");
        }

        #[test]
        fn test_exact_multiple() {
            let frame = Frame::text("ab").with_payload_len(6).unwrap();
            assert_eq!(&frame.payload[..], b"ababab");
        }

        #[test]
        fn test_rejects_length_over_protocol_maximum() {
            let err = Frame::binary("ab")
                .with_payload_len(MAX_PAYLOAD_LEN + 1)
                .unwrap_err();
            assert!(matches!(err, RelayError::InvalidLength(_)));
        }

        #[test]
        fn test_rejects_empty_source_payload() {
            let err = Frame::binary(Bytes::new()).with_payload_len(4).unwrap_err();
            assert!(matches!(err, RelayError::InvalidLength(4)));
        }
    }
}
