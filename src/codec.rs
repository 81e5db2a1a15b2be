//! Streaming frame codec for both framing generations.
//!
//! A connection's framing variant is decided once, at handshake time, and
//! carried as a [`Mode`] on the [`Encoder`] and [`Decoder`] — there is no
//! separate legacy codec type, just a tagged dispatch inside the single
//! encode/decode interface.
//!
//! The modern variant is the RFC 6455 frame format handled by a staged
//! header-then-payload state machine; the legacy (pre-RFC) variant is a bare
//! sentinel-delimited stream: a `0x00` type byte, the UTF-8 payload, and a
//! trailing `0xFF` — no header, no masking, no fragmentation. Operations the
//! legacy wire cannot express fail with
//! [`RelayError::UnsupportedInLegacyMode`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_HEAD_SIZE, MAX_PAYLOAD_LEN},
    mask::apply_mask,
    options::Options,
    RelayError, Result,
};

/// The framing variant a connection speaks, selected at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// RFC 6455 frames: headers, length encoding, masking, fragmentation.
    Modern,
    /// Pre-RFC sentinel-delimited framing: `0x00 <utf-8 payload> 0xFF`.
    Legacy,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Modern => write!(f, "modern"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// The role a connection endpoint is taking.
///
/// The role drives the default masking policy: clients mask outbound frames,
/// servers do not. Both directions can be overridden through
/// [`Options::mask_client_frames`] and [`Options::mask_server_frames`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

// ================ Encoder ====================

/// Frame encoder for one connection.
///
/// Serializes a [`Frame`] into wire bytes: header, extended length, masking
/// key, and (masked or plain) payload for modern connections; the sentinel
/// envelope for legacy ones. When the masking policy applies and the frame
/// carries no explicit key, a fresh random 32-bit key is generated per frame.
#[derive(Debug, Clone)]
pub struct Encoder {
    mode: Mode,
    mask_outbound: bool,
}

impl Encoder {
    /// Creates an encoder for a connection with the given role and mode.
    pub fn new(role: Role, mode: Mode, options: &Options) -> Self {
        let mask_outbound = match role {
            Role::Client => options.mask_client_frames,
            Role::Server => options.mask_server_frames,
        };
        Self {
            mode,
            mask_outbound,
        }
    }

    /// The framing variant this encoder produces.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Encodes a single frame into a fresh buffer.
    pub fn encode_frame(&self, frame: Frame) -> Result<BytesMut> {
        let mut dst = BytesMut::with_capacity(MAX_HEAD_SIZE + frame.payload.len());
        self.encode_into(frame, &mut dst)?;
        Ok(dst)
    }

    fn encode_into(&self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        match self.mode {
            Mode::Modern => self.encode_modern(frame, dst),
            Mode::Legacy => encode_legacy(frame, dst),
        }
    }

    fn encode_modern(&self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let key = match frame.mask() {
            Some(key) => Some(key),
            None if self.mask_outbound => Some(rand::random()),
            None => None,
        };

        let mut head = [0; MAX_HEAD_SIZE];
        let head_len = frame.encode_head(key, &mut head)?;
        dst.extend_from_slice(&head[..head_len]);

        let start = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(key) = key {
            apply_mask(&mut dst[start..], key);
        }

        Ok(())
    }
}

fn encode_legacy(frame: Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.opcode != OpCode::Text || !frame.fin || frame.mask().is_some() {
        return Err(RelayError::UnsupportedInLegacyMode);
    }

    dst.reserve(frame.payload.len() + 2);
    dst.put_u8(0x00);
    dst.extend_from_slice(&frame.payload);
    dst.put_u8(0xFF);

    Ok(())
}

impl codec::Encoder<Frame> for Encoder {
    type Error = RelayError;

    #[inline]
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        self.encode_into(frame, dst)
    }
}

// ================ Decoder ====================

/// Fields parsed from the first two header bytes of a modern frame.
struct Header {
    fin: bool,
    rsv: u8,
    masked: bool,
    opcode: OpCode,
    /// Encoded length of the payload.
    length_code: u8,
    /// Size of the extended length field (0, 2, or 8 bytes).
    extra: usize,
    /// Remaining header bytes: extended length plus mask key.
    header_size: usize,
}

/// Header plus the mask key, once everything before the payload is read.
struct PayloadMeta {
    header: Header,
    key: Option<[u8; 4]>,
    payload_len: usize,
}

enum ReadState {
    Head(Header),
    Payload(PayloadMeta),
}

/// Frame decoder for one connection, maintaining parse state across reads.
///
/// Partial input yields `None` (more bytes needed); a malformed frame yields
/// an error that terminates the connection. Masked payloads are unmasked on
/// arrival, with the observed key recorded on the frame.
pub struct Decoder {
    mode: Mode,
    /// Maximum allowed size for a frame payload.
    max_payload_read: usize,
    state: Option<ReadState>,
}

impl Decoder {
    /// Creates a decoder for the given framing variant, rejecting payloads
    /// larger than `max_payload_read` bytes.
    pub fn new(mode: Mode, max_payload_read: usize) -> Self {
        Self {
            mode,
            max_payload_read,
            state: None,
        }
    }

    fn decode_modern(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let fin = src[0] & 0x80 != 0;
                    let rsv = (src[0] >> 4) & 0x07;
                    let opcode = OpCode::try_from(src[0] & 0x0F)?;
                    let masked = src[1] & 0x80 != 0;
                    let length_code = src[1] & 0x7F;

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Head(Header {
                        fin,
                        rsv,
                        masked,
                        opcode,
                        length_code,
                        extra,
                        header_size,
                    }));
                }
                Some(ReadState::Head(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Head(header));
                        return Ok(None);
                    }

                    let payload_len = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => src.get_u16() as usize,
                        8 => {
                            let len = src.get_u64();
                            if len > MAX_PAYLOAD_LEN {
                                return Err(RelayError::InvalidLength(len));
                            }
                            len as usize
                        }
                        _ => unreachable!(),
                    };

                    let key = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    if header.opcode.is_control() && !header.fin {
                        return Err(RelayError::ProtocolDecode("fragmented control frame"));
                    }
                    if header.opcode == OpCode::Ping && payload_len > 125 {
                        return Err(RelayError::ProtocolDecode("ping payload over 125 bytes"));
                    }
                    if payload_len >= self.max_payload_read {
                        return Err(RelayError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(PayloadMeta {
                        header,
                        key,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(meta)) => {
                    if src.remaining() < meta.payload_len {
                        self.state = Some(ReadState::Payload(meta));
                        return Ok(None);
                    }

                    let mut payload = src.split_to(meta.payload_len);
                    if let Some(key) = meta.key {
                        apply_mask(&mut payload, key);
                    }

                    let mut frame = Frame::new(meta.header.fin, meta.header.opcode, payload.freeze())
                        .with_rsv(meta.header.rsv);
                    if let Some(key) = meta.key {
                        frame = frame.with_mask(key);
                    }

                    break Ok(Some(frame));
                }
            }
        }
    }

    fn decode_legacy(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != 0x00 {
            return Err(RelayError::ProtocolDecode("unknown legacy frame type byte"));
        }

        match src[1..].iter().position(|&b| b == 0xFF) {
            Some(idx) => {
                let mut body = src.split_to(idx + 2);
                body.advance(1); // leading type byte
                body.truncate(idx); // trailing sentinel
                Ok(Some(Frame::text(body.freeze())))
            }
            None => {
                if src.len() > self.max_payload_read {
                    return Err(RelayError::FrameTooLarge);
                }
                Ok(None)
            }
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.mode {
            Mode::Modern => self.decode_modern(src),
            Mode::Legacy => self.decode_legacy(src),
        }
    }

    /// A stream ending mid-frame — including inside an extended-length field
    /// or mask key — is a decode error, not a silent truncation.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.state.is_none() => Ok(None),
            None => Err(RelayError::ProtocolDecode("truncated frame")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_util::codec::Decoder as _;

    fn encoder(role: Role, mode: Mode) -> Encoder {
        Encoder::new(role, mode, &Options::default())
    }

    fn decoder(mode: Mode) -> Decoder {
        Decoder::new(mode, Options::default().max_payload_read)
    }

    fn decode_one(decoder: &mut Decoder, bytes: &[u8]) -> Result<Option<Frame>> {
        let mut src = BytesMut::from(bytes);
        decoder.decode(&mut src)
    }

    mod roundtrip_tests {
        use super::*;

        #[test]
        fn test_unmasked_frames_roundtrip() {
            let cases = [
                Frame::text("Hello, watch!"),
                Frame::binary(vec![0xDE, 0xAD, 0xBE, 0xEF]),
                Frame::binary(Bytes::new()),
                Frame::continuation("tail").with_fin(false),
                Frame::ping("ping payload"),
                Frame::new(false, OpCode::Text, "head").with_rsv(0b011),
            ];

            for original in cases {
                let wire = encoder(Role::Server, Mode::Modern)
                    .encode_frame(original.clone())
                    .unwrap();
                let decoded = decode_one(&mut decoder(Mode::Modern), &wire)
                    .unwrap()
                    .unwrap();

                assert_eq!(decoded.fin, original.fin);
                assert_eq!(decoded.rsv, original.rsv);
                assert_eq!(decoded.opcode, original.opcode);
                assert_eq!(decoded.payload, original.payload);
                assert_eq!(decoded.mask(), None);
            }
        }

        #[test]
        fn test_client_frames_are_masked_and_unmask_on_decode() {
            let original = Frame::binary(vec![1, 2, 3, 4, 5, 6, 7]);
            let wire = encoder(Role::Client, Mode::Modern)
                .encode_frame(original.clone())
                .unwrap();

            assert_eq!(wire[1] & 0x80, 0x80, "mask bit must be set");
            // payload on the wire differs from the clear payload unless the
            // random key happened to be all zeroes
            let decoded = decode_one(&mut decoder(Mode::Modern), &wire)
                .unwrap()
                .unwrap();
            assert_eq!(decoded.payload, original.payload);
            assert!(decoded.mask().is_some());
        }

        #[test]
        fn test_explicit_mask_key_is_used() {
            let key = [0x11, 0x22, 0x33, 0x44];
            let wire = encoder(Role::Server, Mode::Modern)
                .encode_frame(Frame::binary(vec![0xFF; 6]).with_mask(key))
                .unwrap();

            assert_eq!(&wire[2..6], &key);
            for (i, &byte) in wire[6..].iter().enumerate() {
                assert_eq!(byte, 0xFF ^ key[i % 4]);
            }
        }

        #[test]
        fn test_length_classes_roundtrip() {
            for len in [0usize, 125, 126, 65535, 65536, 70_000] {
                let original = Frame::binary(vec![0x5A; len]);
                let wire = encoder(Role::Server, Mode::Modern)
                    .encode_frame(original.clone())
                    .unwrap();
                let decoded = decode_one(&mut decoder(Mode::Modern), &wire)
                    .unwrap()
                    .unwrap();
                assert_eq!(decoded.payload.len(), len);
                assert_eq!(decoded.payload, original.payload);
            }
        }
    }

    mod decode_tests {
        use super::*;

        #[test]
        fn test_partial_input_needs_more_data() {
            let wire = encoder(Role::Client, Mode::Modern)
                .encode_frame(Frame::text("incremental"))
                .unwrap();

            let mut decoder = decoder(Mode::Modern);
            let mut src = BytesMut::new();
            for &byte in &wire[..wire.len() - 1] {
                src.put_u8(byte);
                assert!(decoder.decode(&mut src).unwrap().is_none());
            }
            src.put_u8(wire[wire.len() - 1]);
            let frame = decoder.decode(&mut src).unwrap().unwrap();
            assert_eq!(&frame.payload[..], b"incremental");
        }

        #[test]
        fn test_two_frames_in_one_buffer() {
            let enc = encoder(Role::Server, Mode::Modern);
            let mut src = BytesMut::new();
            src.extend_from_slice(&enc.encode_frame(Frame::text("one")).unwrap());
            src.extend_from_slice(&enc.encode_frame(Frame::binary("two")).unwrap());

            let mut decoder = decoder(Mode::Modern);
            let first = decoder.decode(&mut src).unwrap().unwrap();
            let second = decoder.decode(&mut src).unwrap().unwrap();
            assert_eq!(first.opcode, OpCode::Text);
            assert_eq!(second.opcode, OpCode::Binary);
            assert!(decoder.decode(&mut src).unwrap().is_none());
        }

        #[test]
        fn test_rejects_reserved_opcode() {
            let err = decode_one(&mut decoder(Mode::Modern), &[0x83, 0x00]).unwrap_err();
            assert!(matches!(err, RelayError::InvalidOpCode(0x3)));
        }

        #[test]
        fn test_rejects_fragmented_control_frame() {
            // Ping with FIN clear
            let err = decode_one(&mut decoder(Mode::Modern), &[0x09, 0x00]).unwrap_err();
            assert!(matches!(err, RelayError::ProtocolDecode(_)));
        }

        #[test]
        fn test_rejects_oversized_payload() {
            let mut decoder = Decoder::new(Mode::Modern, 16);
            let wire = encoder(Role::Server, Mode::Modern)
                .encode_frame(Frame::binary(vec![0u8; 32]))
                .unwrap();
            let err = decode_one(&mut decoder, &wire).unwrap_err();
            assert!(matches!(err, RelayError::FrameTooLarge));
        }

        #[test]
        fn test_rejects_length_with_high_bit_set() {
            let mut wire = vec![0x82, 127];
            wire.extend_from_slice(&0x8000_0000_0000_0000u64.to_be_bytes());
            let err = decode_one(&mut decoder(Mode::Modern), &wire).unwrap_err();
            assert!(matches!(err, RelayError::InvalidLength(_)));
        }

        #[test]
        fn test_eof_mid_extended_length_is_truncation() {
            let mut decoder = decoder(Mode::Modern);
            // 16-bit length class announced, only one extension byte present
            let mut src = BytesMut::from(&[0x82u8, 126, 0x01][..]);
            assert!(decoder.decode(&mut src).unwrap().is_none());
            let err = decoder.decode_eof(&mut src).unwrap_err();
            assert!(matches!(err, RelayError::ProtocolDecode("truncated frame")));
        }

        #[test]
        fn test_eof_on_clean_boundary_is_fine() {
            let mut decoder = decoder(Mode::Modern);
            let mut src = BytesMut::new();
            assert!(decoder.decode_eof(&mut src).unwrap().is_none());
        }
    }

    mod legacy_tests {
        use super::*;

        #[test]
        fn test_legacy_text_roundtrip() {
            let wire = encoder(Role::Server, Mode::Legacy)
                .encode_frame(Frame::text("watch says hi"))
                .unwrap();
            assert_eq!(wire[0], 0x00);
            assert_eq!(wire[wire.len() - 1], 0xFF);

            let frame = decode_one(&mut decoder(Mode::Legacy), &wire)
                .unwrap()
                .unwrap();
            assert_eq!(frame.opcode, OpCode::Text);
            assert!(frame.fin);
            assert_eq!(&frame.payload[..], b"watch says hi");
        }

        #[test]
        fn test_legacy_rejects_binary_frames() {
            let err = encoder(Role::Server, Mode::Legacy)
                .encode_frame(Frame::binary(vec![1, 2]))
                .unwrap_err();
            assert!(matches!(err, RelayError::UnsupportedInLegacyMode));
        }

        #[test]
        fn test_legacy_rejects_fragments() {
            let err = encoder(Role::Server, Mode::Legacy)
                .encode_frame(Frame::text("part").with_fin(false))
                .unwrap_err();
            assert!(matches!(err, RelayError::UnsupportedInLegacyMode));
        }

        #[test]
        fn test_legacy_waits_for_trailing_sentinel() {
            let mut decoder = decoder(Mode::Legacy);
            let mut src = BytesMut::from(&b"\x00half"[..]);
            assert!(decoder.decode(&mut src).unwrap().is_none());
            src.extend_from_slice(b" done\xff");
            let frame = decoder.decode(&mut src).unwrap().unwrap();
            assert_eq!(&frame.payload[..], b"half done");
        }

        #[test]
        fn test_legacy_rejects_unknown_type_byte() {
            let err = decode_one(&mut decoder(Mode::Legacy), b"\x01oops\xff").unwrap_err();
            assert!(matches!(err, RelayError::ProtocolDecode(_)));
        }
    }
}
