//! # wristlink
//! A pairing relay for wearable development tooling: exactly two peers — a
//! "phone" and a "watch" (or console) — connect over WebSocket, and every
//! application message arriving from one is forwarded verbatim to the other.
//!
//! The crate implements the WebSocket framing layer by hand (RFC 6455 header
//! construction, payload-length encoding, masking and fragmentation) together
//! with the pre-RFC sentinel-delimited framing variant still spoken by older
//! device firmware, and layers the two-peer registry and forward/notify policy
//! on top of it.
//!
//! # Components
//!
//! - [`frame`]: the wire unit, opcodes, and header encoding
//! - [`codec`]: streaming [`Encoder`]/[`Decoder`] for both framing generations
//! - [`message`]: outbound fragmentation and receive-side reassembly
//! - [`writer`]: per-connection FIFO transport writer with chopped delivery
//! - [`registry`]: the two-peer registry and relay-target selection
//! - [`server`]: the listening relay itself
//! - [`connection`]: a device-side client connection
//!
//! # Running a relay
//! ```no_run
//! use wristlink::{Options, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> wristlink::Result<()> {
//!     let server = RelayServer::bind(Options::default()).await?;
//!     server.run().await
//! }
//! ```
//!
//! # Connecting a peer
//! ```no_run
//! use wristlink::{Connection, Message, Options};
//!
//! #[tokio::main]
//! async fn main() -> wristlink::Result<()> {
//!     let mut conn = Connection::connect("ws://127.0.0.1:9000".parse()?, Options::default()).await?;
//!     conn.send_message(&Message::binary(vec![0x01, 0x02]))?;
//!     let reply = conn.next_message().await?;
//!     println!("partner sent {} bytes", reply.payload.len());
//!     Ok(())
//! }
//! ```
//!
//! # Relay semantics
//! The relay never interprets message contents: payloads are opaque text or
//! binary blobs whose meaning is the business of the two endpoints. When a
//! paired peer disconnects, the survivor receives the fixed
//! [`DISCONNECT_NOTICE`] binary message exactly once; while fewer than two
//! peers are registered, inbound traffic is silently dropped.

pub mod codec;
pub mod connection;
pub mod frame;
mod handshake;
mod mask;
pub mod message;
pub mod options;
pub mod registry;
pub mod server;
pub mod writer;

use thiserror::Error;

pub use codec::{Decoder, Encoder, Mode, Role};
pub use connection::Connection;
pub use frame::{Frame, OpCode};
pub use message::{Message, Reassembler};
pub use options::{ExtraPeerPolicy, Options};
pub use registry::{PairState, Peer, PeerAddr, PeerRegistry, DISCONNECT_NOTICE};
pub use server::RelayServer;
pub use writer::{TransportWriter, WriterHandle};

/// A result type for relay operations, using [`RelayError`] as the error type.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while framing, relaying, or establishing connections.
///
/// Every variant is local to one connection: an encode or decode failure
/// terminates only the offending connection (treated as an abrupt disconnect)
/// and never the relay process.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A payload length that cannot be represented by the wire format's
    /// length-encoding rule (the protocol maximum is `0x7FFF_FFFF_FFFF_FFFF`),
    /// or a repeated-payload length that cannot be synthesized.
    #[error("invalid payload length {0}")]
    InvalidLength(u64),

    /// Binary payloads, fragmentation, and frame headers do not exist in the
    /// pre-RFC framing variant.
    #[error("not supported on a legacy connection")]
    UnsupportedInLegacyMode,

    /// An explicit fragment size below the minimum of one byte.
    #[error("fragment size must be at least 1 (was {0})")]
    InvalidFragmentSize(usize),

    /// A malformed or truncated frame on the receive side.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(&'static str),

    /// Receipt of a frame with an opcode outside the set defined by the
    /// protocol.
    #[error("invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// A registry operation referenced an address with no live connection.
    /// This is a logic error, not a recoverable condition.
    #[error("unknown peer {0}")]
    UnknownPeer(String),

    /// A frame whose payload exceeds the configured maximum read size.
    #[error("frame too large")]
    FrameTooLarge,

    /// The connection is closed; no further communication is possible.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The handshake response carried a status other than `101 Switching
    /// Protocols`.
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The HTTP `Upgrade` header is missing or does not name `websocket`.
    #[error("invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The HTTP `Connection` header is missing or does not name `upgrade`.
    #[error("invalid connection header")]
    InvalidConnectionHeader,

    /// A modern handshake request without the `Sec-WebSocket-Key` header.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// A modern handshake request whose `Sec-WebSocket-Version` is not 13.
    #[error("Sec-WebSocket-Version must be 13")]
    InvalidSecWebSocketVersion,

    /// Only the `ws://` scheme is accepted; the relay does not terminate TLS.
    #[error("invalid http scheme")]
    InvalidHttpScheme,

    /// Wraps errors from URL parsing when processing connect addresses.
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    /// Wraps standard I/O errors from the underlying byte streams.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wraps errors from the hyper HTTP library during the upgrade handshake.
    #[error(transparent)]
    Http(#[from] hyper::Error),
}
