//! One relay-mediated connection: the framed read side, the transport-writer
//! task feeding the socket, and message-level send/receive on top.
//!
//! Both endpoints of the relay use this type — the server wraps every
//! accepted connection in one, and [`Connection::connect`] establishes the
//! device-side client end. Control frames are handled here (ping is answered
//! with pong, close is echoed); only complete data messages surface to the
//! caller.

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::Empty;
use hyper::{body::Incoming, header, upgrade::Upgraded, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::ReadHalf;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use url::Url;

use crate::{
    codec::{Decoder, Encoder, Mode, Role},
    frame::{Frame, OpCode},
    handshake,
    message::{Message, Reassembler},
    options::Options,
    registry::{Peer, PeerAddr},
    writer::TransportWriter,
    RelayError, Result,
};

/// A live connection to (or accepted by) the relay.
pub struct Connection {
    /// This endpoint's outbound half: identity, encoder, and writer handle.
    local: Peer,
    reader: FramedRead<ReadHalf<TokioIo<Upgraded>>, Decoder>,
    reassembler: Reassembler,
    auto_fragment_size: Option<usize>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("auto_fragment_size", &self.auto_fragment_size)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wraps an upgraded stream: splits it, spawns the transport-writer task
    /// owning the write half, and sets up decode and reassembly state.
    pub(crate) fn new(
        role: Role,
        mode: Mode,
        addr: PeerAddr,
        io: TokioIo<Upgraded>,
        options: &Options,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(io);

        let (writer, handle) = TransportWriter::new(write_half);
        tokio::spawn(async move {
            if let Err(err) = writer.run().await {
                log::debug!("transport writer stopped: {err}");
            }
        });

        let reader = FramedRead::new(read_half, Decoder::new(mode, options.max_payload_read));

        Self {
            local: Peer::new(addr, Encoder::new(role, mode, options), handle),
            reader,
            reassembler: Reassembler::new(options.max_read_buffer),
            auto_fragment_size: options.auto_fragment_size,
        }
    }

    /// Connects to a relay as one of its two peers.
    ///
    /// Only the `ws://` scheme is accepted — the relay does not terminate
    /// TLS — and the connection always speaks the modern framing variant.
    pub async fn connect(url: Url, options: Options) -> Result<Connection> {
        if url.scheme() != "ws" {
            return Err(RelayError::InvalidHttpScheme);
        }
        let host = url.host_str().ok_or(RelayError::InvalidHttpScheme)?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let authority = format!("{host}:{port}");

        let stream = TcpStream::connect(&authority).await?;
        let _ = stream.set_nodelay(true);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.with_upgrades().await {
                log::debug!("client connection task ended: {err}");
            }
        });

        let target = &url[url::Position::BeforePath..];
        let request = Request::builder()
            .method("GET")
            .uri(target)
            .header(header::HOST, authority.as_str())
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "upgrade")
            .header(header::SEC_WEBSOCKET_KEY, handshake::nonce())
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .body(Empty::<Bytes>::new())
            .expect("request build");

        let mut response = sender.send_request(request).await?;
        verify_upgrade(&response)?;

        let upgraded = hyper::upgrade::on(&mut response).await?;
        Ok(Connection::new(
            Role::Client,
            Mode::Modern,
            PeerAddr::from(authority),
            TokioIo::new(upgraded),
            &options,
        ))
    }

    /// Stable identity of this connection.
    pub fn addr(&self) -> &PeerAddr {
        &self.local.addr
    }

    /// The framing variant this connection speaks.
    pub fn mode(&self) -> Mode {
        self.local.mode()
    }

    /// A registrable handle to this connection's outbound half.
    pub(crate) fn peer(&self) -> Peer {
        self.local.clone()
    }

    /// Sends a complete message, fragmented per the configured automatic
    /// threshold.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.local.send(message, None, self.auto_fragment_size)
    }

    /// Sends a message sliced into fragments of `frag_size` bytes.
    pub fn send_fragmented(&self, message: &Message, frag_size: usize) -> Result<()> {
        self.local
            .send(message, Some(frag_size), self.auto_fragment_size)
    }

    /// Encodes and enqueues a single frame, optionally flushed (`sync`) or
    /// chopped into fixed-size chunks for throttled delivery.
    pub fn send_frame(&self, frame: Frame, sync: bool, chop_size: Option<usize>) -> Result<()> {
        self.local.send_frame(frame, sync, chop_size)
    }

    /// Receives the next complete data message.
    ///
    /// Control frames are consumed on the way: pings are answered, pongs
    /// discarded, and a close frame is echoed before the method reports
    /// [`RelayError::ConnectionClosed`]. Stream end without a close frame is
    /// reported the same way.
    pub async fn next_message(&mut self) -> Result<Message> {
        loop {
            let frame = match self.reader.next().await {
                Some(frame) => frame?,
                None => return Err(RelayError::ConnectionClosed),
            };

            match frame.opcode {
                OpCode::Ping => {
                    self.local.send_frame(Frame::pong(frame.payload), false, None)?;
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    let _ = self.local.send_frame(Frame::close(frame.payload), false, None);
                    return Err(RelayError::ConnectionClosed);
                }
                _ => {
                    if let Some(message) = self.reassembler.push(frame)? {
                        return Ok(message);
                    }
                }
            }
        }
    }

    /// Initiates a graceful close by sending a close frame.
    ///
    /// Fails with [`RelayError::UnsupportedInLegacyMode`] on a legacy
    /// connection, which has no close frame; dropping the connection is the
    /// only way to end it.
    pub fn close(&self) -> Result<()> {
        self.local.send_frame(Frame::close(Bytes::new()), true, None)
    }
}

fn verify_upgrade(response: &Response<Incoming>) -> Result<()> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(RelayError::InvalidStatusCode(response.status().as_u16()));
    }

    let headers = response.headers();

    if !headers
        .get(header::UPGRADE)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return Err(RelayError::InvalidUpgradeHeader);
    }

    if !headers
        .get(header::CONNECTION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("upgrade"))
        .unwrap_or(false)
    {
        return Err(RelayError::InvalidConnectionHeader);
    }

    Ok(())
}
