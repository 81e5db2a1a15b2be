//! The relay server: listening endpoint, handshake dispatch, and the
//! forward/notify policy wired to the peer registry.
//!
//! Each accepted TCP connection is served by hyper until it upgrades, then
//! handed to a per-connection task that registers the peer and pumps its
//! messages through the relay. The registry lives behind a single mutex;
//! registration, removal, and the relay-target decision each run as one
//! critical section, so a disconnect can never race a forward onto a
//! transport that was just torn down.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::Empty;
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use crate::{
    codec::{Mode, Role},
    connection::Connection,
    handshake::{self, HandshakeKind},
    message::Message,
    options::{ExtraPeerPolicy, Options},
    registry::{PairState, PeerAddr, PeerRegistry, DISCONNECT_NOTICE},
    Result,
};

/// A bound, not-yet-running relay.
pub struct RelayServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

/// State shared by the accept loop and every connection task.
struct Shared {
    registry: Mutex<PeerRegistry>,
    options: Options,
}

impl RelayServer {
    /// Binds the listening endpoint configured in `options`.
    pub async fn bind(options: Options) -> Result<Self> {
        let listener = TcpListener::bind(options.listen).await?;
        log::info!("relay listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                registry: Mutex::new(PeerRegistry::new()),
                options,
            }),
        })
    }

    /// Brings up a relay only when nothing is already listening on the
    /// target address.
    ///
    /// Probes the port with a plain TCP connect first: an accepted probe
    /// means a relay (or something else) already owns the endpoint and
    /// `None` is returned, making repeated bring-up idempotent.
    pub async fn ensure_listening(options: Options) -> Result<Option<RelayServer>> {
        if TcpStream::connect(options.listen).await.is_ok() {
            log::debug!("something is already listening on {}", options.listen);
            return Ok(None);
        }
        Ok(Some(Self::bind(options).await?))
    }

    /// The address the relay is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop until the listener fails.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let _ = stream.set_nodelay(true);

            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |request| {
                    let shared = Arc::clone(&shared);
                    async move {
                        Ok::<_, std::convert::Infallible>(upgrade_request(request, addr, shared))
                    }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    log::debug!("connection from {addr} ended: {err}");
                }
            });
        }
    }
}

fn upgrade_request(
    mut request: Request<Incoming>,
    addr: SocketAddr,
    shared: Arc<Shared>,
) -> Response<Empty<Bytes>> {
    match try_upgrade(&mut request, addr, shared) {
        Ok(response) => response,
        Err(err) => {
            log::warn!("rejecting connection from {addr}: {err}");
            Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Empty::new())
                .expect("response build")
        }
    }
}

fn try_upgrade(
    request: &mut Request<Incoming>,
    addr: SocketAddr,
    shared: Arc<Shared>,
) -> Result<Response<Empty<Bytes>>> {
    let kind = handshake::classify(request, shared.options.allow_legacy)?;

    if shared.options.extra_peer_policy == ExtraPeerPolicy::Refuse
        && shared.registry.lock().expect("registry lock").state() == PairState::Paired
    {
        log::info!("refusing {addr}: a pair is already connected");
        return Ok(Response::builder()
            .status(StatusCode::CONFLICT)
            .body(Empty::new())
            .expect("response build"));
    }

    let (mode, response) = match kind {
        HandshakeKind::Modern { key } => {
            let response = Response::builder()
                .status(StatusCode::SWITCHING_PROTOCOLS)
                .header(header::CONNECTION, "upgrade")
                .header(header::UPGRADE, "websocket")
                .header(header::SEC_WEBSOCKET_ACCEPT, handshake::accept_key(&key))
                .body(Empty::new())
                .expect("response build");
            (Mode::Modern, response)
        }
        HandshakeKind::Legacy => {
            let host = request
                .headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("localhost");
            let origin = request
                .headers()
                .get(header::ORIGIN)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("*")
                .to_owned();

            let response = Response::builder()
                .status(StatusCode::SWITCHING_PROTOCOLS)
                .header(header::CONNECTION, "Upgrade")
                .header(header::UPGRADE, "WebSocket")
                .header("WebSocket-Origin", origin)
                .header("WebSocket-Location", format!("ws://{host}/"))
                .body(Empty::new())
                .expect("response build");
            (Mode::Legacy, response)
        }
    };

    let upgrade = hyper::upgrade::on(request);
    tokio::spawn(async move {
        match upgrade.await {
            Ok(upgraded) => {
                let conn = Connection::new(
                    Role::Server,
                    mode,
                    PeerAddr::from(addr),
                    TokioIo::new(upgraded),
                    &shared.options,
                );
                run_peer(conn, shared).await;
            }
            Err(err) => log::debug!("upgrade from {addr} failed: {err}"),
        }
    });

    Ok(response)
}

/// Per-connection loop: register, pump messages through the relay, and on
/// any exit treat the connection as disconnected.
async fn run_peer(mut conn: Connection, shared: Arc<Shared>) {
    let addr = conn.addr().clone();

    let registered = shared
        .registry
        .lock()
        .expect("registry lock")
        .register(conn.peer());

    if registered {
        log::info!("peer {addr} connected ({})", conn.mode());
    } else {
        // lost the admission race; under the Refuse policy close outright,
        // under Admit keep the transport open with its traffic ignored
        if shared.options.extra_peer_policy == ExtraPeerPolicy::Refuse {
            log::info!("closing {addr}: a pair is already connected");
            let _ = conn.close();
            return;
        }
        log::warn!("peer {addr} admitted unpaired; its traffic will be dropped");
    }

    let reason = loop {
        match conn.next_message().await {
            Ok(message) => relay(&shared, &addr, message),
            Err(err) => break err,
        }
    };
    log::info!("peer {addr} disconnected: {reason}");

    if registered {
        drop_peer(&shared, &addr);
    }
}

/// Forwards one inbound message to the sender's partner, or drops it when
/// the registry is not paired.
fn relay(shared: &Shared, sender: &PeerAddr, message: Message) {
    let registry = shared.registry.lock().expect("registry lock");
    match registry.relay_target(sender) {
        Some(target) => {
            log::debug!(
                "{sender} ==> {}: {} bytes",
                target.addr,
                message.payload.len()
            );
            if let Err(err) = target.send(&message, None, shared.options.auto_fragment_size) {
                log::warn!("forwarding from {sender} to {} failed: {err}", target.addr);
            }
        }
        None => log::debug!("dropping message from {sender}: no paired partner"),
    }
}

/// Removes a peer and, when its partner survives, sends the partner the
/// disconnect notice.
fn drop_peer(shared: &Shared, addr: &PeerAddr) {
    let mut registry = shared.registry.lock().expect("registry lock");
    match registry.unregister(addr) {
        Ok(Some(survivor)) => {
            log::info!("notifying {} that its partner disconnected", survivor.addr);
            if let Err(err) = survivor.send(&Message::binary(DISCONNECT_NOTICE), None, None) {
                log::warn!("disconnect notice to {} failed: {err}", survivor.addr);
            }
        }
        Ok(None) => {}
        Err(err) => log::error!("unregistering {addr}: {err}"),
    }
}
