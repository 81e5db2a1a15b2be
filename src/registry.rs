//! Peer registry and relay policy.
//!
//! The registry is owned by the relay server instance — there is no global
//! state — and is the only place peer membership is mutated. It tracks at
//! most two live peers in connection order and answers the one question the
//! relay asks on every inbound message: who is the other peer?
//!
//! The caller is expected to guard the registry with a single mutex and keep
//! "add peer / remove peer / select relay target" inside one critical
//! section, so a disconnect can never race an in-flight relay decision onto
//! a transport that was just torn down.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::{
    codec::{Encoder, Mode},
    frame::Frame,
    message::{self, Message},
    writer::WriterHandle,
    RelayError, Result,
};

/// Sent to the surviving peer when its partner disconnects, so it can react
/// (for example, prompt a reconnect) without waiting on transport-level
/// keepalive timeouts. Peer implementations recognize this exact byte
/// sequence.
pub const DISCONNECT_NOTICE: &[u8] = b"\x03Remote Client Disconnected";

/// Opaque stable identity of one connected endpoint: its `host:port` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr(String);

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(format!("{}:{}", addr.ip(), addr.port()))
    }
}

impl From<String> for PeerAddr {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

impl From<&str> for PeerAddr {
    fn from(addr: &str) -> Self {
        Self(addr.to_owned())
    }
}

/// One registered endpoint: its identity plus the outbound half needed to
/// deliver messages to it (framing mode, encoder, and transport writer).
///
/// Cloning a `Peer` clones handles, not the connection; all clones write to
/// the same transport queue.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Stable identity of the connection.
    pub addr: PeerAddr,
    encoder: Encoder,
    writer: WriterHandle,
}

impl Peer {
    pub fn new(addr: PeerAddr, encoder: Encoder, writer: WriterHandle) -> Self {
        Self {
            addr,
            encoder,
            writer,
        }
    }

    /// The framing variant this peer's connection speaks.
    pub fn mode(&self) -> Mode {
        self.encoder.mode()
    }

    /// The handle feeding this peer's transport writer.
    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    /// Delivers a complete message to this peer: fragments it per the given
    /// sizes, encodes each frame for this peer's framing mode, and enqueues
    /// the wire bytes on its transport.
    pub fn send(
        &self,
        message: &Message,
        frag_size: Option<usize>,
        auto_fragment_size: Option<usize>,
    ) -> Result<()> {
        for frame in message::fragment(message, self.mode(), frag_size, auto_fragment_size)? {
            let buf = self.encoder.encode_frame(frame)?;
            self.writer.write(buf.freeze(), false, None)?;
        }
        Ok(())
    }

    /// Encodes and enqueues a single frame, optionally flushed (`sync`) or
    /// split into `chop_size`-byte chunks for throttled delivery.
    pub fn send_frame(&self, frame: Frame, sync: bool, chop_size: Option<usize>) -> Result<()> {
        let buf = self.encoder.encode_frame(frame)?;
        self.writer.write(buf.freeze(), sync, chop_size)
    }
}

/// How many peers the registry currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// No peers connected.
    Empty,
    /// One peer connected, waiting for its partner.
    Waiting,
    /// Both peers connected; the relay forwards traffic.
    Paired,
}

/// Ordered collection of at most two live peers, keyed by address.
///
/// Insertion order is connection order; the relay-target swap is decided by
/// address equality against the first registered peer.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    /// Peer addresses in connection order.
    order: Vec<PeerAddr>,
    peers: HashMap<PeerAddr, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PairState {
        match self.order.len() {
            0 => PairState::Empty,
            1 => PairState::Waiting,
            _ => PairState::Paired,
        }
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Adds a peer, returning `false` when the registry already holds two —
    /// the two-peer invariant is enforced here, not by caller convention.
    #[must_use]
    pub fn register(&mut self, peer: Peer) -> bool {
        if self.order.len() >= 2 {
            return false;
        }
        self.order.push(peer.addr.clone());
        self.peers.insert(peer.addr.clone(), peer);
        true
    }

    /// Removes a peer the instant its disconnect fires.
    ///
    /// Returns the surviving peer when the removal took the registry from
    /// `Paired` to `Waiting` — the caller owes that peer the
    /// [`DISCONNECT_NOTICE`]. A `Waiting` to `Empty` transition returns
    /// `None`; nobody is listening.
    ///
    /// # Errors
    /// [`RelayError::UnknownPeer`] if `addr` is not registered. That is a
    /// logic error in the caller, not a recoverable condition.
    pub fn unregister(&mut self, addr: &PeerAddr) -> Result<Option<Peer>> {
        if self.peers.remove(addr).is_none() {
            return Err(RelayError::UnknownPeer(addr.to_string()));
        }
        self.order.retain(|a| a != addr);

        Ok(match self.order.as_slice() {
            [survivor] => self.peers.get(survivor).cloned(),
            _ => None,
        })
    }

    /// Looks up a registered peer by address.
    ///
    /// # Errors
    /// [`RelayError::UnknownPeer`] if `addr` is not registered.
    pub fn peer(&self, addr: &PeerAddr) -> Result<&Peer> {
        self.peers
            .get(addr)
            .ok_or_else(|| RelayError::UnknownPeer(addr.to_string()))
    }

    /// The destination for an application message arriving from `sender`:
    /// whichever of the two registered peers is not the sender.
    ///
    /// Returns `None` — the message is to be dropped, silently — unless the
    /// registry is `Paired` and the sender is one of the registered peers.
    pub fn relay_target(&self, sender: &PeerAddr) -> Option<&Peer> {
        let [first, second] = self.order.as_slice() else {
            return None;
        };
        if !self.peers.contains_key(sender) {
            return None;
        }
        let target = if first == sender { second } else { first };
        self.peers.get(target)
    }

    /// Writes raw bytes to the transport of the peer at `addr` — the
    /// peer-switch addressing used to deliver to a different socket than the
    /// one a write originated from.
    ///
    /// # Errors
    /// [`RelayError::UnknownPeer`] if `addr` is not registered.
    pub fn write_to(
        &self,
        addr: &PeerAddr,
        data: Bytes,
        sync: bool,
        chop_size: Option<usize>,
    ) -> Result<()> {
        self.peer(addr)?.writer.write(data, sync, chop_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Role;
    use crate::options::Options;
    use crate::writer::TransportWriter;
    use tokio::io::AsyncReadExt;

    fn make_peer(addr: &str, mode: Mode) -> (Peer, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        let (writer, handle) = TransportWriter::new(near);
        tokio::spawn(writer.run());
        let encoder = Encoder::new(Role::Server, mode, &Options::default());
        (Peer::new(PeerAddr::from(addr), encoder, handle), far)
    }

    #[tokio::test]
    async fn test_state_transitions_on_register_and_unregister() {
        let mut registry = PeerRegistry::new();
        assert_eq!(registry.state(), PairState::Empty);

        let (phone, _phone_far) = make_peer("phone:5555", Mode::Modern);
        let (watch, _watch_far) = make_peer("watch:7777", Mode::Modern);

        assert!(registry.register(phone));
        assert_eq!(registry.state(), PairState::Waiting);
        assert!(registry.register(watch));
        assert_eq!(registry.state(), PairState::Paired);

        let survivor = registry.unregister(&PeerAddr::from("watch:7777")).unwrap();
        assert_eq!(survivor.unwrap().addr, PeerAddr::from("phone:5555"));
        assert_eq!(registry.state(), PairState::Waiting);

        let survivor = registry.unregister(&PeerAddr::from("phone:5555")).unwrap();
        assert!(survivor.is_none());
        assert_eq!(registry.state(), PairState::Empty);
    }

    #[tokio::test]
    async fn test_third_peer_is_not_admitted() {
        let mut registry = PeerRegistry::new();
        let (a, _a_far) = make_peer("a:1", Mode::Modern);
        let (b, _b_far) = make_peer("b:2", Mode::Modern);
        let (c, _c_far) = make_peer("c:3", Mode::Modern);

        assert!(registry.register(a));
        assert!(registry.register(b));
        assert!(!registry.register(c));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_relay_target_swaps_both_ways() {
        let mut registry = PeerRegistry::new();
        let (phone, _phone_far) = make_peer("phone:5555", Mode::Modern);
        let (watch, _watch_far) = make_peer("watch:7777", Mode::Modern);
        assert!(registry.register(phone));
        assert!(registry.register(watch));

        let target = registry
            .relay_target(&PeerAddr::from("phone:5555"))
            .unwrap();
        assert_eq!(target.addr, PeerAddr::from("watch:7777"));

        let target = registry
            .relay_target(&PeerAddr::from("watch:7777"))
            .unwrap();
        assert_eq!(target.addr, PeerAddr::from("phone:5555"));
    }

    #[tokio::test]
    async fn test_no_relay_target_unless_paired() {
        let mut registry = PeerRegistry::new();
        assert!(registry.relay_target(&PeerAddr::from("phone:5555")).is_none());

        let (phone, _phone_far) = make_peer("phone:5555", Mode::Modern);
        assert!(registry.register(phone));
        assert!(registry.relay_target(&PeerAddr::from("phone:5555")).is_none());
    }

    #[tokio::test]
    async fn test_unregistered_sender_has_no_target() {
        let mut registry = PeerRegistry::new();
        let (a, _a_far) = make_peer("a:1", Mode::Modern);
        let (b, _b_far) = make_peer("b:2", Mode::Modern);
        assert!(registry.register(a));
        assert!(registry.register(b));

        assert!(registry.relay_target(&PeerAddr::from("stranger:9")).is_none());
    }

    #[tokio::test]
    async fn test_unknown_peer_operations_are_errors() {
        let mut registry = PeerRegistry::new();
        let ghost = PeerAddr::from("ghost:1234");

        assert!(matches!(
            registry.unregister(&ghost),
            Err(RelayError::UnknownPeer(_))
        ));
        assert!(matches!(
            registry.peer(&ghost),
            Err(RelayError::UnknownPeer(_))
        ));
        assert!(matches!(
            registry.write_to(&ghost, Bytes::from_static(b"hi"), false, None),
            Err(RelayError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_send_reaches_the_transport() {
        let (peer, mut far) = make_peer("watch:7777", Mode::Modern);
        peer.send(&Message::binary(vec![0x01, 0x02]), None, None)
            .unwrap();

        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        // server-encoded binary frame: FIN | Binary, unmasked 2-byte payload
        assert_eq!(buf, [0x82, 0x02, 0x01, 0x02]);
    }

    #[tokio::test]
    async fn test_sentinel_cannot_be_sent_to_a_legacy_peer() {
        let (peer, _far) = make_peer("watch:7777", Mode::Legacy);
        let err = peer
            .send(&Message::binary(DISCONNECT_NOTICE), None, None)
            .unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedInLegacyMode));
    }
}
