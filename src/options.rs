//! Relay configuration.

use std::net::SocketAddr;

/// Default listening endpoint, matching what the development tools expect.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:9000";

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a larger payload are rejected to keep a single peer from
/// forcing excessive allocations.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed reassembly buffer, set to 2 MiB.
///
/// A fragmented message that would grow past this size terminates the
/// connection instead of the process's memory.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// What to do with a connection attempt while a pair is already relaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraPeerPolicy {
    /// Reject the handshake outright with an HTTP error.
    Refuse,
    /// Accept the transport but leave the peer unregistered; its traffic is
    /// dropped at the relay-policy layer.
    Admit,
}

/// Configuration for a relay server and its connections.
#[derive(Debug, Clone)]
pub struct Options {
    /// Address the relay listens on.
    pub listen: SocketAddr,
    /// Accept pre-RFC (sentinel-framed) handshakes as well.
    pub allow_legacy: bool,
    /// When set, outbound messages longer than this many bytes are split
    /// into continuation frames of this size.
    pub auto_fragment_size: Option<usize>,
    /// Maximum payload size accepted on a single inbound frame.
    pub max_payload_read: usize,
    /// Maximum accumulated size of a fragmented inbound message.
    pub max_read_buffer: usize,
    /// Mask frames sent by client-role connections (the protocol default).
    pub mask_client_frames: bool,
    /// Mask frames sent by server-role connections (off by default).
    pub mask_server_frames: bool,
    /// Policy for connection attempts while two peers are already paired.
    pub extra_peer_policy: ExtraPeerPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.parse().expect("default listen address"),
            allow_legacy: false,
            auto_fragment_size: None,
            max_payload_read: MAX_PAYLOAD_READ,
            max_read_buffer: MAX_READ_BUFFER,
            mask_client_frames: true,
            mask_server_frames: false,
            extra_peer_policy: ExtraPeerPolicy::Refuse,
        }
    }
}

impl Options {
    /// Sets the listening address.
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    /// Enables or disables acceptance of legacy handshakes.
    pub fn with_legacy(mut self, allow_legacy: bool) -> Self {
        self.allow_legacy = allow_legacy;
        self
    }

    /// Sets the automatic fragmentation threshold. `None` (and zero) leave
    /// outbound messages whole.
    pub fn with_auto_fragment_size(mut self, size: Option<usize>) -> Self {
        self.auto_fragment_size = size;
        self
    }

    /// Caps the payload size accepted on a single inbound frame.
    pub fn with_max_payload_read(mut self, max: usize) -> Self {
        self.max_payload_read = max;
        self
    }

    /// Sets the policy for connection attempts while already paired.
    pub fn with_extra_peer_policy(mut self, policy: ExtraPeerPolicy) -> Self {
        self.extra_peer_policy = policy;
        self
    }
}
